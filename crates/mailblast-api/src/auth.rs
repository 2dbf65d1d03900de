//! Authentication module
//!
//! Bearer tokens are issued by the hosted identity service; this module
//! only resolves them to the account they belong to.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use mailblast_common::config::IdentityConfig;
use mailblast_common::types::CurrentUser;
use mailblast_common::{Error, Result};
use mailblast_core::{DispatchEngine, DispatchMetrics, InputLoader, TemplateRenderer};
use mailblast_storage::{DatabasePool, DeliveryHistoryRepository, ScheduleRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{api_error, ErrorResponse};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub inputs: Arc<InputLoader>,
    pub history: Arc<dyn DeliveryHistoryRepository>,
    pub schedules: Arc<dyn ScheduleRepository>,
    pub identity: Arc<dyn IdentityProvider>,
    pub renderer: TemplateRenderer,
    pub metrics: Option<Arc<DispatchMetrics>>,
    /// Checked by the readiness endpoint when present
    pub db_pool: Option<DatabasePool>,
}

/// Resolves a session token to the signed-in account
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_user(&self, token: &str) -> Result<CurrentUser>;
}

/// Identity provider reached over HTTP (`GET {base}/auth/v1/user`)
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    user_url: String,
    api_key: Option<String>,
}

impl HttpIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user_url: format!("{}/auth/v1/user", config.url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn current_user(&self, token: &str) -> Result<CurrentUser> {
        let mut request = self.client.get(&self.user_url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Identity(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::Auth("Invalid or expired session".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Identity(format!("answered with status {}", status)));
        }

        response
            .json::<CurrentUser>()
            .await
            .map_err(|e| Error::Identity(format!("malformed user response: {}", e)))
    }
}

/// Extract the bearer token from the `Authorization` header
pub fn extract_bearer_token(req: &Request) -> Option<&str> {
    let header = req.headers().get("authorization")?.to_str().ok()?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Authentication middleware
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let token = extract_bearer_token(&request).ok_or_else(|| {
        warn!("Missing bearer token in request to {}", request.uri().path());
        api_error(Error::Auth("Missing bearer token".to_string()))
    })?;

    let user = state.identity.current_user(token).await.map_err(|e| {
        warn!("Rejected session for {}: {}", request.uri().path(), e);
        api_error(e)
    })?;

    debug!(user_id = %user.id, "Authenticated request");
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}
