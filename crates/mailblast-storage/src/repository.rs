//! Repository layer for data access

pub mod contacts;
pub mod delivery_history;
pub mod schedules;
pub mod settings;
pub mod templates;

// Re-export concrete repository implementations
pub use contacts::DbContactRepository;
pub use delivery_history::DbDeliveryHistoryRepository;
pub use schedules::DbScheduleRepository;
pub use settings::DbSettingsRepository;
pub use templates::DbTemplateRepository;

// Re-export repository traits
pub use contacts::ContactRepository;
pub use delivery_history::DeliveryHistoryRepository;
pub use schedules::ScheduleRepository;
pub use settings::SettingsRepository;
pub use templates::TemplateRepository;
