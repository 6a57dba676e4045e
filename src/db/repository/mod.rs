pub mod notification_log_repository;
pub mod notification_settings_repository;

pub use notification_log_repository::NotificationLogRepository;
pub use notification_settings_repository::NotificationSettingsRepository;
