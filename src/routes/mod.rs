pub mod dispatch;
pub mod health;
pub mod notifications;
pub mod settings;
