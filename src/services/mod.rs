pub mod catalog;
pub mod channels;
pub mod cost;
pub mod defaults;
pub mod dispatcher;
pub mod idempotency;
pub mod init;
pub mod preferences;
pub mod retry;
pub mod template;
