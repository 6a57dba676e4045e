//! Database row structs split into separate files.

pub mod notification_log;
pub mod notification_setting;

pub use self::notification_log::*;
pub use self::notification_setting::*;
