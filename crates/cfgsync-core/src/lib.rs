pub mod apply;
pub mod command;
pub mod config;
pub mod link;
pub mod types;

pub use apply::{ApplyFailure, ApplyReport};
pub use command::{CommandResult, CommandStatus};
pub use config::SyncConfig;
pub use link::{LinkError, MemberLink};
pub use types::*;
