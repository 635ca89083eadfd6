//! cfgsync-coordinator: the locator side of configuration distribution.
//!
//! [`ConfigCoordinator`] owns the store and one session per joined
//! member. It answers joins with a resolved bundle, fans deploys out to
//! the members that receive the target record, and swaps the whole store
//! on import while no member is connected.

pub mod coordinator;
pub mod error;
pub mod resolver;
pub mod session;

pub use coordinator::{
    ConfigCoordinator, DEFAULT_ACK_TIMEOUT, DeployResult, ImportResult, JoinResponse, MemberFailure,
};
pub use error::{CoordinatorError, CoordinatorResult};
pub use resolver::GroupResolver;
pub use session::{MemberInfo, SessionState};
