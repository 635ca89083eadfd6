//! cfgsync-member: the member side of configuration distribution.
//!
//! A [`MemberAgent`] applies the bundle received at join time and the
//! single artifacts pushed on later deploys. Apply problems are reported
//! as [`cfgsync_core::ApplyFailure`]s; the member keeps running.

pub mod agent;
pub mod error;
pub mod link;

pub use agent::{INSTALLED_PREFIX, LoadedUnit, MemberAgent};
pub use error::{MemberError, MemberResult};
pub use link::LocalLink;
