//! cfgsync-store: durable configuration store for the locator.
//!
//! Records live in a plain directory tree so that an operator can inspect
//! them, and so that the tree can be zipped and moved between locators.
//!
//! # Architecture
//!
//! - [`ConfigStore`] owns the tree: load, per-record locked
//!   read-modify-write, snapshots for readers.
//! - [`ArtifactRegistry`] layers versioned artifact files on top.
//! - [`descriptor`] and [`layout`] define the on-disk formats.
//!
//! `ConfigStore` is `Clone + Send + Sync` and can be shared across tasks.

pub mod descriptor;
pub mod error;
pub mod layout;
pub mod registry;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use registry::ArtifactRegistry;
pub use store::ConfigStore;
