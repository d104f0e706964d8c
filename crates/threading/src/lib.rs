//! Threading helpers for the context core.
//!
//! [`WorkerThread`] funnels GPU work through one long-lived thread when the
//! platform cannot use arbitrary threads; [`Threading`] decides where work
//! runs; [`SharedResourceRunner`] creates one shared resource per device on
//! its own thread.

pub mod dispatch;
pub mod error;
pub mod shared_resource;
pub mod worker;

pub use dispatch::{Threading, ToolkitExecutor};
pub use error::WorkerError;
pub use shared_resource::{SharedContextFactory, SharedDeviceContext, SharedResourceFactory, SharedResourceRunner};
pub use worker::{Task, WorkerThread};
