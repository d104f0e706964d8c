//! Common types shared by the context core crates.

pub mod config;
pub mod error;

pub use config::{GlConfig, ThreadingConfig, ThreadingStrategy};
pub use error::{thread_label, GlError, GlResult};
