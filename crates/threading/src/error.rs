//! Errors raised by the threading helpers.

use std::any::Any;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The task itself panicked; the message is the panic payload.
    #[error("Task panicked on worker thread: {0}")]
    TaskPanicked(String),

    #[error("Worker thread is not running")]
    NotRunning,

    /// The call would make the worker wait on itself.
    #[error("Operation not allowed on the worker thread")]
    OnWorkerThread,

    #[error("Failed to spawn thread: {0}")]
    Spawn(String),

    #[error("No toolkit executor registered")]
    NoToolkit,
}

/// Text of a panic payload, if it carries one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
