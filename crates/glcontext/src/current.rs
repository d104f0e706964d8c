//! The calling thread's current context.
//!
//! Mirrors the driver's own per-thread current context. The cell is written
//! in exactly two places: a successful `make_current` sets it and `release`
//! clears it.

use crate::context::Context;
use common::GlResult;
use std::cell::RefCell;

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// The context current on the calling thread, if any.
pub fn current_context() -> Option<Context> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Whether `context` is the calling thread's current context.
pub fn is_current(context: &Context) -> bool {
    CURRENT.with(|current| current.borrow().as_ref().is_some_and(|c| c == context))
}

pub(crate) fn set_current(context: Option<Context>) -> Option<Context> {
    CURRENT.with(|current| std::mem::replace(&mut *current.borrow_mut(), context))
}

/// Release the calling thread's context if other threads are queued for it.
///
/// Returns whether a context was released. Used by long-lived service threads
/// that would otherwise sit on a context between tasks.
pub fn release_if_contended() -> GlResult<bool> {
    match current_context() {
        Some(context) if context.has_waiting_threads() => {
            tracing::debug!(context = %context.id(), "releasing contended context");
            context.release()?;
            Ok(true)
        }
        _ => Ok(false),
    }
}
