//! Cache of which buffer object is bound to each binding point.
//!
//! Entries start out unknown. An unknown entry is resolved with exactly one
//! driver query and cached; afterwards `glBindBuffer` interception keeps it
//! up to date. "Unknown" (no entry) is distinct from "known unbound" (0).
//!
//! Only targets in a fixed table are tracked, because each needs a matching
//! query enumerant. Client attribute stack pops are not modelled; callers
//! [`clear`](BufferStateTracker::clear) the cache after one instead.

use crate::gl;
use crate::native::{GlDriver, NativeHandle};
use common::{GlError, GlResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Map a binding target to the enumerant that queries its current binding.
pub fn binding_query_for(target: u32) -> Option<u32> {
    let query = match target {
        gl::ARRAY_BUFFER => gl::ARRAY_BUFFER_BINDING,
        gl::ELEMENT_ARRAY_BUFFER => gl::ELEMENT_ARRAY_BUFFER_BINDING,
        gl::PIXEL_PACK_BUFFER => gl::PIXEL_PACK_BUFFER_BINDING,
        gl::PIXEL_UNPACK_BUFFER => gl::PIXEL_UNPACK_BUFFER_BINDING,
        gl::UNIFORM_BUFFER => gl::UNIFORM_BUFFER_BINDING,
        gl::TEXTURE_BUFFER => gl::TEXTURE_BINDING_BUFFER,
        gl::TRANSFORM_FEEDBACK_BUFFER => gl::TRANSFORM_FEEDBACK_BUFFER_BINDING,
        gl::DRAW_INDIRECT_BUFFER => gl::DRAW_INDIRECT_BUFFER_BINDING,
        gl::DISPATCH_INDIRECT_BUFFER => gl::DISPATCH_INDIRECT_BUFFER_BINDING,
        gl::SHADER_STORAGE_BUFFER => gl::SHADER_STORAGE_BUFFER_BINDING,
        gl::QUERY_BUFFER => gl::QUERY_BUFFER_BINDING,
        gl::ATOMIC_COUNTER_BUFFER => gl::ATOMIC_COUNTER_BUFFER_BINDING,
        // These targets double as their own binding query.
        gl::COPY_READ_BUFFER | gl::COPY_WRITE_BUFFER | gl::VERTEX_ARRAY_BINDING => target,
        _ => return None,
    };
    Some(query)
}

/// Per-context binding cache.
#[derive(Debug, Default)]
pub struct BufferStateTracker {
    bindings: Mutex<HashMap<u32, u32>>,
}

impl BufferStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tracked_target(target: u32) -> bool {
        binding_query_for(target).is_some()
    }

    /// Record a `glBindBuffer(target, buffer)`. Untracked targets are ignored.
    pub fn set_bound(&self, target: u32, buffer: u32) {
        if Self::is_tracked_target(target) {
            self.bindings.lock().insert(target, buffer);
        } else {
            tracing::trace!(binding_target = target, "binding on untracked target not cached");
        }
    }

    /// Buffer bound to `target`, querying the driver once if unknown.
    pub fn get_bound(&self, gl: &dyn GlDriver, context: NativeHandle, target: u32) -> GlResult<u32> {
        let query = binding_query_for(target).ok_or_else(|| {
            GlError::buffer(format!("unsupported buffer binding target {:#06x}", target))
        })?;

        let mut bindings = self.bindings.lock();
        if let Some(&buffer) = bindings.get(&target) {
            return Ok(buffer);
        }

        let buffer = u32::try_from(gl.get_integer(context, query)).unwrap_or(0);
        bindings.insert(target, buffer);
        tracing::trace!(binding_target = target, buffer, "resolved buffer binding");
        Ok(buffer)
    }

    /// Cached binding without querying; `None` means unknown.
    pub fn cached(&self, target: u32) -> Option<u32> {
        self.bindings.lock().get(&target).copied()
    }

    /// Forget bindings that refer to deleted buffers; they revert to 0 in GL.
    pub fn notify_deleted(&self, buffers: &[u32]) {
        let mut bindings = self.bindings.lock();
        for bound in bindings.values_mut() {
            if buffers.contains(bound) {
                *bound = 0;
            }
        }
    }

    /// Mark every binding unknown.
    pub fn clear(&self) {
        self.bindings.lock().clear();
    }
}
