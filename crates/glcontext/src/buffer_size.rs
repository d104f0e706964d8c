//! Share-group-wide cache of buffer object sizes.
//!
//! Buffer names are only unique within a share group, so one tracker is shared
//! by every context of the group (see
//! [`synchronize_buffer_object_sharing`](crate::share_set::synchronize_buffer_object_sharing)).

use crate::buffer_state::BufferStateTracker;
use crate::gl;
use crate::native::{GlDriver, NativeHandle};
use common::{GlError, GlResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Last known byte size per buffer name.
#[derive(Debug, Default)]
pub struct BufferSizeTracker {
    sizes: Mutex<HashMap<u32, u64>>,
}

impl BufferSizeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the size of freshly (re)allocated storage.
    pub fn set_size(&self, buffer: u32, size: u64) {
        self.sizes.lock().insert(buffer, size);
    }

    /// Size of `buffer`, queried from the driver once and cached.
    ///
    /// A driver answer of zero is not cached: it almost always means the
    /// caller never bound or allocated the buffer.
    pub fn get_size(&self, gl: &dyn GlDriver, context: NativeHandle, target: u32, buffer: u32) -> GlResult<u64> {
        if let Some(&size) = self.sizes.lock().get(&buffer) {
            return Ok(size);
        }

        let queried = gl.get_named_buffer_parameter(context, buffer, gl::BUFFER_SIZE);
        if queried <= 0 {
            return Err(GlError::ZeroBufferSize { target, buffer });
        }
        let size = queried as u64;
        self.sizes.lock().insert(buffer, size);
        tracing::trace!(buffer, size, "cached buffer size");
        Ok(size)
    }

    /// Size of the buffer bound to `target`; 0 when nothing is bound.
    pub fn get_bound_size(
        &self,
        gl: &dyn GlDriver,
        context: NativeHandle,
        bindings: &BufferStateTracker,
        target: u32,
    ) -> GlResult<u64> {
        match bindings.get_bound(gl, context, target)? {
            0 => Ok(0),
            buffer => self.get_size(gl, context, target, buffer),
        }
    }

    pub fn cached(&self, buffer: u32) -> Option<u64> {
        self.sizes.lock().get(&buffer).copied()
    }

    pub fn remove(&self, buffers: &[u32]) {
        let mut sizes = self.sizes.lock();
        for buffer in buffers {
            sizes.remove(buffer);
        }
    }

    pub fn len(&self) -> usize {
        self.sizes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.lock().is_empty()
    }

    pub fn clear(&self) {
        self.sizes.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessConfig, HeadlessDriver};

    #[test]
    fn test_size_queried_at_most_once() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());
        let context = driver.create_bare_context();
        driver.bind_buffer(context, gl::ARRAY_BUFFER, 3);
        driver.buffer_data(context, gl::ARRAY_BUFFER, 512, None, gl::STATIC_DRAW);

        let tracker = BufferSizeTracker::new();
        let first = tracker.get_size(&driver, context, gl::ARRAY_BUFFER, 3).unwrap();
        let second = tracker.get_size(&driver, context, gl::ARRAY_BUFFER, 3).unwrap();

        assert_eq!(first, 512);
        assert_eq!(first, second);
        assert_eq!(driver.stats().size_queries, 1);
    }

    #[test]
    fn test_zero_size_is_an_error_and_not_cached() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());
        let context = driver.create_bare_context();
        let tracker = BufferSizeTracker::new();

        let err = tracker.get_size(&driver, context, gl::ARRAY_BUFFER, 11).unwrap_err();
        assert_eq!(err, GlError::ZeroBufferSize { target: gl::ARRAY_BUFFER, buffer: 11 });
        assert_eq!(tracker.cached(11), None);
    }

    #[test]
    fn test_set_size_short_circuits_query() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());
        let context = driver.create_bare_context();
        let tracker = BufferSizeTracker::new();

        tracker.set_size(4, 64);
        assert_eq!(tracker.get_size(&driver, context, gl::ARRAY_BUFFER, 4).unwrap(), 64);
        assert_eq!(driver.stats().size_queries, 0);

        tracker.remove(&[4]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_bound_size_of_unbound_target() {
        let driver = HeadlessDriver::new(HeadlessConfig::default());
        let context = driver.create_bare_context();
        let bindings = BufferStateTracker::new();
        bindings.set_bound(gl::PIXEL_PACK_BUFFER, 0);

        let tracker = BufferSizeTracker::new();
        assert_eq!(tracker.get_bound_size(&driver, context, &bindings, gl::PIXEL_PACK_BUFFER).unwrap(), 0);
    }
}
