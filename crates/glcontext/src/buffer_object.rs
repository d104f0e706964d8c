//! Storage and mapping state of buffer objects.
//!
//! Every storage allocation, mapping, unmapping and deletion is routed through
//! [`BufferObjectTracker`] so it can answer "how big is buffer N and is it
//! mapped, and where" without asking the driver.

use crate::buffer_state::BufferStateTracker;
use crate::gl;
use crate::native::{GlDriver, NativeHandle};
use common::{GlError, GlResult};
use parking_lot::Mutex;
use std::collections::HashMap;

/// How a buffer's storage was allocated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    /// `glBufferData` with a usage hint.
    Mutable { usage: u32 },
    /// `glBufferStorage` with immutable storage flags.
    Immutable { flags: u32 },
}

/// Which buffer a call addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferRef {
    /// Whatever is bound to this target.
    Target(u32),
    /// A buffer name, direct-state-access style.
    Named(u32),
}

/// A live CPU-visible mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MappedBuffer {
    address: usize,
    offset: u64,
    length: u64,
    access: u32,
}

impl MappedBuffer {
    pub fn address(&self) -> usize {
        self.address
    }

    /// Offset of the mapping within the buffer.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    /// `glMapBufferRange` access bits.
    pub fn access(&self) -> u32 {
        self.access
    }

    /// View the mapped bytes.
    ///
    /// # Safety
    ///
    /// The buffer must still be mapped in the driver, and no one may write to
    /// the range for the lifetime of the returned slice.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.address as *const u8, self.length as usize)
    }

    /// Mutable view of the mapped bytes.
    ///
    /// # Safety
    ///
    /// The buffer must still be mapped with write access, and the returned
    /// slice must be the only live view of the range.
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.address as *mut u8, self.length as usize)
    }
}

/// Tracked state of one buffer object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferStorage {
    name: u32,
    size: u64,
    kind: StorageKind,
    mapping: Option<MappedBuffer>,
}

impl BufferStorage {
    pub fn name(&self) -> u32 {
        self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn mapping(&self) -> Option<&MappedBuffer> {
        self.mapping.as_ref()
    }

    pub fn mapping_mut(&mut self) -> Option<&mut MappedBuffer> {
        self.mapping.as_mut()
    }
}

/// Arguments of a storage allocation.
#[derive(Clone, Copy, Debug)]
pub struct StorageRequest<'a> {
    pub buffer: BufferRef,
    pub size: i64,
    pub data: Option<&'a [u8]>,
    pub kind: StorageKind,
}

/// Arguments of a mapping request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapRequest {
    /// `glMapBuffer`: the whole store, legacy access enumerant or range bits.
    Whole { access: u32 },
    /// `glMapBufferRange`.
    Range { offset: i64, length: i64, access: u32 },
}

/// Per-context buffer storage model.
#[derive(Debug, Default)]
pub struct BufferObjectTracker {
    storages: Mutex<HashMap<u32, BufferStorage>>,
}

impl BufferObjectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a buffer reference to a name, failing if nothing is bound.
    fn resolve(
        gl: &dyn GlDriver,
        context: NativeHandle,
        bindings: &BufferStateTracker,
        buffer: BufferRef,
    ) -> GlResult<u32> {
        let name = match buffer {
            BufferRef::Target(target) => bindings.get_bound(gl, context, target)?,
            BufferRef::Named(name) => name,
        };
        if name == 0 {
            return Err(GlError::buffer(match buffer {
                BufferRef::Target(target) => format!("no buffer bound to target {:#06x}", target),
                BufferRef::Named(_) => "buffer name 0 is reserved".to_string(),
            }));
        }
        Ok(name)
    }

    /// Allocate (or reallocate) storage and start tracking it.
    ///
    /// Reallocation replaces the tracked storage in place, dropping any
    /// mapping the old store had. On error nothing tracked is changed.
    pub fn create_storage(
        &self,
        gl: &dyn GlDriver,
        context: NativeHandle,
        bindings: &BufferStateTracker,
        request: StorageRequest<'_>,
    ) -> GlResult<BufferStorage> {
        let name = Self::resolve(gl, context, bindings, request.buffer)?;

        match request.kind {
            StorageKind::Mutable { .. } if request.size < 0 => {
                return Err(GlError::buffer(format!(
                    "negative size {} for mutable storage of buffer {}",
                    request.size, name
                )));
            }
            StorageKind::Immutable { .. } if request.size <= 0 => {
                return Err(GlError::buffer(format!(
                    "non-positive size {} for immutable storage of buffer {}",
                    request.size, name
                )));
            }
            _ => {}
        }
        if let Some(data) = request.data {
            if (data.len() as i64) < request.size {
                return Err(GlError::buffer(format!(
                    "{} bytes of data for {} bytes of storage in buffer {}",
                    data.len(),
                    request.size,
                    name
                )));
            }
        }

        let pending = gl.get_error(context);
        if pending != gl::NO_ERROR {
            tracing::debug!(code = pending, "discarding stale GL error before storage allocation");
        }

        let call = match (request.buffer, request.kind) {
            (BufferRef::Target(target), StorageKind::Mutable { usage }) => {
                gl.buffer_data(context, target, request.size, request.data, usage);
                "glBufferData"
            }
            (BufferRef::Named(_), StorageKind::Mutable { usage }) => {
                gl.named_buffer_data(context, name, request.size, request.data, usage);
                "glNamedBufferData"
            }
            (BufferRef::Target(target), StorageKind::Immutable { flags }) => {
                gl.buffer_storage(context, target, request.size, request.data, flags);
                "glBufferStorage"
            }
            (BufferRef::Named(_), StorageKind::Immutable { flags }) => {
                gl.named_buffer_storage(context, name, request.size, request.data, flags);
                "glNamedBufferStorage"
            }
        };

        let code = gl.get_error(context);
        if code != gl::NO_ERROR {
            return Err(GlError::Native { call, code });
        }

        let size = request.size as u64;
        let mut storages = self.storages.lock();
        let storage = storages.entry(name).or_insert_with(|| BufferStorage {
            name,
            size,
            kind: request.kind,
            mapping: None,
        });
        if storage.mapping.is_some() {
            tracing::debug!(buffer = name, "storage recreated while mapped; mapping dropped");
        }
        storage.size = size;
        storage.kind = request.kind;
        storage.mapping = None;
        Ok(storage.clone())
    }

    /// Map a tracked buffer.
    ///
    /// A driver that refuses the mapping is not an error: the storage comes
    /// back unmapped and the driver's error flag explains why.
    pub fn map_storage(
        &self,
        gl: &dyn GlDriver,
        context: NativeHandle,
        bindings: &BufferStateTracker,
        buffer: BufferRef,
        request: MapRequest,
    ) -> GlResult<BufferStorage> {
        let name = Self::resolve(gl, context, bindings, buffer)?;
        let mut storages = self.storages.lock();
        let storage = storages
            .get_mut(&name)
            .ok_or_else(|| GlError::buffer(format!("buffer {} has no tracked storage", name)))?;
        if storage.is_mapped() {
            return Err(GlError::buffer(format!("buffer {} is already mapped", name)));
        }

        let (offset, length, access) = match request {
            MapRequest::Whole { access } => (0, storage.size as i64, gl::access_to_range_bits(access)),
            MapRequest::Range { offset, length, access } => (offset, length, access),
        };
        if offset < 0 || length < 0 || (offset as u64).saturating_add(length as u64) > storage.size {
            return Err(GlError::buffer(format!(
                "map range [{}, {}+{}) outside buffer {} of size {}",
                offset, offset, length, name, storage.size
            )));
        }
        if storage.size == 0 || length == 0 {
            return Ok(storage.clone());
        }

        let address = match buffer {
            BufferRef::Target(target) => gl.map_buffer_range(context, target, offset, length, access),
            BufferRef::Named(_) => gl.map_named_buffer_range(context, name, offset, length, access),
        };
        if address == 0 {
            tracing::debug!(buffer = name, offset, length, "driver refused mapping");
            return Ok(storage.clone());
        }

        storage.mapping = Some(MappedBuffer {
            address,
            offset: offset as u64,
            length: length as u64,
            access,
        });
        Ok(storage.clone())
    }

    /// Unmap a buffer. The cached mapping is only dropped if the driver succeeds.
    pub fn unmap_storage(
        &self,
        gl: &dyn GlDriver,
        context: NativeHandle,
        bindings: &BufferStateTracker,
        buffer: BufferRef,
    ) -> GlResult<bool> {
        let name = Self::resolve(gl, context, bindings, buffer)?;
        let mut storages = self.storages.lock();

        let unmapped = match buffer {
            BufferRef::Target(target) => gl.unmap_buffer(context, target),
            BufferRef::Named(_) => gl.unmap_named_buffer(context, name),
        };

        match storages.get_mut(&name) {
            Some(storage) if unmapped => storage.mapping = None,
            Some(_) => tracing::debug!(buffer = name, "driver reported unmap failure; mapping kept"),
            None => tracing::warn!(buffer = name, "unmapped a buffer with no tracked storage"),
        }
        Ok(unmapped)
    }

    /// Forget deleted buffers. Untracked names are expected and only logged.
    pub fn notify_deleted(&self, buffers: &[u32]) {
        let mut storages = self.storages.lock();
        for &name in buffers {
            if storages.remove(&name).is_none() {
                tracing::debug!(buffer = name, "deleted buffer had no tracked storage");
            }
        }
    }

    pub fn get_storage(&self, name: u32) -> Option<BufferStorage> {
        self.storages.lock().get(&name).cloned()
    }

    pub fn len(&self) -> usize {
        self.storages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.lock().is_empty()
    }

    /// Drop every tracked storage.
    ///
    /// Only valid once no other context of the share group is alive, since
    /// buffer objects outlive the context that created them.
    pub fn clear(&self) {
        let mut storages = self.storages.lock();
        if !storages.is_empty() {
            tracing::debug!(count = storages.len(), "clearing tracked buffer storage");
        }
        storages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessConfig, HeadlessDriver};

    struct Fixture {
        driver: HeadlessDriver,
        context: NativeHandle,
        bindings: BufferStateTracker,
        tracker: BufferObjectTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let driver = HeadlessDriver::new(HeadlessConfig::default());
            let context = driver.create_bare_context();
            Self {
                driver,
                context,
                bindings: BufferStateTracker::new(),
                tracker: BufferObjectTracker::new(),
            }
        }

        fn bind(&self, target: u32, buffer: u32) {
            self.driver.bind_buffer(self.context, target, buffer);
            self.bindings.set_bound(target, buffer);
        }

        fn create(&self, size: i64, kind: StorageKind) -> GlResult<BufferStorage> {
            self.tracker.create_storage(
                &self.driver,
                self.context,
                &self.bindings,
                StorageRequest {
                    buffer: BufferRef::Target(gl::ARRAY_BUFFER),
                    size,
                    data: None,
                    kind,
                },
            )
        }

        fn map(&self, request: MapRequest) -> GlResult<BufferStorage> {
            self.tracker.map_storage(
                &self.driver,
                self.context,
                &self.bindings,
                BufferRef::Target(gl::ARRAY_BUFFER),
                request,
            )
        }

        fn unmap(&self) -> GlResult<bool> {
            self.tracker
                .unmap_storage(&self.driver, self.context, &self.bindings, BufferRef::Target(gl::ARRAY_BUFFER))
        }
    }

    const DYNAMIC: StorageKind = StorageKind::Mutable { usage: gl::DYNAMIC_DRAW };

    #[test]
    fn test_storage_lifecycle() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 1);

        let storage = fx.create(1024, DYNAMIC).unwrap();
        assert_eq!(storage.size(), 1024);
        assert!(!storage.is_mapped());

        let mapped = fx
            .map(MapRequest::Range { offset: 0, length: 1024, access: gl::MAP_WRITE_BIT })
            .unwrap();
        assert!(mapped.is_mapped());
        assert_eq!(mapped.mapping().unwrap().length(), 1024);

        let err = fx.map(MapRequest::Whole { access: gl::READ_WRITE }).unwrap_err();
        assert!(err.to_string().contains("already mapped"));

        assert!(fx.unmap().unwrap());
        assert!(!fx.tracker.get_storage(1).unwrap().is_mapped());
        assert!(fx.map(MapRequest::Whole { access: gl::READ_ONLY }).unwrap().is_mapped());
    }

    #[test]
    fn test_mapping_exposes_bytes() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 2);
        let payload: Vec<u8> = (0..16).collect();
        fx.tracker
            .create_storage(
                &fx.driver,
                fx.context,
                &fx.bindings,
                StorageRequest {
                    buffer: BufferRef::Named(2),
                    size: 16,
                    data: Some(&payload),
                    kind: DYNAMIC,
                },
            )
            .unwrap();

        let mut storage = fx
            .map(MapRequest::Range { offset: 4, length: 8, access: gl::MAP_READ_BIT | gl::MAP_WRITE_BIT })
            .unwrap();
        let mapping = storage.mapping_mut().unwrap();
        let bytes = unsafe { mapping.as_mut_slice() };
        assert_eq!(bytes, &payload[4..12]);
        bytes[0] = 0xFF;
        assert_eq!(fx.driver.buffer_contents(fx.context, 2).unwrap()[4], 0xFF);
    }

    #[test]
    fn test_create_requires_binding() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 0);
        let err = fx.create(16, DYNAMIC).unwrap_err();
        assert!(matches!(err, GlError::Buffer(_)));
        assert!(fx.tracker.is_empty());
    }

    #[test]
    fn test_size_validation() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 3);
        assert!(fx.create(-1, DYNAMIC).is_err());
        assert!(fx.create(0, StorageKind::Immutable { flags: gl::MAP_READ_BIT }).is_err());
        assert_eq!(fx.create(0, DYNAMIC).unwrap().size(), 0);
    }

    #[test]
    fn test_native_error_keeps_previous_storage() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 4);
        fx.create(64, DYNAMIC).unwrap();

        fx.driver.fail_next_allocation(gl::OUT_OF_MEMORY);
        let err = fx.create(1 << 20, DYNAMIC).unwrap_err();
        assert_eq!(err, GlError::Native { call: "glBufferData", code: gl::OUT_OF_MEMORY });
        assert_eq!(fx.tracker.get_storage(4).unwrap().size(), 64);
    }

    #[test]
    fn test_recreate_drops_mapping() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 5);
        fx.create(32, DYNAMIC).unwrap();
        fx.map(MapRequest::Whole { access: gl::WRITE_ONLY }).unwrap();

        let storage = fx.create(128, StorageKind::Immutable { flags: gl::MAP_WRITE_BIT }).unwrap();
        assert!(!storage.is_mapped());
        assert_eq!(storage.size(), 128);
        assert_eq!(storage.kind(), StorageKind::Immutable { flags: gl::MAP_WRITE_BIT });
    }

    #[test]
    fn test_map_range_validation() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 6);
        fx.create(100, DYNAMIC).unwrap();

        assert!(fx.map(MapRequest::Range { offset: 90, length: 20, access: gl::MAP_READ_BIT }).is_err());
        assert!(fx.map(MapRequest::Range { offset: -1, length: 5, access: gl::MAP_READ_BIT }).is_err());
        assert!(!fx.tracker.get_storage(6).unwrap().is_mapped());
    }

    #[test]
    fn test_zero_length_store_skips_native_map() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 7);
        fx.create(0, DYNAMIC).unwrap();

        let storage = fx.map(MapRequest::Whole { access: gl::READ_ONLY }).unwrap();
        assert!(!storage.is_mapped());
        assert_eq!(fx.driver.stats().map_calls, 0);
    }

    #[test]
    fn test_driver_map_failure_returns_unmapped() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 8);
        fx.create(16, DYNAMIC).unwrap();

        fx.driver.fail_next_map();
        let storage = fx.map(MapRequest::Whole { access: gl::READ_ONLY }).unwrap();
        assert!(!storage.is_mapped());
        assert_eq!(fx.driver.stats().map_calls, 1);
    }

    #[test]
    fn test_unmap_failure_keeps_mapping() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 9);
        fx.create(16, DYNAMIC).unwrap();
        fx.map(MapRequest::Whole { access: gl::READ_ONLY }).unwrap();

        fx.driver.fail_next_unmap();
        assert!(!fx.unmap().unwrap());
        assert!(fx.tracker.get_storage(9).unwrap().is_mapped());
    }

    #[test]
    fn test_untracked_map_and_delete() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 10);
        assert!(fx.map(MapRequest::Whole { access: gl::READ_ONLY }).is_err());

        fx.tracker.notify_deleted(&[10, 11]);
        assert!(fx.tracker.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let fx = Fixture::new();
        fx.bind(gl::ARRAY_BUFFER, 12);
        fx.create(8, DYNAMIC).unwrap();
        fx.bind(gl::ARRAY_BUFFER, 13);
        fx.create(8, DYNAMIC).unwrap();
        assert_eq!(fx.tracker.len(), 2);

        fx.tracker.notify_deleted(&[12]);
        assert!(fx.tracker.get_storage(12).is_none());
        fx.tracker.clear();
        assert!(fx.tracker.is_empty());
    }
}
