//! In-memory driver used by tests, benches and the `glprobe` tool.
//!
//! [`HeadlessDriver`] implements both native traits without touching a GPU.
//! Contexts, share groups, bindings and buffer stores are plain maps; buffer
//! bytes live in `Vec<u8>`s so mapped addresses stay valid until the store is
//! reallocated or deleted. Every entry point that the core is supposed to
//! call sparingly bumps a counter in [`HeadlessStats`].

use crate::buffer_state::binding_query_for;
use crate::gl;
use crate::native::{CreateRequest, GlDriver, NativeHandle, Platform, PlatformBackend, Surface, SurfaceLock};
use crate::version::{ContextOptions, DeviceKey, GlVersion};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::thread::{self, ThreadId};

/// Entry points a headless context resolves by default.
const DEFAULT_FUNCTIONS: &[&str] = &[
    "glGetError",
    "glGetString",
    "glGetStringi",
    "glGetIntegerv",
    "glBindBuffer",
    "glBufferData",
    "glBufferStorage",
    "glNamedBufferData",
    "glNamedBufferStorage",
    "glGetNamedBufferParameteri64v",
    "glMapBufferRange",
    "glMapNamedBufferRange",
    "glUnmapBuffer",
    "glUnmapNamedBuffer",
    "glDeleteBuffers",
    "glPushClientAttrib",
    "glPopClientAttrib",
    "glDebugMessageCallbackKHR",
    "glBufferStorageEXT",
];

const PLATFORM_FUNCTIONS: &[&str] = &[
    "eglGetProcAddress",
    "eglCreateContext",
    "eglDestroyContext",
    "eglMakeCurrent",
    "eglSwapBuffers",
    "eglQueryString",
];

/// Capabilities of the simulated driver.
#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    /// Highest core profile version; `None` disables core contexts.
    pub max_core: Option<GlVersion>,
    /// Highest compatibility profile version, also used by legacy creation.
    pub max_compat: GlVersion,
    /// Whether explicit version/profile creation is available.
    pub explicit_version: bool,
    /// Core contexts must be forward compatible (macOS style).
    pub forward_compatible_only: bool,
    pub hardware: bool,
    pub gl_extensions: Vec<String>,
    pub platform_extensions: String,
    /// Entry points `resolve_function_address` knows about.
    pub functions: Vec<String>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            max_core: Some(GlVersion::new(4, 5)),
            max_compat: GlVersion::new(3, 0),
            explicit_version: true,
            forward_compatible_only: false,
            hardware: true,
            gl_extensions: ["GL_ARB_buffer_storage", "GL_ARB_direct_state_access", "GL_KHR_debug"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            platform_extensions: "EGL_KHR_create_context EGL_KHR_surfaceless_context EGL_KHR_create_context"
                .to_string(),
            functions: DEFAULT_FUNCTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HeadlessConfig {
    pub fn with_max_core(mut self, version: Option<GlVersion>) -> Self {
        self.max_core = version;
        self
    }

    pub fn with_max_compat(mut self, version: GlVersion) -> Self {
        self.max_compat = version;
        self
    }

    pub fn with_explicit_version(mut self, enabled: bool) -> Self {
        self.explicit_version = enabled;
        self
    }

    pub fn with_forward_compatible_only(mut self, enabled: bool) -> Self {
        self.forward_compatible_only = enabled;
        self
    }

    pub fn with_hardware(mut self, hardware: bool) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn with_gl_extensions(mut self, extensions: &[&str]) -> Self {
        self.gl_extensions = extensions.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_platform_extensions(mut self, extensions: &str) -> Self {
        self.platform_extensions = extensions.to_string();
        self
    }

    pub fn with_function(mut self, name: &str) -> Self {
        self.functions.push(name.to_string());
        self
    }

    pub fn without_function(mut self, name: &str) -> Self {
        self.functions.retain(|f| f != name);
        self
    }
}

/// Call counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub create_attempts: usize,
    pub contexts_created: usize,
    pub contexts_destroyed: usize,
    pub make_current_calls: usize,
    pub release_calls: usize,
    pub explicit_version_probes: usize,
    pub binding_queries: usize,
    pub size_queries: usize,
    pub extension_queries: usize,
    pub function_lookups: usize,
    pub map_calls: usize,
    pub unmap_calls: usize,
}

#[derive(Debug)]
struct ContextRecord {
    version: GlVersion,
    options: ContextOptions,
    group: u64,
    current_on: Option<ThreadId>,
    bindings: HashMap<u32, u32>,
    client_stack: Vec<HashMap<u32, u32>>,
    error: u32,
}

impl ContextRecord {
    fn new(version: GlVersion, options: ContextOptions, group: u64) -> Self {
        Self {
            version,
            options,
            group,
            current_on: None,
            bindings: HashMap::new(),
            client_stack: Vec::new(),
            error: gl::NO_ERROR,
        }
    }

    fn raise(&mut self, code: u32) {
        if self.error == gl::NO_ERROR {
            self.error = code;
        }
    }
}

#[derive(Debug, Default)]
struct HeadlessBuffer {
    data: Vec<u8>,
    immutable: bool,
    mapped: bool,
}

#[derive(Debug, Default)]
struct Faults {
    creates: usize,
    make_current: bool,
    allocation: Option<u32>,
    map: bool,
    unmap: bool,
}

#[derive(Debug, Default)]
struct DriverState {
    next_handle: u64,
    next_group: u64,
    contexts: HashMap<u64, ContextRecord>,
    /// Buffer objects per share group.
    groups: HashMap<u64, HashMap<u32, HeadlessBuffer>>,
    faults: Faults,
    stats: HeadlessStats,
}

impl DriverState {
    fn new_group(&mut self) -> u64 {
        self.next_group += 1;
        self.groups.insert(self.next_group, HashMap::new());
        self.next_group
    }

    fn insert_context(&mut self, record: ContextRecord) -> NativeHandle {
        self.next_handle += 1;
        self.contexts.insert(self.next_handle, record);
        NativeHandle(self.next_handle)
    }

    /// Context record and the buffers of its share group.
    fn split(&mut self, context: NativeHandle) -> Option<(&mut ContextRecord, &mut HashMap<u32, HeadlessBuffer>)> {
        let record = self.contexts.get_mut(&context.0)?;
        let buffers = self.groups.get_mut(&record.group)?;
        Some((record, buffers))
    }
}

/// A driver that runs entirely in process memory.
#[derive(Debug)]
pub struct HeadlessDriver {
    config: HeadlessConfig,
    state: Mutex<DriverState>,
}

impl HeadlessDriver {
    pub fn new(config: HeadlessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(DriverState::default()),
        }
    }

    pub fn config(&self) -> &HeadlessConfig {
        &self.config
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats.clone()
    }

    /// A compatibility context with no surface, for exercising GL calls directly.
    pub fn create_bare_context(&self) -> NativeHandle {
        let mut state = self.state.lock();
        let group = state.new_group();
        let record = ContextRecord::new(self.config.max_compat, ContextOptions::PROFILE_COMPAT, group);
        state.insert_context(record)
    }

    /// Refuse the next `count` context creations.
    pub fn fail_next_creates(&self, count: usize) {
        self.state.lock().faults.creates = count;
    }

    /// Refuse every `make_current` until switched off.
    pub fn fail_make_current(&self, enabled: bool) {
        self.state.lock().faults.make_current = enabled;
    }

    /// The next storage allocation raises `code` and allocates nothing.
    pub fn fail_next_allocation(&self, code: u32) {
        self.state.lock().faults.allocation = Some(code);
    }

    pub fn fail_next_map(&self) {
        self.state.lock().faults.map = true;
    }

    pub fn fail_next_unmap(&self) {
        self.state.lock().faults.unmap = true;
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn is_live(&self, context: NativeHandle) -> bool {
        self.state.lock().contexts.contains_key(&context.0)
    }

    /// Version and options a live context was created with.
    pub fn context_info(&self, context: NativeHandle) -> Option<(GlVersion, ContextOptions)> {
        self.state
            .lock()
            .contexts
            .get(&context.0)
            .map(|record| (record.version, record.options))
    }

    /// Whether two live contexts share buffer objects.
    pub fn shares_objects(&self, a: NativeHandle, b: NativeHandle) -> bool {
        let state = self.state.lock();
        match (state.contexts.get(&a.0), state.contexts.get(&b.0)) {
            (Some(a), Some(b)) => a.group == b.group,
            _ => false,
        }
    }

    pub fn is_current_anywhere(&self, context: NativeHandle) -> bool {
        self.state
            .lock()
            .contexts
            .get(&context.0)
            .is_some_and(|record| record.current_on.is_some())
    }

    /// Copy of a buffer's bytes.
    pub fn buffer_contents(&self, context: NativeHandle, buffer: u32) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let (_, buffers) = state.split(context)?;
        buffers.get(&buffer).map(|b| b.data.clone())
    }

    fn with_buffer<R>(
        &self,
        context: NativeHandle,
        buffer: Option<u32>,
        target: u32,
        op: impl FnOnce(&mut ContextRecord, &mut HeadlessBuffer, &mut Faults) -> R,
        fallback: R,
    ) -> R {
        let mut state = self.state.lock();
        let DriverState {
            contexts,
            groups,
            faults,
            ..
        } = &mut *state;
        let Some(record) = contexts.get_mut(&context.0) else {
            return fallback;
        };
        let name = buffer.unwrap_or_else(|| record.bindings.get(&target).copied().unwrap_or(0));
        let Some(store) = groups.get_mut(&record.group).and_then(|b| b.get_mut(&name)) else {
            record.raise(gl::INVALID_OPERATION);
            return fallback;
        };
        op(record, store, faults)
    }

    fn allocate(
        &self,
        context: NativeHandle,
        buffer: Option<u32>,
        target: u32,
        size: i64,
        data: Option<&[u8]>,
        immutable: bool,
    ) {
        self.with_buffer(
            context,
            buffer,
            target,
            |record, store, faults| {
                if let Some(code) = faults.allocation.take() {
                    record.raise(code);
                    return;
                }
                if size < 0 || (immutable && size == 0) {
                    record.raise(gl::INVALID_VALUE);
                    return;
                }
                if store.immutable {
                    record.raise(gl::INVALID_OPERATION);
                    return;
                }
                let size = size as usize;
                store.data = match data {
                    Some(bytes) if bytes.len() >= size => bytes[..size].to_vec(),
                    _ => vec![0; size],
                };
                store.immutable = immutable;
                store.mapped = false;
            },
            (),
        );
    }

    fn map(&self, context: NativeHandle, buffer: Option<u32>, target: u32, offset: i64, length: i64) -> usize {
        self.state.lock().stats.map_calls += 1;
        self.with_buffer(
            context,
            buffer,
            target,
            |record, store, faults| {
                if std::mem::take(&mut faults.map) {
                    record.raise(gl::OUT_OF_MEMORY);
                    return 0;
                }
                let in_range = offset >= 0 && length > 0 && (offset + length) as usize <= store.data.len();
                if store.mapped || !in_range {
                    record.raise(gl::INVALID_OPERATION);
                    return 0;
                }
                store.mapped = true;
                store.data.as_mut_ptr() as usize + offset as usize
            },
            0,
        )
    }

    fn unmap(&self, context: NativeHandle, buffer: Option<u32>, target: u32) -> bool {
        self.state.lock().stats.unmap_calls += 1;
        self.with_buffer(
            context,
            buffer,
            target,
            |record, store, faults| {
                if std::mem::take(&mut faults.unmap) {
                    return false;
                }
                if !store.mapped {
                    record.raise(gl::INVALID_OPERATION);
                    return false;
                }
                store.mapped = false;
                true
            },
            false,
        )
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl PlatformBackend for HeadlessDriver {
    fn platform(&self) -> Platform {
        Platform::Headless
    }

    fn supports_explicit_version(&self, _device: &DeviceKey) -> bool {
        self.state.lock().stats.explicit_version_probes += 1;
        self.config.explicit_version
    }

    fn create_context(&self, request: &CreateRequest) -> Option<NativeHandle> {
        let mut state = self.state.lock();
        state.stats.create_attempts += 1;
        if state.faults.creates > 0 {
            state.faults.creates -= 1;
            return None;
        }

        let (version, options) = match request.version {
            Some((version, options)) => {
                if !self.config.explicit_version || !version.is_valid() {
                    return None;
                }
                let supported = if options.is_core() {
                    let fwd_ok = !self.config.forward_compatible_only
                        || options.contains(ContextOptions::FORWARD_COMPATIBLE);
                    fwd_ok && self.config.max_core.is_some_and(|max| version <= max)
                } else {
                    version <= self.config.max_compat
                };
                if !supported {
                    return None;
                }
                (version, options)
            }
            None => (self.config.max_compat, ContextOptions::PROFILE_COMPAT),
        };
        let mut options = options.profile_bits();
        if request.debug {
            options |= ContextOptions::DEBUG;
        }

        let group = match request.share_with {
            Some(peer) => state.contexts.get(&peer.0)?.group,
            None => state.new_group(),
        };
        let handle = state.insert_context(ContextRecord::new(version, options, group));
        state.stats.contexts_created += 1;
        Some(handle)
    }

    fn destroy_context(&self, context: NativeHandle) -> bool {
        let mut state = self.state.lock();
        let Some(record) = state.contexts.remove(&context.0) else {
            return false;
        };
        state.stats.contexts_destroyed += 1;
        if !state.contexts.values().any(|other| other.group == record.group) {
            state.groups.remove(&record.group);
        }
        true
    }

    fn make_current(&self, context: NativeHandle, _draw: u64, _read: u64) -> bool {
        let mut state = self.state.lock();
        state.stats.make_current_calls += 1;
        if state.faults.make_current {
            return false;
        }
        let me = thread::current().id();
        match state.contexts.get_mut(&context.0) {
            Some(record) if record.current_on.map_or(true, |owner| owner == me) => {
                record.current_on = Some(me);
                true
            }
            _ => false,
        }
    }

    fn release_current(&self, context: NativeHandle) -> bool {
        let mut state = self.state.lock();
        state.stats.release_calls += 1;
        match state.contexts.get_mut(&context.0) {
            Some(record) if record.current_on.is_some() => {
                record.current_on = None;
                true
            }
            _ => false,
        }
    }

    fn is_hardware_accelerated(&self, _context: NativeHandle) -> bool {
        self.config.hardware
    }

    fn resolve_function_address(&self, name: &str) -> Option<usize> {
        self.state.lock().stats.function_lookups += 1;
        self.config
            .functions
            .iter()
            .map(String::as_str)
            .chain(PLATFORM_FUNCTIONS.iter().copied())
            .position(|f| f == name)
            .map(|index| 0x1000 + index * 0x10)
    }

    fn platform_extensions(&self, _device: &DeviceKey) -> String {
        self.config.platform_extensions.clone()
    }

    fn platform_entry_points(&self) -> Vec<&'static str> {
        PLATFORM_FUNCTIONS.to_vec()
    }
}

impl GlDriver for HeadlessDriver {
    fn get_error(&self, context: NativeHandle) -> u32 {
        let mut state = self.state.lock();
        state
            .contexts
            .get_mut(&context.0)
            .map_or(gl::NO_ERROR, |record| std::mem::replace(&mut record.error, gl::NO_ERROR))
    }

    fn get_string(&self, context: NativeHandle, name: u32) -> Option<String> {
        let mut state = self.state.lock();
        if name == gl::EXTENSIONS {
            state.stats.extension_queries += 1;
        }
        let record = state.contexts.get_mut(&context.0)?;
        match name {
            gl::VENDOR => Some("Headless".to_string()),
            gl::RENDERER => Some(if self.config.hardware { "headless accelerator" } else { "headless rasterizer" }.to_string()),
            gl::VERSION => {
                let profile = if record.options.is_core() { " (Core Profile)" } else { "" };
                Some(format!("{}.0 Headless{}", record.version, profile))
            }
            gl::EXTENSIONS if record.options.is_core() => {
                record.raise(gl::INVALID_ENUM);
                None
            }
            gl::EXTENSIONS => Some(self.config.gl_extensions.join(" ")),
            _ => {
                record.raise(gl::INVALID_ENUM);
                None
            }
        }
    }

    fn get_string_indexed(&self, context: NativeHandle, name: u32, index: u32) -> Option<String> {
        let mut state = self.state.lock();
        state.stats.extension_queries += 1;
        let record = state.contexts.get_mut(&context.0)?;
        match self.config.gl_extensions.get(index as usize) {
            Some(extension) if name == gl::EXTENSIONS => Some(extension.clone()),
            _ => {
                record.raise(gl::INVALID_VALUE);
                None
            }
        }
    }

    fn get_integer(&self, context: NativeHandle, pname: u32) -> i64 {
        let mut state = self.state.lock();
        if pname == gl::NUM_EXTENSIONS {
            state.stats.extension_queries += 1;
            return self.config.gl_extensions.len() as i64;
        }
        state.stats.binding_queries += 1;
        let Some(record) = state.contexts.get_mut(&context.0) else {
            return 0;
        };
        let target = record
            .bindings
            .keys()
            .copied()
            .find(|&target| binding_query_for(target) == Some(pname));
        target.and_then(|t| record.bindings.get(&t)).map_or(0, |&b| i64::from(b))
    }

    fn bind_buffer(&self, context: NativeHandle, target: u32, buffer: u32) {
        let mut state = self.state.lock();
        let Some((record, buffers)) = state.split(context) else {
            return;
        };
        record.bindings.insert(target, buffer);
        if buffer != 0 {
            buffers.entry(buffer).or_default();
        }
    }

    fn buffer_data(&self, context: NativeHandle, target: u32, size: i64, data: Option<&[u8]>, _usage: u32) {
        self.allocate(context, None, target, size, data, false);
    }

    fn named_buffer_data(&self, context: NativeHandle, buffer: u32, size: i64, data: Option<&[u8]>, _usage: u32) {
        self.allocate(context, Some(buffer), 0, size, data, false);
    }

    fn buffer_storage(&self, context: NativeHandle, target: u32, size: i64, data: Option<&[u8]>, _flags: u32) {
        self.allocate(context, None, target, size, data, true);
    }

    fn named_buffer_storage(&self, context: NativeHandle, buffer: u32, size: i64, data: Option<&[u8]>, _flags: u32) {
        self.allocate(context, Some(buffer), 0, size, data, true);
    }

    fn get_named_buffer_parameter(&self, context: NativeHandle, buffer: u32, pname: u32) -> i64 {
        let mut state = self.state.lock();
        state.stats.size_queries += 1;
        let Some((record, buffers)) = state.split(context) else {
            return 0;
        };
        if pname != gl::BUFFER_SIZE {
            record.raise(gl::INVALID_ENUM);
            return 0;
        }
        buffers.get(&buffer).map_or(0, |b| b.data.len() as i64)
    }

    fn map_buffer_range(&self, context: NativeHandle, target: u32, offset: i64, length: i64, _access: u32) -> usize {
        self.map(context, None, target, offset, length)
    }

    fn map_named_buffer_range(&self, context: NativeHandle, buffer: u32, offset: i64, length: i64, _access: u32) -> usize {
        self.map(context, Some(buffer), 0, offset, length)
    }

    fn unmap_buffer(&self, context: NativeHandle, target: u32) -> bool {
        self.unmap(context, None, target)
    }

    fn unmap_named_buffer(&self, context: NativeHandle, buffer: u32) -> bool {
        self.unmap(context, Some(buffer), 0)
    }

    fn delete_buffers(&self, context: NativeHandle, names: &[u32]) {
        let mut state = self.state.lock();
        let Some((record, buffers)) = state.split(context) else {
            return;
        };
        for name in names {
            buffers.remove(name);
        }
        for bound in record.bindings.values_mut() {
            if names.contains(bound) {
                *bound = 0;
            }
        }
    }

    fn push_client_attrib(&self, context: NativeHandle, _mask: u32) {
        if let Some(record) = self.state.lock().contexts.get_mut(&context.0) {
            let snapshot = record.bindings.clone();
            record.client_stack.push(snapshot);
        }
    }

    fn pop_client_attrib(&self, context: NativeHandle) {
        if let Some(record) = self.state.lock().contexts.get_mut(&context.0) {
            match record.client_stack.pop() {
                Some(bindings) => record.bindings = bindings,
                None => record.raise(gl::INVALID_OPERATION),
            }
        }
    }
}

#[derive(Debug, Default)]
struct SurfaceState {
    not_ready: bool,
    changed: bool,
    locked: bool,
    lock_count: usize,
}

/// A fake drawable.
#[derive(Debug)]
pub struct HeadlessSurface {
    device: DeviceKey,
    handle: u64,
    width: u32,
    height: u32,
    state: Mutex<SurfaceState>,
}

impl HeadlessSurface {
    pub fn new(device: impl Into<DeviceKey>, handle: u64, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            handle,
            width,
            height,
            state: Mutex::new(SurfaceState::default()),
        }
    }

    /// Make `lock_surface` report `NotReady` until set back.
    pub fn set_ready(&self, ready: bool) {
        self.state.lock().not_ready = !ready;
    }

    /// Report `Changed` on the next successful lock.
    pub fn mark_changed(&self) {
        self.state.lock().changed = true;
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn lock_count(&self) -> usize {
        self.state.lock().lock_count
    }
}

impl Surface for HeadlessSurface {
    fn device(&self) -> DeviceKey {
        self.device.clone()
    }

    fn lock_surface(&self) -> SurfaceLock {
        let mut state = self.state.lock();
        if state.not_ready {
            return SurfaceLock::NotReady;
        }
        state.locked = true;
        state.lock_count += 1;
        if std::mem::take(&mut state.changed) {
            SurfaceLock::Changed
        } else {
            SurfaceLock::Ready
        }
    }

    fn unlock_surface(&self) {
        self.state.lock().locked = false;
    }

    fn handle(&self) -> u64 {
        self.handle
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(version: Option<(GlVersion, ContextOptions)>) -> CreateRequest {
        CreateRequest {
            device: DeviceKey::new("headless:0"),
            surface: 1,
            share_with: None,
            version,
            debug: false,
        }
    }

    #[test]
    fn test_explicit_version_limits() {
        let driver = HeadlessDriver::new(HeadlessConfig::default().with_max_core(Some(GlVersion::new(3, 3))));
        let core = ContextOptions::PROFILE_CORE;
        assert!(driver.create_context(&request(Some((GlVersion::new(4, 0), core)))).is_none());
        let handle = driver.create_context(&request(Some((GlVersion::new(3, 3), core)))).unwrap();
        assert_eq!(driver.context_info(handle), Some((GlVersion::new(3, 3), core)));
        assert_eq!(driver.stats().create_attempts, 2);
    }

    #[test]
    fn test_forward_compatible_only() {
        let driver = HeadlessDriver::new(HeadlessConfig::default().with_forward_compatible_only(true));
        let v = GlVersion::new(4, 1);
        assert!(driver.create_context(&request(Some((v, ContextOptions::PROFILE_CORE)))).is_none());
        let fwd = ContextOptions::PROFILE_CORE | ContextOptions::FORWARD_COMPATIBLE;
        assert!(driver.create_context(&request(Some((v, fwd)))).is_some());
    }

    #[test]
    fn test_shared_contexts_share_buffers() {
        let driver = HeadlessDriver::default();
        let a = driver.create_context(&request(None)).unwrap();
        let b = driver
            .create_context(&CreateRequest {
                share_with: Some(a),
                ..request(None)
            })
            .unwrap();
        assert!(driver.shares_objects(a, b));

        driver.bind_buffer(a, gl::ARRAY_BUFFER, 3);
        driver.buffer_data(a, gl::ARRAY_BUFFER, 16, None, gl::STATIC_DRAW);
        assert_eq!(driver.get_named_buffer_parameter(b, 3, gl::BUFFER_SIZE), 16);
    }

    #[test]
    fn test_context_current_on_one_thread() {
        let driver = std::sync::Arc::new(HeadlessDriver::default());
        let handle = driver.create_context(&request(None)).unwrap();
        assert!(driver.make_current(handle, 1, 1));

        let other = driver.clone();
        assert!(!thread::spawn(move || other.make_current(handle, 1, 1)).join().unwrap());
        assert!(driver.release_current(handle));
        assert!(!driver.is_current_anywhere(handle));
    }

    #[test]
    fn test_core_profile_rejects_legacy_extension_string() {
        let driver = HeadlessDriver::default();
        let handle = driver
            .create_context(&request(Some((GlVersion::new(4, 5), ContextOptions::PROFILE_CORE))))
            .unwrap();
        assert_eq!(driver.get_string(handle, gl::EXTENSIONS), None);
        assert_eq!(driver.get_error(handle), gl::INVALID_ENUM);
        assert_eq!(driver.get_error(handle), gl::NO_ERROR);
        assert_eq!(
            driver.get_string_indexed(handle, gl::EXTENSIONS, 0).as_deref(),
            Some("GL_ARB_buffer_storage")
        );
    }

    #[test]
    fn test_client_attrib_stack_restores_bindings() {
        let driver = HeadlessDriver::default();
        let handle = driver.create_bare_context();
        driver.bind_buffer(handle, gl::ARRAY_BUFFER, 1);
        driver.push_client_attrib(handle, gl::CLIENT_VERTEX_ARRAY_BIT);
        driver.bind_buffer(handle, gl::ARRAY_BUFFER, 2);
        driver.pop_client_attrib(handle);
        assert_eq!(driver.get_integer(handle, gl::ARRAY_BUFFER_BINDING), 1);
    }

    #[test]
    fn test_destroy_last_context_drops_buffers() {
        let driver = HeadlessDriver::default();
        let handle = driver.create_bare_context();
        driver.bind_buffer(handle, gl::ARRAY_BUFFER, 4);
        assert!(driver.destroy_context(handle));
        assert!(!driver.destroy_context(handle));
        assert_eq!(driver.live_contexts(), 0);
        assert_eq!(driver.buffer_contents(handle, 4), None);
    }

    #[test]
    fn test_surface_lock_states() {
        let surface = HeadlessSurface::new("headless:0", 1, 64, 64);
        assert_eq!(surface.lock_surface(), SurfaceLock::Ready);
        surface.unlock_surface();

        surface.mark_changed();
        assert_eq!(surface.lock_surface(), SurfaceLock::Changed);
        surface.unlock_surface();

        surface.set_ready(false);
        assert_eq!(surface.lock_surface(), SurfaceLock::NotReady);
        assert!(!surface.is_locked());
        assert_eq!(surface.lock_count(), 2);
    }
}
