//! The context state machine.
//!
//! A [`Context`] starts out inert (no native handle). The first successful
//! [`make_current`](Context::make_current) negotiates a version, creates the
//! native context and installs the family's proc table and extension cache;
//! later calls only switch the native context onto the calling thread.
//! [`release`](Context::release) reverses that and
//! [`destroy`](Context::destroy) frees the native handle and every cache.
//!
//! Ownership is enforced in two layers. The inner [`ContextLock`] is not
//! re-entrant and rejects a same-thread relock. Above it, `make_current`
//! checks the thread's current-context marker and returns
//! [`MakeCurrent::Current`] without touching the lock when the context is
//! already current here.
//!
//! GL buffer commands go through the wrappers on `Context` so the binding,
//! size and storage trackers never miss a mutation.

use crate::buffer_object::{BufferObjectTracker, BufferRef, BufferStorage, MapRequest, StorageKind, StorageRequest};
use crate::buffer_size::BufferSizeTracker;
use crate::buffer_state::BufferStateTracker;
use crate::current;
use crate::extensions::{ExtensionAvailabilityCache, ExtensionProbe};
use crate::gl;
use crate::lock::ContextLock;
use crate::native::{CreateRequest, GlDriver, NativeDriver, NativeHandle, Surface, SurfaceLock};
use crate::proc_table::{resolve_with_suffixes, ProcAddressTable};
use crate::registry::ContextRegistry;
use crate::share_set::{synchronize_buffer_object_sharing, SharedContext};
use crate::version::{ContextFamilyKey, ContextOptions, ContextRequest, DeviceKey, GlVersion};
use common::{thread_label, GlError, GlResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Context`], stable across destroy/reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Outcome of [`Context::make_current`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MakeCurrent {
    /// The surface was not ready or the driver refused; nothing changed.
    NotCurrent,
    /// Current on the calling thread, reusing the existing native context.
    Current,
    /// Current on the calling thread with a freshly created native context.
    CurrentNew,
}

impl MakeCurrent {
    pub fn is_current(self) -> bool {
        !matches!(self, MakeCurrent::NotCurrent)
    }
}

/// Lifecycle phase of the native handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContextPhase {
    /// Never created, or reset after destruction.
    Inert,
    Created,
    /// Destroyed; must be [`reset`](Context::reset) before reuse.
    Destroyed,
}

struct ContextState {
    handle: NativeHandle,
    phase: ContextPhase,
    draw: Option<Arc<dyn Surface>>,
    read: Option<Arc<dyn Surface>>,
    /// Surface locked by the current `make_current`, unlocked on release.
    locked: Option<Arc<dyn Surface>>,
    version: Option<GlVersion>,
    options: ContextOptions,
    family: Option<ContextFamilyKey>,
    extensions: Option<Arc<ExtensionAvailabilityCache>>,
    procs: Option<Arc<ProcAddressTable>>,
    sizes: Option<Arc<BufferSizeTracker>>,
}

impl ContextState {
    fn clear_caches(&mut self) {
        self.locked = None;
        self.version = None;
        self.options = ContextOptions::empty();
        self.family = None;
        self.extensions = None;
        self.procs = None;
        self.sizes = None;
    }
}

struct ContextInner {
    id: ContextId,
    device: DeviceKey,
    request: ContextRequest,
    registry: Arc<ContextRegistry>,
    driver: Arc<dyn NativeDriver>,
    lock: ContextLock,
    bindings: BufferStateTracker,
    objects: BufferObjectTracker,
    state: RwLock<ContextState>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let handle = self.state.get_mut().handle;
        if !handle.is_null() {
            tracing::warn!(context = %self.id, %handle, "context dropped without destroy; destroying native handle");
            self.driver.destroy_context(handle);
        }
    }
}

/// Unlocks the surface and then the context lock on drop, unless disarmed.
struct Unlocker<'a> {
    lock: &'a ContextLock,
    surface: Option<Arc<dyn Surface>>,
    armed: bool,
}

impl<'a> Unlocker<'a> {
    fn new(lock: &'a ContextLock, surface: Option<Arc<dyn Surface>>) -> Self {
        Self {
            lock,
            surface,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Unlocker<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(surface) = self.surface.take() {
            surface.unlock_surface();
        }
        if let Err(err) = self.lock.unlock() {
            tracing::error!(error = %err, "failed to unlock context lock");
        }
    }
}

/// A GL context handle. Clones refer to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// An inert context on `device`. Nothing native happens until `make_current`.
    pub fn new(
        registry: Arc<ContextRegistry>,
        driver: Arc<dyn NativeDriver>,
        device: impl Into<DeviceKey>,
        request: ContextRequest,
    ) -> Self {
        let fail_fast = registry.default_fail_fast();
        Self {
            inner: Arc::new(ContextInner {
                id: ContextId(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
                device: device.into(),
                request,
                registry,
                driver,
                lock: ContextLock::new(fail_fast),
                bindings: BufferStateTracker::new(),
                objects: BufferObjectTracker::new(),
                state: RwLock::new(ContextState {
                    handle: NativeHandle::NULL,
                    phase: ContextPhase::Inert,
                    draw: None,
                    read: None,
                    locked: None,
                    version: None,
                    options: ContextOptions::empty(),
                    family: None,
                    extensions: None,
                    procs: None,
                    sizes: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn device(&self) -> &DeviceKey {
        &self.inner.device
    }

    pub fn request(&self) -> ContextRequest {
        self.inner.request
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.inner.registry
    }

    pub fn driver(&self) -> &Arc<dyn NativeDriver> {
        &self.inner.driver
    }

    /// Native handle; null unless created.
    pub fn native_handle(&self) -> NativeHandle {
        self.inner.state.read().handle
    }

    pub fn phase(&self) -> ContextPhase {
        self.inner.state.read().phase
    }

    pub fn is_created(&self) -> bool {
        self.phase() == ContextPhase::Created
    }

    /// Whether this context is current on the calling thread.
    pub fn is_current(&self) -> bool {
        current::is_current(self)
    }

    pub fn gl_version(&self) -> Option<GlVersion> {
        self.inner.state.read().version
    }

    pub fn options(&self) -> ContextOptions {
        self.inner.state.read().options
    }

    pub fn family_key(&self) -> Option<ContextFamilyKey> {
        self.inner.state.read().family.clone()
    }

    pub fn extension_cache(&self) -> Option<Arc<ExtensionAvailabilityCache>> {
        self.inner.state.read().extensions.clone()
    }

    pub fn proc_table(&self) -> Option<Arc<ProcAddressTable>> {
        self.inner.state.read().procs.clone()
    }

    /// Size tracker shared with the share group; `None` until created.
    pub fn buffer_size_tracker(&self) -> Option<Arc<BufferSizeTracker>> {
        self.inner.state.read().sizes.clone()
    }

    pub(crate) fn set_buffer_size_tracker(&self, tracker: Option<Arc<BufferSizeTracker>>) {
        self.inner.state.write().sizes = tracker;
    }

    pub fn set_fail_fast(&self, enabled: bool) {
        self.inner.lock.set_fail_fast(enabled);
    }

    pub fn is_fail_fast(&self) -> bool {
        self.inner.lock.is_fail_fast()
    }

    /// Whether any thread owns the context lock.
    pub fn is_locked(&self) -> bool {
        self.inner.lock.is_held()
    }

    pub fn lock_owner(&self) -> Option<String> {
        self.inner.lock.owner_name()
    }

    pub fn has_waiting_threads(&self) -> bool {
        self.inner.lock.has_waiting_threads()
    }

    /// Threads parked on the context lock.
    pub fn waiting_threads(&self) -> usize {
        self.inner.lock.waiting_threads()
    }

    /// Set the draw surface (also the read surface unless one is set).
    ///
    /// Not allowed while the context is current on the calling thread.
    pub fn set_surface(&self, surface: Arc<dyn Surface>) -> GlResult<()> {
        self.with_lock_idle(|state| state.draw = Some(surface))
    }

    pub fn set_read_surface(&self, surface: Arc<dyn Surface>) -> GlResult<()> {
        self.with_lock_idle(|state| state.read = Some(surface))
    }

    fn with_lock_idle(&self, update: impl FnOnce(&mut ContextState)) -> GlResult<()> {
        if self.inner.lock.is_owned_by_current_thread() {
            return Err(GlError::illegal_state(format!(
                "{} is current on this thread; release it before changing surfaces",
                self.id()
            )));
        }
        self.inner.lock.lock()?;
        update(&mut self.inner.state.write());
        self.inner.lock.unlock()
    }

    /// Share server-side objects with `other`. Must precede this context's creation.
    pub fn share_with(&self, other: &Context) -> GlResult<()> {
        if !Arc::ptr_eq(&self.inner.registry, &other.inner.registry) {
            return Err(GlError::illegal_state("contexts from different registries cannot share"));
        }
        if self.is_created() {
            return Err(GlError::illegal_state(format!(
                "{} is already created; sharing must be set up before creation",
                self.id()
            )));
        }
        self.inner.registry.share_set().register_sharing(self, other);
        Ok(())
    }

    /// Make this context current on the calling thread, creating it if needed.
    ///
    /// A context already current on this thread short-circuits to
    /// [`MakeCurrent::Current`]. Another context current on this thread is
    /// released first. Lock contention and misuse are errors; a surface that
    /// is not ready or a driver refusal come back as [`MakeCurrent::NotCurrent`]
    /// with the lock and surface left as they were.
    pub fn make_current(&self) -> GlResult<MakeCurrent> {
        if let Some(previous) = current::current_context() {
            if previous == *self {
                return Ok(MakeCurrent::Current);
            }
            tracing::trace!(previous = %previous.id(), next = %self.id(), "implicit release");
            previous.release()?;
        }
        if self.phase() == ContextPhase::Destroyed {
            return Err(GlError::illegal_state(format!(
                "{} is destroyed; reset it before reuse",
                self.id()
            )));
        }

        let inner = &*self.inner;
        inner.lock.lock()?;
        let mut unlocker = Unlocker::new(&inner.lock, None);

        let (phase, handle, draw, read) = {
            let state = inner.state.read();
            (state.phase, state.handle, state.draw.clone(), state.read.clone())
        };
        if phase == ContextPhase::Destroyed {
            return Err(GlError::illegal_state(format!(
                "{} was destroyed while waiting for its lock; reset it before reuse",
                inner.id
            )));
        }
        if let Some(surface) = &draw {
            match surface.lock_surface() {
                SurfaceLock::NotReady => {
                    tracing::debug!(context = %inner.id, "surface not ready");
                    return Ok(MakeCurrent::NotCurrent);
                }
                SurfaceLock::Changed => tracing::debug!(context = %inner.id, "surface changed since last lock"),
                SurfaceLock::Ready => {}
            }
            unlocker.surface = Some(surface.clone());
        }
        let draw_handle = draw.as_ref().map_or(0, |surface| surface.handle());
        let read_handle = read.as_ref().map_or(draw_handle, |surface| surface.handle());

        let outcome = if handle.is_null() {
            if self.create_native(draw_handle, read_handle)? {
                MakeCurrent::CurrentNew
            } else {
                MakeCurrent::NotCurrent
            }
        } else if inner.driver.make_current(handle, draw_handle, read_handle) {
            MakeCurrent::Current
        } else {
            tracing::warn!(context = %inner.id, %handle, "native make current failed");
            MakeCurrent::NotCurrent
        };
        if outcome == MakeCurrent::NotCurrent {
            return Ok(outcome);
        }

        inner.state.write().locked = unlocker.surface.clone();
        unlocker.disarm();
        current::set_current(Some(self.clone()));
        Ok(outcome)
    }

    /// Negotiate, create and make current. `Ok(false)` when the driver refused.
    fn create_native(&self, draw: u64, read: u64) -> GlResult<bool> {
        let inner = &*self.inner;
        let registry = &inner.registry;
        let driver = &inner.driver;
        let debug = inner.request.debug;

        let peer = registry.share_set().share_context_for(self);
        let share_with = peer.as_ref().map(Context::native_handle).filter(|h| !h.is_null());
        let base = CreateRequest {
            device: inner.device.clone(),
            surface: draw,
            share_with,
            version: None,
            debug,
        };

        let explicit =
            registry.explicit_version_support(&inner.device, || driver.supports_explicit_version(&inner.device));
        let created = if explicit {
            registry
                .create_negotiated(&inner.device, &inner.request, |candidate| {
                    driver.create_context(&CreateRequest {
                        version: Some((candidate.version, candidate.options)),
                        ..base.clone()
                    })
                })
                .map(|(handle, negotiated)| (handle, Some(negotiated)))
        } else {
            driver.create_context(&base).map(|handle| (handle, None))
        };
        let Some((handle, negotiated)) = created else {
            tracing::warn!(context = %inner.id, device = %inner.device, "native context creation failed");
            return Ok(false);
        };

        if !driver.make_current(handle, draw, read) {
            tracing::warn!(context = %inner.id, %handle, "new context could not be made current");
            driver.destroy_context(handle);
            return Ok(false);
        }

        let (version, mut options) = match negotiated {
            Some(negotiated) => (negotiated.version, negotiated.options),
            None => {
                let reported = driver.get_string(handle, gl::VERSION).unwrap_or_default();
                let Some(version) = GlVersion::parse(&reported) else {
                    tracing::warn!(context = %inner.id, reported = %reported, "unparsable GL_VERSION");
                    driver.release_current(handle);
                    driver.destroy_context(handle);
                    return Ok(false);
                };
                let profile = if reported.contains("Core Profile") {
                    ContextOptions::PROFILE_CORE
                } else {
                    ContextOptions::PROFILE_COMPAT
                };
                (version, profile)
            }
        };
        if debug {
            options |= ContextOptions::DEBUG;
        }
        if driver.is_hardware_accelerated(handle) {
            options |= ContextOptions::HARDWARE;
        }

        let family = ContextFamilyKey::new(inner.device.clone(), version, options);
        let procs = registry.proc_table(&family, || ProcAddressTable::build(family.clone(), driver.as_platform()));
        let extensions = registry.extension_cache(&family);
        if !extensions.is_initialized() {
            extensions.populate(ExtensionProbe {
                driver: driver.as_ref(),
                context: handle,
                indexed_query: procs.address("glGetStringi").is_some(),
            });
        }

        {
            let mut state = inner.state.write();
            state.handle = handle;
            state.phase = ContextPhase::Created;
            state.version = Some(version);
            state.options = options;
            state.family = Some(family.clone());
            state.extensions = Some(extensions);
            state.procs = Some(procs);
        }
        if let Err(err) = registry.share_set().context_created(self) {
            driver.release_current(handle);
            driver.destroy_context(handle);
            let mut state = inner.state.write();
            state.handle = NativeHandle::NULL;
            state.phase = ContextPhase::Inert;
            state.clear_caches();
            return Err(err);
        }
        synchronize_buffer_object_sharing(peer.as_ref(), self);

        tracing::info!(context = %inner.id, %handle, %family, shared = peer.is_some(), "context created");
        Ok(true)
    }

    /// Release the context from the calling thread, which must hold its lock.
    pub fn release(&self) -> GlResult<()> {
        let inner = &*self.inner;
        if !inner.lock.is_owned_by_current_thread() {
            return Err(GlError::NotOwner {
                owner: inner.lock.owner_name().unwrap_or_else(|| "nobody".to_string()),
                caller: thread_label(),
            });
        }

        let (handle, surface) = {
            let mut state = inner.state.write();
            (state.handle, state.locked.take())
        };
        let _unlocker = Unlocker::new(&inner.lock, surface);
        if current::is_current(self) {
            current::set_current(None);
        }
        if !handle.is_null() && !inner.driver.release_current(handle) {
            tracing::warn!(context = %inner.id, %handle, "native release failed");
        }
        Ok(())
    }

    /// Destroy the native context and drop every cache.
    ///
    /// Waits for the lock even in fail-fast mode. Destroying a destroyed
    /// context is a no-op. The share group is unregistered once its last
    /// created member is gone.
    pub fn destroy(&self) -> GlResult<()> {
        if current::is_current(self) {
            self.release()?;
        }
        if self.phase() == ContextPhase::Destroyed {
            tracing::debug!(context = %self.id(), "already destroyed");
            return Ok(());
        }

        let inner = &*self.inner;
        inner.lock.lock_blocking()?;
        let mut unlocker = Unlocker::new(&inner.lock, None);
        let (handle, was_created, draw) = {
            let state = inner.state.read();
            (state.handle, state.phase == ContextPhase::Created, state.draw.clone())
        };
        if let Some(surface) = draw {
            if surface.lock_surface().is_locked() {
                unlocker.surface = Some(surface);
            } else {
                tracing::debug!(context = %inner.id, "destroying without a ready surface");
            }
        }

        if !handle.is_null() && !inner.driver.destroy_context(handle) {
            tracing::warn!(context = %inner.id, %handle, "native destroy failed");
        }
        {
            let mut state = inner.state.write();
            state.handle = NativeHandle::NULL;
            state.phase = ContextPhase::Destroyed;
        }

        let share_set = inner.registry.share_set();
        let mut result = Ok(());
        if was_created && share_set.is_shared(self) {
            if let Err(err) = share_set.context_destroyed(self) {
                result = Err(err);
            }
        }
        let peers_alive = share_set.has_created_shared_left(self);
        if !peers_alive {
            inner.objects.clear();
            if share_set.is_shared(self) {
                if let Err(err) = share_set.unregister_sharing(self) {
                    result = result.and(Err(err));
                }
            }
        }
        inner.bindings.clear();
        inner.state.write().clear_caches();
        drop(unlocker);

        tracing::info!(context = %inner.id, %handle, peers_alive, "context destroyed");
        result
    }

    /// Turn a destroyed context back into an inert one.
    pub fn reset(&self) -> GlResult<()> {
        let mut state = self.inner.state.write();
        match state.phase {
            ContextPhase::Destroyed => {
                state.phase = ContextPhase::Inert;
                Ok(())
            }
            ContextPhase::Inert => Ok(()),
            ContextPhase::Created => Err(GlError::illegal_state(format!(
                "{} is live; destroy it before reset",
                self.inner.id
            ))),
        }
    }

    /// Whether the context family supports `name`, an extension or a
    /// `GL_VERSION_M_N` token. Always `false` before creation.
    ///
    /// A flushed cache is only repopulated on the thread the context is
    /// current on; elsewhere the answer is `false` until then.
    pub fn is_extension_available(&self, name: &str) -> bool {
        let (handle, extensions, procs) = {
            let state = self.inner.state.read();
            (state.handle, state.extensions.clone(), state.procs.clone())
        };
        let Some(extensions) = extensions else {
            return false;
        };
        if !extensions.is_initialized() && !current::is_current(self) {
            return extensions.contains(name);
        }
        let probe = ExtensionProbe {
            driver: self.inner.driver.as_ref(),
            context: handle,
            indexed_query: procs.is_some_and(|procs| procs.address("glGetStringi").is_some()),
        };
        extensions.is_extension_available(probe, name)
    }

    /// Proc table, then platform table, then a live lookup with vendor suffixes.
    pub fn is_function_available(&self, name: &str) -> bool {
        let backend = self.inner.driver.as_platform();
        match self.proc_table() {
            Some(procs) => procs.is_function_available(backend, name),
            None => resolve_with_suffixes(backend, name).is_some(),
        }
    }

    fn current_handle(&self) -> GlResult<NativeHandle> {
        if !current::is_current(self) {
            return Err(GlError::not_current(thread_label()));
        }
        Ok(self.native_handle())
    }

    fn gl(&self) -> &dyn GlDriver {
        self.inner.driver.as_gl()
    }

    /// With debugging enabled, report any error flag a command left behind.
    fn debug_check(&self, handle: NativeHandle, call: &'static str) {
        if !self.inner.registry.config().debug {
            return;
        }
        let code = self.gl().get_error(handle);
        if code != gl::NO_ERROR {
            tracing::warn!(context = %self.id(), call, code, "GL error");
        }
    }

    fn record_size(&self, storage: &BufferStorage) {
        if let Some(sizes) = self.buffer_size_tracker() {
            sizes.set_size(storage.name(), storage.size());
        }
    }

    pub fn bind_buffer(&self, target: u32, buffer: u32) -> GlResult<()> {
        let handle = self.current_handle()?;
        self.gl().bind_buffer(handle, target, buffer);
        self.inner.bindings.set_bound(target, buffer);
        self.debug_check(handle, "glBindBuffer");
        Ok(())
    }

    fn create_storage(&self, request: StorageRequest<'_>) -> GlResult<BufferStorage> {
        let handle = self.current_handle()?;
        let storage = self
            .inner
            .objects
            .create_storage(self.gl(), handle, &self.inner.bindings, request)?;
        self.record_size(&storage);
        Ok(storage)
    }

    /// `glBufferData` on the buffer bound to `target`.
    pub fn buffer_data(&self, target: u32, size: i64, data: Option<&[u8]>, usage: u32) -> GlResult<BufferStorage> {
        self.create_storage(StorageRequest {
            buffer: BufferRef::Target(target),
            size,
            data,
            kind: StorageKind::Mutable { usage },
        })
    }

    pub fn named_buffer_data(&self, buffer: u32, size: i64, data: Option<&[u8]>, usage: u32) -> GlResult<BufferStorage> {
        self.create_storage(StorageRequest {
            buffer: BufferRef::Named(buffer),
            size,
            data,
            kind: StorageKind::Mutable { usage },
        })
    }

    /// `glBufferStorage`: immutable storage on the buffer bound to `target`.
    pub fn buffer_storage(&self, target: u32, size: i64, data: Option<&[u8]>, flags: u32) -> GlResult<BufferStorage> {
        self.create_storage(StorageRequest {
            buffer: BufferRef::Target(target),
            size,
            data,
            kind: StorageKind::Immutable { flags },
        })
    }

    pub fn named_buffer_storage(&self, buffer: u32, size: i64, data: Option<&[u8]>, flags: u32) -> GlResult<BufferStorage> {
        self.create_storage(StorageRequest {
            buffer: BufferRef::Named(buffer),
            size,
            data,
            kind: StorageKind::Immutable { flags },
        })
    }

    fn map_storage(&self, buffer: BufferRef, request: MapRequest) -> GlResult<BufferStorage> {
        let handle = self.current_handle()?;
        self.inner
            .objects
            .map_storage(self.gl(), handle, &self.inner.bindings, buffer, request)
    }

    /// Map the whole store bound to `target`. Check
    /// [`BufferStorage::is_mapped`]: a driver refusal is not an error.
    pub fn map_buffer(&self, target: u32, access: u32) -> GlResult<BufferStorage> {
        self.map_storage(BufferRef::Target(target), MapRequest::Whole { access })
    }

    pub fn map_buffer_range(&self, target: u32, offset: i64, length: i64, access: u32) -> GlResult<BufferStorage> {
        self.map_storage(BufferRef::Target(target), MapRequest::Range { offset, length, access })
    }

    pub fn map_named_buffer_range(&self, buffer: u32, offset: i64, length: i64, access: u32) -> GlResult<BufferStorage> {
        self.map_storage(BufferRef::Named(buffer), MapRequest::Range { offset, length, access })
    }

    pub fn unmap_buffer(&self, target: u32) -> GlResult<bool> {
        let handle = self.current_handle()?;
        self.inner
            .objects
            .unmap_storage(self.gl(), handle, &self.inner.bindings, BufferRef::Target(target))
    }

    pub fn unmap_named_buffer(&self, buffer: u32) -> GlResult<bool> {
        let handle = self.current_handle()?;
        self.inner
            .objects
            .unmap_storage(self.gl(), handle, &self.inner.bindings, BufferRef::Named(buffer))
    }

    pub fn delete_buffers(&self, buffers: &[u32]) -> GlResult<()> {
        let handle = self.current_handle()?;
        self.gl().delete_buffers(handle, buffers);
        self.inner.bindings.notify_deleted(buffers);
        self.inner.objects.notify_deleted(buffers);
        if let Some(sizes) = self.buffer_size_tracker() {
            sizes.remove(buffers);
        }
        self.debug_check(handle, "glDeleteBuffers");
        Ok(())
    }

    /// Buffer bound to `target`, from the binding cache.
    pub fn bound_buffer(&self, target: u32) -> GlResult<u32> {
        let handle = self.current_handle()?;
        self.inner.bindings.get_bound(self.gl(), handle, target)
    }

    /// Size of the buffer bound to `target`; 0 when nothing is bound.
    pub fn bound_buffer_size(&self, target: u32) -> GlResult<u64> {
        let handle = self.current_handle()?;
        let sizes = self
            .buffer_size_tracker()
            .ok_or_else(|| GlError::illegal_state(format!("{} has no buffer size tracker", self.id())))?;
        sizes.get_bound_size(self.gl(), handle, &self.inner.bindings, target)
    }

    /// Tracked storage of buffer `name`.
    pub fn buffer_storage_of(&self, name: u32) -> Option<BufferStorage> {
        self.inner.objects.get_storage(name)
    }

    pub fn push_client_attrib(&self, mask: u32) -> GlResult<()> {
        let handle = self.current_handle()?;
        self.gl().push_client_attrib(handle, mask);
        self.debug_check(handle, "glPushClientAttrib");
        Ok(())
    }

    /// Pops the client attribute stack and forgets every cached binding.
    pub fn pop_client_attrib(&self) -> GlResult<()> {
        let handle = self.current_handle()?;
        self.gl().pop_client_attrib(handle);
        self.inner.bindings.clear();
        self.debug_check(handle, "glPopClientAttrib");
        Ok(())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device)
            .field("handle", &state.handle)
            .field("phase", &state.phase)
            .field("version", &state.version)
            .finish()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.id)
    }
}

impl SharedContext for Context {
    type Id = ContextId;

    fn context_id(&self) -> ContextId {
        self.inner.id
    }

    fn is_created(&self) -> bool {
        Context::is_created(self)
    }
}
