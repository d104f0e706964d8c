//! One shared resource per device connection, created on a dedicated thread.
//!
//! Callers talk to the runner thread through a ready/command/done handshake:
//! wait until the runner is idle, post a command, then wait until the runner
//! has completed it. Commands carry a ticket so concurrent callers each wait
//! for their own command. A device whose creation failed is remembered and
//! not retried until its failure is released.

use crate::error::{panic_message, WorkerError};
use glcontext::{Context, ContextOptions, ContextRegistry, ContextRequest, DeviceKey, GlVersion, MakeCurrent, NativeDriver};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Creates and tears down the resource kept per device.
pub trait SharedResourceFactory: Send + Sync + 'static {
    type Resource: Clone + Send + Sync + 'static;

    /// Called on the runner thread. `None` marks the device as failed.
    fn create(&self, device: &DeviceKey) -> Option<Self::Resource>;

    /// Called on the runner thread.
    fn release(&self, device: &DeviceKey, resource: Self::Resource);
}

#[derive(Debug)]
enum Command {
    Create(DeviceKey),
    Release(DeviceKey),
}

struct RunnerState<R> {
    starting: bool,
    running: bool,
    /// Idle and able to take a command.
    ready: bool,
    shutdown: bool,
    released: bool,
    command: Option<(u64, Command)>,
    next_ticket: u64,
    completed: u64,
    resources: HashMap<DeviceKey, R>,
    failed: HashSet<DeviceKey>,
    handle: Option<JoinHandle<()>>,
}

impl<R> Default for RunnerState<R> {
    fn default() -> Self {
        Self {
            starting: false,
            running: false,
            ready: false,
            shutdown: false,
            released: false,
            command: None,
            next_ticket: 0,
            completed: 0,
            resources: HashMap::new(),
            failed: HashSet::new(),
            handle: None,
        }
    }
}

struct RunnerShared<F: SharedResourceFactory> {
    factory: F,
    state: Mutex<RunnerState<F::Resource>>,
    changed: Condvar,
}

/// Lazily creates one `F::Resource` per device on a dedicated thread.
pub struct SharedResourceRunner<F: SharedResourceFactory> {
    shared: Arc<RunnerShared<F>>,
    name: String,
}

impl<F: SharedResourceFactory> SharedResourceRunner<F> {
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                factory,
                state: Mutex::new(RunnerState::default()),
                changed: Condvar::new(),
            }),
            name: name.into(),
        }
    }

    pub fn factory(&self) -> &F {
        &self.shared.factory
    }

    /// Spawn the runner thread if needed and wait until it is ready.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock();
        while state.running && state.shutdown {
            self.shared.changed.wait(&mut state);
        }
        if state.running {
            return Ok(());
        }
        if !state.starting {
            state.starting = true;
            state.shutdown = false;
            state.released = false;
            state.failed.clear();
            let shared = self.shared.clone();
            let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || shared.run());
            match spawned {
                Ok(handle) => state.handle = Some(handle),
                Err(err) => {
                    state.starting = false;
                    return Err(WorkerError::Spawn(err.to_string()));
                }
            }
        }
        while !state.running {
            self.shared.changed.wait(&mut state);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        let state = self.shared.state.lock();
        state.running && !state.shutdown
    }

    /// Whether the last shutdown released every resource.
    pub fn is_released(&self) -> bool {
        self.shared.state.lock().released
    }

    /// Cached resource of `device`, without creating one.
    pub fn get_shared(&self, device: &DeviceKey) -> Option<F::Resource> {
        self.shared.state.lock().resources.get(device).cloned()
    }

    pub fn has_failed(&self, device: &DeviceKey) -> bool {
        self.shared.state.lock().failed.contains(device)
    }

    /// Number of cached resources.
    pub fn len(&self) -> usize {
        self.shared.state.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The resource of `device`, created on the runner thread on first use.
    ///
    /// Returns `Ok(None)` if creation failed now or earlier.
    pub fn get_or_create_shared(&self, device: &DeviceKey) -> Result<Option<F::Resource>, WorkerError> {
        {
            let state = self.shared.state.lock();
            if let Some(resource) = state.resources.get(device) {
                return Ok(Some(resource.clone()));
            }
            if state.failed.contains(device) {
                return Ok(None);
            }
        }
        self.start()?;
        self.do_and_wait(Command::Create(device.clone()))?;
        Ok(self.get_shared(device))
    }

    /// Release the resource of `device` on the runner thread.
    ///
    /// Also forgets a recorded failure so the next request retries.
    /// Returns whether a resource was released.
    pub fn release_shared(&self, device: &DeviceKey) -> Result<bool, WorkerError> {
        {
            let mut state = self.shared.state.lock();
            if state.failed.remove(device) {
                return Ok(false);
            }
            if !state.resources.contains_key(device) {
                return Ok(false);
            }
        }
        self.do_and_wait(Command::Release(device.clone()))?;
        Ok(true)
    }

    /// Release every cached resource, stop the runner and join it.
    pub fn release_and_wait(&self) -> Result<(), WorkerError> {
        let handle = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return Ok(());
            }
            state.shutdown = true;
            self.shared.changed.notify_all();
            while !state.released || state.running {
                self.shared.changed.wait(&mut state);
            }
            state.handle.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(runner = %self.name, "shared resource runner panicked");
            }
        }
        Ok(())
    }

    fn do_and_wait(&self, command: Command) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock();
        while state.running && !state.shutdown && (!state.ready || state.command.is_some()) {
            self.shared.changed.wait(&mut state);
        }
        if !state.running || state.shutdown {
            return Err(WorkerError::NotRunning);
        }
        state.next_ticket += 1;
        let ticket = state.next_ticket;
        tracing::trace!(runner = %self.name, ?command, ticket, "posting command");
        state.command = Some((ticket, command));
        self.shared.changed.notify_all();
        while state.completed < ticket && state.running {
            self.shared.changed.wait(&mut state);
        }
        if state.completed < ticket {
            return Err(WorkerError::NotRunning);
        }
        Ok(())
    }
}

impl<F: SharedResourceFactory> RunnerShared<F> {
    /// A panicking factory counts as a failed creation.
    fn create_resource(&self, device: &DeviceKey) -> Option<F::Resource> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.factory.create(device))) {
            Ok(resource) => resource,
            Err(payload) => {
                tracing::error!(%device, panic = %panic_message(payload.as_ref()), "shared resource factory panicked");
                None
            }
        }
    }

    fn release_resource(&self, device: &DeviceKey, resource: F::Resource) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.factory.release(device, resource))) {
            tracing::error!(%device, panic = %panic_message(payload.as_ref()), "shared resource release panicked");
        }
    }

    fn run(&self) {
        let mut state = self.state.lock();
        state.running = true;
        state.starting = false;
        state.ready = true;
        self.changed.notify_all();

        loop {
            while state.command.is_none() && !state.shutdown {
                self.changed.wait(&mut state);
            }
            let Some((ticket, command)) = state.command.take() else {
                break;
            };
            state.ready = false;
            // A concurrent caller may have asked for the same device first.
            let settled = match &command {
                Command::Create(device) => state.resources.contains_key(device) || state.failed.contains(device),
                Command::Release(_) => false,
            };
            drop(state);

            let created = match &command {
                Command::Create(device) if !settled => Some((device.clone(), self.create_resource(device))),
                _ => None,
            };

            state = self.state.lock();
            match (command, created) {
                (_, Some((device, Some(resource)))) => {
                    tracing::debug!(%device, "created shared resource");
                    state.resources.insert(device, resource);
                }
                (_, Some((device, None))) => {
                    tracing::warn!(%device, "shared resource creation failed");
                    state.failed.insert(device);
                }
                (Command::Release(device), None) => {
                    let removed = state.resources.remove(&device);
                    if let Some(resource) = removed {
                        drop(state);
                        self.release_resource(&device, resource);
                        tracing::debug!(%device, "released shared resource");
                        state = self.state.lock();
                    }
                }
                (Command::Create(_), None) => {}
            }
            state.completed = ticket;
            state.ready = true;
            self.changed.notify_all();
        }

        state.ready = false;
        let resources: Vec<_> = state.resources.drain().collect();
        drop(state);
        let count = resources.len();
        for (device, resource) in resources {
            self.release_resource(&device, resource);
        }
        tracing::debug!(count, "released all shared resources");

        let mut state = self.state.lock();
        state.released = true;
        state.running = false;
        self.changed.notify_all();
    }
}

/// What a shared per-device context learned about its device.
#[derive(Clone, Debug)]
pub struct SharedDeviceContext {
    pub context: Context,
    pub version: GlVersion,
    pub options: ContextOptions,
    pub gl_extension_count: usize,
    pub platform_extension_count: usize,
}

/// Creates one headless-surface shared context per device.
///
/// Creation makes the context current once on the runner thread so that
/// version negotiation and the family caches are settled before any client
/// context is created on the device.
pub struct SharedContextFactory {
    registry: Arc<ContextRegistry>,
    driver: Arc<dyn NativeDriver>,
    request: ContextRequest,
}

impl SharedContextFactory {
    pub fn new(registry: Arc<ContextRegistry>, driver: Arc<dyn NativeDriver>, request: ContextRequest) -> Self {
        Self {
            registry,
            driver,
            request,
        }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }
}

impl SharedResourceFactory for SharedContextFactory {
    type Resource = SharedDeviceContext;

    fn create(&self, device: &DeviceKey) -> Option<SharedDeviceContext> {
        let context = Context::new(self.registry.clone(), self.driver.clone(), device.clone(), self.request);
        match context.make_current() {
            Ok(MakeCurrent::CurrentNew) | Ok(MakeCurrent::Current) => {}
            Ok(MakeCurrent::NotCurrent) => return None,
            Err(err) => {
                tracing::warn!(%device, error = %err, "shared context creation failed");
                return None;
            }
        }
        let extensions = context.extension_cache();
        let version = context.gl_version();
        let options = context.options();
        if let Err(err) = context.release() {
            tracing::warn!(%device, error = %err, "shared context release failed");
        }
        let shared = SharedDeviceContext {
            version: version?,
            options,
            gl_extension_count: extensions.as_ref().map_or(0, |cache| cache.gl_extension_count()),
            platform_extension_count: extensions.as_ref().map_or(0, |cache| cache.platform_extension_count()),
            context,
        };
        tracing::info!(%device, version = %shared.version, "shared context ready");
        Some(shared)
    }

    fn release(&self, device: &DeviceKey, resource: SharedDeviceContext) {
        if let Err(err) = resource.context.destroy() {
            tracing::warn!(%device, error = %err, "shared context destroy failed");
        }
    }
}
