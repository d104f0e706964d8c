//! GL context concurrency and resource tracking core.
//!
//! This crate owns the lifecycle of native GL contexts: which thread a context
//! is current on, how contexts in a share group see each other's objects, and
//! the per-family caches (extensions, entry points) that make repeated
//! creation cheap. Native work is delegated to a [`NativeDriver`]; the
//! [`headless`] driver implements it in memory.

pub mod buffer_object;
pub mod buffer_size;
pub mod buffer_state;
pub mod context;
pub mod current;
pub mod extensions;
pub mod gl;
pub mod headless;
pub mod lock;
pub mod native;
pub mod proc_table;
pub mod registry;
pub mod share_set;
pub mod version;

pub use buffer_object::{BufferObjectTracker, BufferRef, BufferStorage, MapRequest, MappedBuffer, StorageKind};
pub use buffer_size::BufferSizeTracker;
pub use buffer_state::BufferStateTracker;
pub use context::{Context, ContextId, ContextPhase, MakeCurrent};
pub use current::{current_context, release_if_contended};
pub use extensions::ExtensionAvailabilityCache;
pub use headless::{HeadlessConfig, HeadlessDriver, HeadlessSurface};
pub use lock::ContextLock;
pub use native::{CreateRequest, GlDriver, NativeDriver, NativeHandle, Platform, PlatformBackend, Surface, SurfaceLock};
pub use proc_table::ProcAddressTable;
pub use registry::ContextRegistry;
pub use share_set::{ContextShareSet, SharedContext};
pub use version::{ContextFamilyKey, ContextOptions, ContextRequest, DeviceKey, GlVersion, ProfileRequest};

pub use common::{GlConfig, GlError, GlResult};
