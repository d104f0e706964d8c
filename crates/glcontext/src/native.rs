//! Capability traits for the native collaborators: the window-system platform,
//! the GL driver, and the surfaces contexts render into.

use crate::version::{ContextOptions, DeviceKey, GlVersion};
use std::fmt;

/// Opaque native context handle. Zero means "not created".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    pub const NULL: NativeHandle = NativeHandle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Window-system flavour a backend speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Platform {
    Glx,
    Wgl,
    Cgl,
    Egl,
    Headless,
}

impl Platform {
    /// The platform native to the build target.
    pub fn native() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Wgl
        } else if cfg!(target_os = "macos") {
            Platform::Cgl
        } else if cfg!(any(target_os = "android", target_os = "ios")) {
            Platform::Egl
        } else {
            Platform::Glx
        }
    }

    /// Prefix of this platform's own extension names.
    pub fn extension_prefix(self) -> &'static str {
        match self {
            Platform::Glx => "GLX_",
            Platform::Wgl => "WGL_",
            Platform::Cgl => "CGL_",
            Platform::Egl | Platform::Headless => "EGL_",
        }
    }
}

/// Result of locking a surface before making a context current on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceLock {
    /// The surface cannot be rendered to yet (e.g. not realized).
    NotReady,
    /// Locked, but the underlying native surface changed since the last lock.
    Changed,
    /// Locked.
    Ready,
}

impl SurfaceLock {
    pub fn is_locked(self) -> bool {
        !matches!(self, SurfaceLock::NotReady)
    }
}

/// A drawable a context renders into, owned by the windowing layer.
pub trait Surface: Send + Sync {
    /// Device connection this surface lives on.
    fn device(&self) -> DeviceKey;

    fn lock_surface(&self) -> SurfaceLock;

    fn unlock_surface(&self);

    /// Native surface handle; only meaningful while locked.
    fn handle(&self) -> u64;

    fn width(&self) -> u32;

    fn height(&self) -> u32;
}

/// Parameters for native context creation.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    pub device: DeviceKey,
    pub surface: u64,
    /// Already-created context to share server-side objects with.
    pub share_with: Option<NativeHandle>,
    /// Explicit version and profile; `None` selects the legacy creation path.
    pub version: Option<(GlVersion, ContextOptions)>,
    pub debug: bool,
}

/// Context lifecycle calls of one window system.
pub trait PlatformBackend: Send + Sync {
    fn platform(&self) -> Platform;

    /// Whether contexts with an explicit version/profile can be created on `device`.
    fn supports_explicit_version(&self, device: &DeviceKey) -> bool;

    /// Returns `None` when the driver refuses the request.
    fn create_context(&self, request: &CreateRequest) -> Option<NativeHandle>;

    fn destroy_context(&self, context: NativeHandle) -> bool;

    fn make_current(&self, context: NativeHandle, draw: u64, read: u64) -> bool;

    fn release_current(&self, context: NativeHandle) -> bool;

    fn is_hardware_accelerated(&self, context: NativeHandle) -> bool;

    /// Resolve a GL or platform entry point by exact name.
    fn resolve_function_address(&self, name: &str) -> Option<usize>;

    /// Window-system extension string for `device`.
    fn platform_extensions(&self, device: &DeviceKey) -> String;

    /// Platform entry points that make up the platform proc table.
    fn platform_entry_points(&self) -> Vec<&'static str>;
}

/// GL commands the core issues or intercepts, addressed to an explicit context.
pub trait GlDriver: Send + Sync {
    fn get_error(&self, context: NativeHandle) -> u32;

    fn get_string(&self, context: NativeHandle, name: u32) -> Option<String>;

    fn get_string_indexed(&self, context: NativeHandle, name: u32, index: u32) -> Option<String>;

    fn get_integer(&self, context: NativeHandle, pname: u32) -> i64;

    fn bind_buffer(&self, context: NativeHandle, target: u32, buffer: u32);

    fn buffer_data(&self, context: NativeHandle, target: u32, size: i64, data: Option<&[u8]>, usage: u32);

    fn named_buffer_data(&self, context: NativeHandle, buffer: u32, size: i64, data: Option<&[u8]>, usage: u32);

    fn buffer_storage(&self, context: NativeHandle, target: u32, size: i64, data: Option<&[u8]>, flags: u32);

    fn named_buffer_storage(&self, context: NativeHandle, buffer: u32, size: i64, data: Option<&[u8]>, flags: u32);

    fn get_named_buffer_parameter(&self, context: NativeHandle, buffer: u32, pname: u32) -> i64;

    /// Returns the mapped address, or 0 on failure.
    fn map_buffer_range(&self, context: NativeHandle, target: u32, offset: i64, length: i64, access: u32) -> usize;

    fn map_named_buffer_range(&self, context: NativeHandle, buffer: u32, offset: i64, length: i64, access: u32) -> usize;

    fn unmap_buffer(&self, context: NativeHandle, target: u32) -> bool;

    fn unmap_named_buffer(&self, context: NativeHandle, buffer: u32) -> bool;

    fn delete_buffers(&self, context: NativeHandle, buffers: &[u32]);

    fn push_client_attrib(&self, context: NativeHandle, mask: u32);

    fn pop_client_attrib(&self, context: NativeHandle);
}

/// A complete backend: platform lifecycle plus GL commands.
pub trait NativeDriver: PlatformBackend + GlDriver {
    fn as_platform(&self) -> &dyn PlatformBackend;

    fn as_gl(&self) -> &dyn GlDriver;
}

impl<T: PlatformBackend + GlDriver> NativeDriver for T {
    fn as_platform(&self) -> &dyn PlatformBackend {
        self
    }

    fn as_gl(&self) -> &dyn GlDriver {
        self
    }
}
