//! Resolved entry-point addresses for a context family.

use crate::native::PlatformBackend;
use crate::version::ContextFamilyKey;
use std::collections::HashMap;

/// GL entry points resolved eagerly for every family.
pub const GL_ENTRY_POINTS: &[&str] = &[
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
    "glMapBuffer",
    "glMapBufferRange",
    "glMapNamedBufferRange",
    "glUnmapBuffer",
    "glUnmapNamedBuffer",
    "glDeleteBuffers",
    "glPushClientAttrib",
    "glPopClientAttrib",
];

/// Suffixes tried by the dynamic fallback lookup, in order.
pub const VENDOR_SUFFIXES: &[&str] = &["", "ARB", "EXT", "KHR", "NV", "AMD"];

/// GL and platform function tables of one family.
#[derive(Debug)]
pub struct ProcAddressTable {
    family: ContextFamilyKey,
    gl: HashMap<&'static str, usize>,
    platform: HashMap<&'static str, usize>,
}

impl ProcAddressTable {
    /// Resolve the fixed GL list and the backend's platform entry points.
    pub fn build(family: ContextFamilyKey, backend: &dyn PlatformBackend) -> Self {
        let resolve = |names: &[&'static str]| -> HashMap<&'static str, usize> {
            names
                .iter()
                .filter_map(|&name| backend.resolve_function_address(name).map(|address| (name, address)))
                .collect()
        };
        let gl = resolve(GL_ENTRY_POINTS);
        let platform = resolve(backend.platform_entry_points().as_slice());
        tracing::debug!(
            family = %family,
            gl = gl.len(),
            platform = platform.len(),
            "built proc address table"
        );
        Self { family, gl, platform }
    }

    pub fn family(&self) -> &ContextFamilyKey {
        &self.family
    }

    pub fn address(&self, name: &str) -> Option<usize> {
        self.gl.get(name).copied()
    }

    pub fn platform_address(&self, name: &str) -> Option<usize> {
        self.platform.get(name).copied()
    }

    /// Number of resolved GL and platform entry points.
    pub fn resolved_count(&self) -> usize {
        self.gl.len() + self.platform.len()
    }

    /// Table lookups first, then a live lookup across vendor suffixes.
    pub fn is_function_available(&self, backend: &dyn PlatformBackend, name: &str) -> bool {
        if self.address(name).is_some() || self.platform_address(name).is_some() {
            return true;
        }
        resolve_with_suffixes(backend, name).is_some()
    }
}

/// Live lookup of `name` and its vendor-suffixed variants.
pub fn resolve_with_suffixes(backend: &dyn PlatformBackend, name: &str) -> Option<usize> {
    VENDOR_SUFFIXES.iter().find_map(|suffix| {
        let candidate = format!("{name}{suffix}");
        let address = backend.resolve_function_address(&candidate)?;
        if !suffix.is_empty() {
            tracing::trace!(function = name, resolved = %candidate, "resolved through vendor suffix");
        }
        Some(address)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessConfig, HeadlessDriver};
    use crate::version::{ContextOptions, DeviceKey, GlVersion};

    fn family() -> ContextFamilyKey {
        ContextFamilyKey::new(DeviceKey::new("headless:0"), GlVersion::new(4, 5), ContextOptions::PROFILE_CORE)
    }

    #[test]
    fn test_build_resolves_known_functions() {
        let driver = HeadlessDriver::new(HeadlessConfig::default().without_function("glGetStringi"));
        let table = ProcAddressTable::build(family(), &driver);

        assert!(table.address("glBindBuffer").is_some());
        assert!(table.address("glGetStringi").is_none());
        assert!(table.address("glMapBuffer").is_none());
        assert!(table.platform_address("eglMakeCurrent").is_some());
        assert_eq!(table.resolved_count(), GL_ENTRY_POINTS.len() - 2 + 6);
    }

    #[test]
    fn test_table_hit_skips_dynamic_lookup() {
        let driver = HeadlessDriver::default();
        let table = ProcAddressTable::build(family(), &driver);
        let lookups = driver.stats().function_lookups;

        assert!(table.is_function_available(&driver, "glBindBuffer"));
        assert!(table.is_function_available(&driver, "eglSwapBuffers"));
        assert_eq!(driver.stats().function_lookups, lookups);
    }

    #[test]
    fn test_vendor_suffix_fallback() {
        let driver = HeadlessDriver::default();
        let table = ProcAddressTable::build(family(), &driver);

        assert!(table.is_function_available(&driver, "glDebugMessageCallback"));
        assert!(!table.is_function_available(&driver, "glFrobnicate"));
        assert_eq!(
            resolve_with_suffixes(&driver, "glBufferStorage"),
            driver.resolve_function_address("glBufferStorage")
        );
    }
}
