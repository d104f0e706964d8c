//! Cache of the capability strings a context family supports.
//!
//! One cache serves every context with the same
//! [`ContextFamilyKey`](crate::version::ContextFamilyKey). It is filled on
//! first use from the driver's GL extension list (indexed query on modern core
//! contexts, the legacy single string otherwise), the window system's platform
//! extension string, and one `GL_VERSION_M_N` token per released version up to
//! the family's own, so version checks go through the same lookup.

use crate::gl;
use crate::native::{NativeDriver, NativeHandle};
use crate::version::{ContextFamilyKey, GlVersion};
use parking_lot::RwLock;
use std::collections::HashSet;

/// Always present once populated, so an empty driver answer is not re-queried.
pub const SENTINEL: &str = "<*>";

/// Driver access needed to populate a cache.
#[derive(Clone, Copy)]
pub struct ExtensionProbe<'a> {
    pub driver: &'a dyn NativeDriver,
    pub context: NativeHandle,
    /// `glGetStringi` resolved for this family.
    pub indexed_query: bool,
}

#[derive(Debug, Default)]
struct Populated {
    available: HashSet<String>,
    gl_extensions: String,
    platform_extensions: String,
    gl_count: usize,
    platform_count: usize,
}

#[derive(Debug)]
pub struct ExtensionAvailabilityCache {
    family: ContextFamilyKey,
    state: RwLock<Option<Populated>>,
}

impl ExtensionAvailabilityCache {
    pub fn new(family: ContextFamilyKey) -> Self {
        Self {
            family,
            state: RwLock::new(None),
        }
    }

    pub fn family(&self) -> &ContextFamilyKey {
        &self.family
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().is_some()
    }

    /// Whether `name` is supported, populating the cache on first use.
    pub fn is_extension_available(&self, probe: ExtensionProbe<'_>, name: &str) -> bool {
        if let Some(populated) = self.state.read().as_ref() {
            return populated.available.contains(name);
        }
        self.populate(probe);
        self.contains(name)
    }

    /// Lookup without populating; `false` while uninitialized.
    pub fn contains(&self, name: &str) -> bool {
        self.state
            .read()
            .as_ref()
            .is_some_and(|populated| populated.available.contains(name))
    }

    /// Query the driver unless another thread already did.
    pub fn populate(&self, probe: ExtensionProbe<'_>) {
        let mut state = self.state.write();
        if state.is_some() {
            return;
        }
        let populated = self.query(probe);
        tracing::debug!(
            family = %self.family,
            gl = populated.gl_count,
            platform = populated.platform_count,
            "populated extension cache"
        );
        *state = Some(populated);
    }

    /// Back to uninitialized; the next lookup re-queries.
    pub fn flush(&self) {
        *self.state.write() = None;
    }

    /// Flush and repopulate at once.
    pub fn reset(&self, probe: ExtensionProbe<'_>) {
        let populated = self.query(probe);
        *self.state.write() = Some(populated);
    }

    /// Every available name, version tokens and sentinel included, sorted.
    pub fn available_extensions(&self) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .as_ref()
            .map(|populated| populated.available.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Raw GL extension string as reported (space separated).
    pub fn gl_extensions(&self) -> String {
        self.state
            .read()
            .as_ref()
            .map(|populated| populated.gl_extensions.clone())
            .unwrap_or_default()
    }

    /// Raw platform extension string as reported.
    pub fn platform_extensions(&self) -> String {
        self.state
            .read()
            .as_ref()
            .map(|populated| populated.platform_extensions.clone())
            .unwrap_or_default()
    }

    pub fn gl_extension_count(&self) -> usize {
        self.state.read().as_ref().map_or(0, |populated| populated.gl_count)
    }

    pub fn platform_extension_count(&self) -> usize {
        self.state.read().as_ref().map_or(0, |populated| populated.platform_count)
    }

    fn query(&self, probe: ExtensionProbe<'_>) -> Populated {
        let ExtensionProbe {
            driver,
            context,
            indexed_query,
        } = probe;
        let version = self.family.version;
        let mut populated = Populated::default();

        let indexed = indexed_query && self.family.options.is_core() && version >= GlVersion::FIRST_INDEXED_EXTENSIONS;
        let gl_names: Vec<String> = if indexed {
            let count = driver.get_integer(context, gl::NUM_EXTENSIONS).max(0) as u32;
            (0..count)
                .filter_map(|index| driver.get_string_indexed(context, gl::EXTENSIONS, index))
                .collect()
        } else {
            driver
                .get_string(context, gl::EXTENSIONS)
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect()
        };
        populated.gl_extensions = gl_names.join(" ");
        for name in gl_names {
            if populated.available.insert(name) {
                populated.gl_count += 1;
            }
        }

        populated.platform_extensions = driver.platform_extensions(&self.family.device);
        for name in populated.platform_extensions.split_whitespace() {
            if populated.available.insert(name.to_string()) {
                populated.platform_count += 1;
            }
        }

        for supported in version.at_or_below() {
            populated.available.insert(supported.token());
        }
        populated.available.insert(SENTINEL.to_string());
        populated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessConfig, HeadlessDriver};
    use crate::native::{CreateRequest, PlatformBackend};
    use crate::version::{ContextOptions, DeviceKey};

    fn compat_family() -> ContextFamilyKey {
        ContextFamilyKey::new(DeviceKey::new("headless:0"), GlVersion::new(3, 0), ContextOptions::PROFILE_COMPAT)
    }

    fn probe(driver: &HeadlessDriver, context: NativeHandle) -> ExtensionProbe<'_> {
        ExtensionProbe {
            driver,
            context,
            indexed_query: true,
        }
    }

    #[test]
    fn test_empty_driver_string_keeps_sentinel() {
        let driver = HeadlessDriver::new(
            HeadlessConfig::default()
                .with_gl_extensions(&[])
                .with_platform_extensions(""),
        );
        let context = driver.create_bare_context();
        let cache = ExtensionAvailabilityCache::new(compat_family());

        assert!(!cache.is_initialized());
        assert!(!cache.is_extension_available(probe(&driver, context), "GL_ARB_buffer_storage"));
        assert!(cache.is_initialized());
        assert!(cache.contains(SENTINEL));
        assert!(!cache.available_extensions().is_empty());
        assert_eq!(cache.gl_extension_count(), 0);

        cache.is_extension_available(probe(&driver, context), "GL_KHR_debug");
        assert_eq!(driver.stats().extension_queries, 1);
    }

    #[test]
    fn test_legacy_string_and_platform_dedup() {
        let driver = HeadlessDriver::default();
        let context = driver.create_bare_context();
        let cache = ExtensionAvailabilityCache::new(compat_family());
        cache.populate(probe(&driver, context));

        assert!(cache.contains("GL_KHR_debug"));
        assert!(cache.contains("EGL_KHR_surfaceless_context"));
        assert_eq!(cache.gl_extension_count(), 3);
        assert_eq!(cache.platform_extension_count(), 2);
        assert!(cache.gl_extensions().contains("GL_ARB_direct_state_access"));
    }

    #[test]
    fn test_indexed_query_on_core_context() {
        let driver = HeadlessDriver::default();
        let context = driver
            .create_context(&CreateRequest {
                device: DeviceKey::new("headless:0"),
                surface: 0,
                share_with: None,
                version: Some((GlVersion::new(4, 5), ContextOptions::PROFILE_CORE)),
                debug: false,
            })
            .unwrap();
        let family = ContextFamilyKey::new(DeviceKey::new("headless:0"), GlVersion::new(4, 5), ContextOptions::PROFILE_CORE);
        let cache = ExtensionAvailabilityCache::new(family.clone());
        cache.populate(probe(&driver, context));
        assert!(cache.contains("GL_ARB_buffer_storage"));
        assert_eq!(cache.gl_extension_count(), 3);

        // Without glGetStringi a core context falls back to the legacy string,
        // which core profiles do not answer.
        let legacy = ExtensionAvailabilityCache::new(family);
        legacy.populate(ExtensionProbe {
            indexed_query: false,
            ..probe(&driver, context)
        });
        assert_eq!(legacy.gl_extension_count(), 0);
        assert!(legacy.contains(SENTINEL));
    }

    #[test]
    fn test_version_tokens() {
        let driver = HeadlessDriver::default();
        let context = driver.create_bare_context();
        let cache = ExtensionAvailabilityCache::new(compat_family());
        cache.populate(probe(&driver, context));

        assert!(cache.contains("GL_VERSION_3_0"));
        assert!(cache.contains("GL_VERSION_2_1"));
        assert!(cache.contains("GL_VERSION_1_0"));
        assert!(!cache.contains("GL_VERSION_3_1"));
    }

    #[test]
    fn test_flush_and_reset() {
        let driver = HeadlessDriver::default();
        let context = driver.create_bare_context();
        let cache = ExtensionAvailabilityCache::new(compat_family());
        cache.populate(probe(&driver, context));

        cache.flush();
        assert!(!cache.is_initialized());
        assert!(!cache.contains(SENTINEL));
        assert_eq!(cache.gl_extensions(), "");

        cache.reset(probe(&driver, context));
        assert!(cache.is_initialized());
        assert_eq!(driver.stats().extension_queries, 2);
    }
}
