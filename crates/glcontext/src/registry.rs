//! Process-scoped state shared by contexts.
//!
//! A [`ContextRegistry`] owns everything that outlives a single context:
//! extension caches and proc tables keyed by context family, what each device
//! supports for explicit version creation, the negotiated version per device
//! and profile request, and the share set. Contexts receive the registry they
//! belong to at construction, so tests can work against isolated registries
//! while applications use [`ContextRegistry::global`].
//!
//! Teardown: [`shutdown`](ContextRegistry::shutdown) drops every cached entry
//! and share group. Contexts that are still alive keep their own `Arc`s to the
//! caches they already installed.

use crate::context::Context;
use crate::extensions::ExtensionAvailabilityCache;
use crate::native::NativeHandle;
use crate::proc_table::ProcAddressTable;
use crate::share_set::ContextShareSet;
use crate::version::{candidate_versions, ContextFamilyKey, ContextRequest, DeviceKey, GlVersion, NegotiatedVersion, ProfileRequest};
use common::GlConfig;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<ContextRegistry>> = Lazy::new(|| {
    let config = GlConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring malformed environment configuration");
        GlConfig::default()
    });
    Arc::new(ContextRegistry::new(&config))
});

/// Key of the negotiated-version memo.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct VersionKey {
    device: DeviceKey,
    profile: ProfileRequest,
    ceiling: GlVersion,
}

#[derive(Debug)]
pub struct ContextRegistry {
    config: GlConfig,
    fail_fast: AtomicBool,
    extension_caches: Mutex<HashMap<ContextFamilyKey, Arc<ExtensionAvailabilityCache>>>,
    proc_tables: Mutex<HashMap<ContextFamilyKey, Arc<ProcAddressTable>>>,
    explicit_support: Mutex<HashMap<DeviceKey, bool>>,
    negotiated: Mutex<HashMap<VersionKey, NegotiatedVersion>>,
    share_set: ContextShareSet<Context>,
}

impl ContextRegistry {
    pub fn new(config: &GlConfig) -> Self {
        Self {
            config: config.clone(),
            fail_fast: AtomicBool::new(config.fail_fast_locking),
            extension_caches: Mutex::new(HashMap::new()),
            proc_tables: Mutex::new(HashMap::new()),
            explicit_support: Mutex::new(HashMap::new()),
            negotiated: Mutex::new(HashMap::new()),
            share_set: ContextShareSet::new(),
        }
    }

    /// The registry configured from the environment on first use.
    pub fn global() -> Arc<ContextRegistry> {
        GLOBAL.clone()
    }

    pub fn config(&self) -> &GlConfig {
        &self.config
    }

    /// Fail-fast mode given to newly constructed contexts.
    pub fn default_fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::Acquire)
    }

    pub fn set_default_fail_fast(&self, enabled: bool) {
        self.fail_fast.store(enabled, Ordering::Release);
    }

    pub fn share_set(&self) -> &ContextShareSet<Context> {
        &self.share_set
    }

    /// The family's extension cache, created on first request.
    pub fn extension_cache(&self, family: &ContextFamilyKey) -> Arc<ExtensionAvailabilityCache> {
        self.extension_caches
            .lock()
            .entry(family.clone())
            .or_insert_with(|| {
                tracing::debug!(family = %family, "new extension cache");
                Arc::new(ExtensionAvailabilityCache::new(family.clone()))
            })
            .clone()
    }

    /// The family's proc table, built with `build` on first request.
    pub fn proc_table(
        &self,
        family: &ContextFamilyKey,
        build: impl FnOnce() -> ProcAddressTable,
    ) -> Arc<ProcAddressTable> {
        self.proc_tables
            .lock()
            .entry(family.clone())
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn cached_extension_cache(&self, family: &ContextFamilyKey) -> Option<Arc<ExtensionAvailabilityCache>> {
        self.extension_caches.lock().get(family).cloned()
    }

    pub fn cached_proc_table(&self, family: &ContextFamilyKey) -> Option<Arc<ProcAddressTable>> {
        self.proc_tables.lock().get(family).cloned()
    }

    /// Number of families with a cached extension cache.
    pub fn family_count(&self) -> usize {
        self.extension_caches.lock().len()
    }

    /// Explicit version support of `device`, probing it at most once.
    pub fn explicit_version_support(&self, device: &DeviceKey, probe: impl FnOnce() -> bool) -> bool {
        *self.explicit_support.lock().entry(device.clone()).or_insert_with(|| {
            let supported = probe();
            tracing::info!(%device, supported, "probed explicit version support");
            supported
        })
    }

    pub fn negotiated_version(&self, device: &DeviceKey, request: &ContextRequest) -> Option<NegotiatedVersion> {
        self.negotiated.lock().get(&Self::version_key(device, request)).copied()
    }

    /// Create a context with an explicit version, probing on first use.
    ///
    /// Once a combination succeeds for a device and request it is remembered
    /// and reused; a later failure of the remembered combination is reported
    /// without probing again. `create` is called with each candidate until it
    /// returns a handle.
    pub fn create_negotiated(
        &self,
        device: &DeviceKey,
        request: &ContextRequest,
        mut create: impl FnMut(NegotiatedVersion) -> Option<NativeHandle>,
    ) -> Option<(NativeHandle, NegotiatedVersion)> {
        let key = Self::version_key(device, request);
        // Held across the probe so concurrent first creations probe only once.
        let mut negotiated = self.negotiated.lock();
        if let Some(&known) = negotiated.get(&key) {
            return create(known).map(|handle| (handle, known));
        }

        for options in request.profile.probe_plan() {
            for version in candidate_versions(options, request.ceiling()) {
                let candidate = NegotiatedVersion { version, options };
                if let Some(handle) = create(candidate) {
                    tracing::info!(%device, %version, ?options, "negotiated context version");
                    negotiated.insert(key, candidate);
                    return Some((handle, candidate));
                }
            }
        }
        tracing::warn!(%device, profile = ?request.profile, "no context version could be created");
        None
    }

    fn version_key(device: &DeviceKey, request: &ContextRequest) -> VersionKey {
        VersionKey {
            device: device.clone(),
            profile: request.profile,
            ceiling: request.ceiling(),
        }
    }

    /// Drop every cached family, probe result and share group.
    pub fn shutdown(&self) {
        let families = self.extension_caches.lock().drain().count();
        self.proc_tables.lock().clear();
        self.explicit_support.lock().clear();
        self.negotiated.lock().clear();
        self.share_set.clear();
        tracing::info!(families, "context registry shut down");
    }
}
