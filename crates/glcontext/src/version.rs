//! GL versions, profile options and the context family key.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every desktop GL version that has ever been released, ascending.
const DESKTOP_VERSIONS: &[(u8, u8)] = &[
    (1, 0),
    (1, 1),
    (1, 2),
    (1, 3),
    (1, 4),
    (1, 5),
    (2, 0),
    (2, 1),
    (3, 0),
    (3, 1),
    (3, 2),
    (3, 3),
    (4, 0),
    (4, 1),
    (4, 2),
    (4, 3),
    (4, 4),
    (4, 5),
    (4, 6),
];

/// A GL `major.minor` version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlVersion {
    pub major: u8,
    pub minor: u8,
}

impl GlVersion {
    pub const MAX_DESKTOP: GlVersion = GlVersion::new(4, 6);
    /// Lowest version with core/compatibility profiles.
    pub const FIRST_PROFILED: GlVersion = GlVersion::new(3, 2);
    /// Lowest version with indexed extension queries.
    pub const FIRST_INDEXED_EXTENSIONS: GlVersion = GlVersion::new(3, 0);

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Whether this is a released desktop version.
    pub fn is_valid(self) -> bool {
        DESKTOP_VERSIONS.contains(&(self.major, self.minor))
    }

    /// Parse the leading `major.minor` out of a `GL_VERSION` string.
    ///
    /// Accepts vendor decorations such as `"4.6.0 NVIDIA 535.54"` or
    /// `"OpenGL ES 3.2 Mesa 23.1"`.
    pub fn parse(version: &str) -> Option<Self> {
        version.split_whitespace().find_map(|token| {
            let mut parts = token.split('.');
            let major = parts.next()?.parse::<u8>().ok()?;
            let minor: String = parts.next()?.chars().take_while(|c| c.is_ascii_digit()).collect();
            let minor = minor.parse::<u8>().ok()?;
            Some(Self::new(major, minor))
        })
    }

    /// Next lower released version.
    pub fn previous(self) -> Option<Self> {
        DESKTOP_VERSIONS
            .iter()
            .rev()
            .map(|&(major, minor)| Self::new(major, minor))
            .find(|v| *v < self)
    }

    /// All released versions at or below `self`, descending.
    pub fn at_or_below(self) -> impl Iterator<Item = GlVersion> {
        DESKTOP_VERSIONS
            .iter()
            .rev()
            .map(|&(major, minor)| GlVersion::new(major, minor))
            .filter(move |v| *v <= self)
    }

    /// Released versions in `[min, self]`, descending.
    pub fn down_to(self, min: GlVersion) -> impl Iterator<Item = GlVersion> {
        self.at_or_below().filter(move |v| *v >= min)
    }

    /// Capability token used by the extension cache, e.g. `GL_VERSION_3_3`.
    pub fn token(self) -> String {
        format!("GL_VERSION_{}_{}", self.major, self.minor)
    }
}

impl fmt::Display for GlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

bitflags! {
    /// Context creation and identity options.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ContextOptions: u32 {
        const PROFILE_COMPAT     = 1 << 0;
        const PROFILE_CORE       = 1 << 1;
        const FORWARD_COMPATIBLE = 1 << 2;
        const DEBUG              = 1 << 3;
        /// Hardware accelerated rather than a software rasterizer.
        const HARDWARE           = 1 << 4;
    }
}

impl ContextOptions {
    /// The bits that take part in version probing.
    pub fn profile_bits(self) -> Self {
        self & (Self::PROFILE_COMPAT | Self::PROFILE_CORE | Self::FORWARD_COMPATIBLE)
    }

    pub fn is_core(self) -> bool {
        self.contains(Self::PROFILE_CORE)
    }

    fn label(self) -> &'static str {
        if self.is_core() {
            if self.contains(Self::FORWARD_COMPATIBLE) {
                "core-fwd"
            } else {
                "core"
            }
        } else if self.contains(Self::PROFILE_COMPAT) {
            "compat"
        } else {
            "legacy"
        }
    }
}

/// Which profile a caller asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileRequest {
    /// Best available, core preferred.
    #[default]
    Any,
    Core,
    Compatibility,
}

impl ProfileRequest {
    /// Profile combinations tried during negotiation, in preference order.
    pub fn probe_plan(self) -> Vec<ContextOptions> {
        let core = ContextOptions::PROFILE_CORE;
        let core_fwd = ContextOptions::PROFILE_CORE | ContextOptions::FORWARD_COMPATIBLE;
        let compat = ContextOptions::PROFILE_COMPAT;
        match self {
            Self::Any => vec![core, core_fwd, compat],
            Self::Core => vec![core, core_fwd],
            Self::Compatibility => vec![compat],
        }
    }
}

/// Descending candidate versions for one profile combination.
pub fn candidate_versions(options: ContextOptions, max: GlVersion) -> Vec<GlVersion> {
    let min = if options.is_core() {
        GlVersion::FIRST_PROFILED
    } else {
        GlVersion::new(3, 0)
    };
    max.down_to(min).collect()
}

/// What a context asks for at creation time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextRequest {
    pub profile: ProfileRequest,
    /// Highest version to probe; `None` means [`GlVersion::MAX_DESKTOP`].
    pub max_version: Option<GlVersion>,
    /// Request a debug context.
    pub debug: bool,
}

impl ContextRequest {
    pub fn core() -> Self {
        Self {
            profile: ProfileRequest::Core,
            ..Self::default()
        }
    }

    pub fn compatibility() -> Self {
        Self {
            profile: ProfileRequest::Compatibility,
            ..Self::default()
        }
    }

    pub fn with_max_version(mut self, version: GlVersion) -> Self {
        self.max_version = Some(version);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Probe ceiling.
    pub fn ceiling(&self) -> GlVersion {
        self.max_version.unwrap_or(GlVersion::MAX_DESKTOP)
    }
}

/// Outcome of version negotiation for one device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NegotiatedVersion {
    pub version: GlVersion,
    pub options: ContextOptions,
}

/// Identity of a logical device connection, e.g. `":0.0"` or `"headless:0"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceKey(pub String);

impl DeviceKey {
    pub fn new(connection: impl Into<String>) -> Self {
        Self(connection.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Contexts with equal keys may reuse each other's extension cache and proc tables.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextFamilyKey {
    pub device: DeviceKey,
    pub version: GlVersion,
    /// Profile, forward-compatible and hardware bits; the debug bit is dropped.
    pub options: ContextOptions,
}

impl ContextFamilyKey {
    pub fn new(device: DeviceKey, version: GlVersion, options: ContextOptions) -> Self {
        Self {
            device,
            version,
            options: options - ContextOptions::DEBUG,
        }
    }
}

impl fmt::Display for ContextFamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.device,
            self.version,
            self.options.label(),
            if self.options.contains(ContextOptions::HARDWARE) { "hw" } else { "sw" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vendor_strings() {
        assert_eq!(GlVersion::parse("4.6.0 NVIDIA 535.54"), Some(GlVersion::new(4, 6)));
        assert_eq!(GlVersion::parse("OpenGL ES 3.2 Mesa 23.1"), Some(GlVersion::new(3, 2)));
        assert_eq!(GlVersion::parse("3.3 (Core Profile) Mesa"), Some(GlVersion::new(3, 3)));
        assert_eq!(GlVersion::parse("garbage"), None);
    }

    #[test]
    fn test_previous_skips_gaps() {
        assert_eq!(GlVersion::new(3, 0).previous(), Some(GlVersion::new(2, 1)));
        assert_eq!(GlVersion::new(4, 0).previous(), Some(GlVersion::new(3, 3)));
        assert_eq!(GlVersion::new(1, 0).previous(), None);
    }

    #[test]
    fn test_core_candidates_stop_at_profiled() {
        let versions = candidate_versions(ContextOptions::PROFILE_CORE, GlVersion::new(4, 1));
        assert_eq!(versions.first(), Some(&GlVersion::new(4, 1)));
        assert_eq!(versions.last(), Some(&GlVersion::new(3, 2)));
        assert_eq!(versions.len(), 4);
    }

    #[test]
    fn test_probe_plan_prefers_core() {
        let plan = ProfileRequest::Any.probe_plan();
        assert_eq!(plan.len(), 3);
        assert!(plan[0].is_core() && !plan[0].contains(ContextOptions::FORWARD_COMPATIBLE));
        assert!(plan[1].contains(ContextOptions::FORWARD_COMPATIBLE));
        assert!(plan[2].contains(ContextOptions::PROFILE_COMPAT));
    }

    #[test]
    fn test_family_key_ignores_debug() {
        let device = DeviceKey::new("headless:0");
        let a = ContextFamilyKey::new(
            device.clone(),
            GlVersion::new(3, 3),
            ContextOptions::PROFILE_CORE | ContextOptions::DEBUG,
        );
        let b = ContextFamilyKey::new(device, GlVersion::new(3, 3), ContextOptions::PROFILE_CORE);
        assert_eq!(a, b);
        assert_eq!(b.to_string(), "headless:0-3.3-core-sw");
    }
}
