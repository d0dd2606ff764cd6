//! Pure version comparison helpers layered on top of [`VersionDescriptor`].
//!
//! The durable lifecycle state machine only ever needs strict inequality
//! between the remote and the stored version; everything here is a stateless
//! convenience for hosts that publish semver descriptors or restrict bundles
//! to specific installed-app versions.

use std::cmp::Ordering;

use tracing::warn;

use crate::descriptor::VersionDescriptor;

/// A strict `major.minor.patch` version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Semver {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Semver {
    /// Parses `"x.y.z"` with purely numeric components. Anything else
    /// (prerelease tags, missing components) returns `None`.
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parse_component(parts.next()?)?;
        let patch = parse_component(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

fn parse_component(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Compares two semver strings, or `None` when either fails to parse.
pub fn compare_semver(a: &str, b: &str) -> Option<Ordering> {
    Some(Semver::parse(a)?.cmp(&Semver::parse(b)?))
}

/// Whether a descriptor targets the given installed-app version on the given
/// platform. No target list (globally or for the platform) means every app
/// version is targeted.
pub fn is_version_targeted(
    descriptor: &VersionDescriptor,
    platform: &str,
    app_version: &str,
) -> bool {
    let Some(targets) = &descriptor.target_versions else {
        return true;
    };
    match targets.get(platform) {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.iter().any(|v| v == app_version),
    }
}

/// Outcome of evaluating a remote descriptor against local state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionCheck {
    pub has_update: bool,
    pub is_compatible: bool,
    pub remote_version: String,
    pub current_version: Option<String>,
}

/// Evaluates a remote descriptor against the currently installed OTA version.
///
/// Descriptors with `isSemver` set compare by semantic ordering (an update
/// exists only when the remote is strictly greater); invalid semver falls
/// back to plain string inequality, like every non-semver descriptor.
pub fn evaluate(
    descriptor: &VersionDescriptor,
    current_ota_version: Option<&str>,
    platform: &str,
    app_version: &str,
) -> VersionCheck {
    let is_compatible = is_version_targeted(descriptor, platform, app_version);
    let remote = descriptor.version.as_str();

    let has_update = match current_ota_version {
        None => true,
        Some(current) if descriptor.is_semver == Some(true) => {
            match compare_semver(remote, current) {
                Some(ordering) => ordering == Ordering::Greater,
                None => {
                    warn!(
                        remote,
                        current,
                        "descriptor claims semver but a version failed to \
                         parse; falling back to string comparison"
                    );
                    remote != current
                }
            }
        }
        Some(current) => remote != current,
    };

    VersionCheck {
        has_update,
        is_compatible,
        remote_version: remote.to_owned(),
        current_version: current_ota_version.map(str::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn semver_descriptor(version: &str) -> VersionDescriptor {
        VersionDescriptor {
            version: version.into(),
            is_semver: Some(true),
            ..VersionDescriptor::default()
        }
    }

    #[test]
    fn semver_ordering() {
        assert_eq!(compare_semver("1.2.3", "1.2.3"), Some(Ordering::Equal));
        assert_eq!(compare_semver("1.10.0", "1.9.9"), Some(Ordering::Greater));
        assert_eq!(compare_semver("0.9.1", "1.0.0"), Some(Ordering::Less));
        assert_eq!(compare_semver("1.2", "1.2.3"), None);
        assert_eq!(compare_semver("1.2.3-beta", "1.2.3"), None);
    }

    #[test]
    fn no_current_version_always_updates() {
        let check = evaluate(&semver_descriptor("1.0.0"), None, "android", "42");
        assert!(check.has_update);
        assert!(check.is_compatible);
        assert_eq!(check.current_version, None);
    }

    #[test]
    fn semver_descriptor_ignores_downgrades() {
        let check =
            evaluate(&semver_descriptor("1.0.0"), Some("1.1.0"), "android", "42");
        assert!(!check.has_update);
        let check =
            evaluate(&semver_descriptor("1.2.0"), Some("1.1.0"), "android", "42");
        assert!(check.has_update);
    }

    #[test]
    fn invalid_semver_falls_back_to_string_inequality() {
        let check =
            evaluate(&semver_descriptor("v7"), Some("1.1.0"), "android", "42");
        assert!(check.has_update);
        let check = evaluate(&semver_descriptor("v7"), Some("v7"), "android", "42");
        assert!(!check.has_update);
    }

    #[test]
    fn non_semver_descriptor_uses_plain_inequality() {
        let descriptor = VersionDescriptor {
            version: "build-889".into(),
            ..VersionDescriptor::default()
        };
        assert!(evaluate(&descriptor, Some("build-888"), "ios", "42").has_update);
        assert!(!evaluate(&descriptor, Some("build-889"), "ios", "42").has_update);
    }

    #[test]
    fn target_version_filtering() {
        let mut targets = HashMap::new();
        targets.insert("android".to_owned(), vec!["41".to_owned(), "42".to_owned()]);
        targets.insert("ios".to_owned(), Vec::new());
        let descriptor = VersionDescriptor {
            version: "2.0.0".into(),
            target_versions: Some(targets),
            ..VersionDescriptor::default()
        };

        assert!(is_version_targeted(&descriptor, "android", "42"));
        assert!(!is_version_targeted(&descriptor, "android", "40"));
        // Empty list for a platform targets everything.
        assert!(is_version_targeted(&descriptor, "ios", "40"));
        // Platform absent from the map targets everything.
        assert!(is_version_targeted(&descriptor, "web", "40"));
    }
}
