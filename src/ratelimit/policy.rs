//! Window policies and the named presets selected by call sites.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AdmissionError, Result};

/// Default request limit when a call site names no policy.
const DEFAULT_MAX_REQUESTS: u32 = 100;
/// Default window when a call site names no policy.
const DEFAULT_WINDOW_MS: u64 = 60_000;
/// Longest window a policy may use: one year.
pub const MAX_WINDOW_MS: u64 = 365 * 24 * 60 * 60 * 1000;

/// How many requests a key may make within a trailing window.
///
/// Both fields are positive; [`WindowPolicy::new`] and deserialization reject
/// anything else, so a policy that exists is always usable at request time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy", into = "RawPolicy")]
pub struct WindowPolicy {
    max_requests: u32,
    window_ms: u64,
}

/// Unvalidated wire form of a [`WindowPolicy`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawPolicy {
    max_requests: u32,
    window_ms: u64,
}

impl WindowPolicy {
    /// Create a policy, rejecting a zero limit or a zero-length window.
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        let window_ms = u64::try_from(window.as_millis()).map_err(|_| {
            AdmissionError::InvalidPolicy {
                max_requests,
                window_ms: u64::MAX,
            }
        })?;
        Self::from_millis(max_requests, window_ms)
    }

    /// Create a policy from a window length in milliseconds. Windows longer
    /// than [`MAX_WINDOW_MS`] are rejected.
    pub fn from_millis(max_requests: u32, window_ms: u64) -> Result<Self> {
        if max_requests == 0 || window_ms == 0 || window_ms > MAX_WINDOW_MS {
            return Err(AdmissionError::InvalidPolicy {
                max_requests,
                window_ms,
            });
        }
        Ok(Self {
            max_requests,
            window_ms,
        })
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// The reset value reported on an admitted request: the window length in
    /// whole seconds, rounded up.
    pub fn nominal_reset_secs(&self) -> u64 {
        self.window_ms.div_ceil(1000)
    }
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
        }
    }
}

impl TryFrom<RawPolicy> for WindowPolicy {
    type Error = AdmissionError;

    fn try_from(raw: RawPolicy) -> Result<Self> {
        Self::from_millis(raw.max_requests, raw.window_ms)
    }
}

impl From<WindowPolicy> for RawPolicy {
    fn from(policy: WindowPolicy) -> Self {
        Self {
            max_requests: policy.max_requests,
            window_ms: policy.window_ms,
        }
    }
}

/// Named endpoint classes, each with its own default policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Login and credential endpoints
    Auth,
    /// General API endpoints
    Api,
    /// Read-only endpoints
    Readonly,
    /// Endpoints that mutate state
    Write,
    /// File uploads
    Upload,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Auth,
        Preset::Api,
        Preset::Readonly,
        Preset::Write,
        Preset::Upload,
    ];

    /// The lowercase name used in configuration and as the key scope.
    pub fn name(&self) -> &'static str {
        match self {
            Preset::Auth => "auth",
            Preset::Api => "api",
            Preset::Readonly => "readonly",
            Preset::Write => "write",
            Preset::Upload => "upload",
        }
    }

    /// The built-in policy for this preset.
    pub fn default_policy(&self) -> WindowPolicy {
        let (max_requests, window_ms) = match self {
            Preset::Auth => (5, 15 * 60 * 1000),
            Preset::Api => (100, 60 * 1000),
            Preset::Readonly => (200, 60 * 1000),
            Preset::Write => (20, 60 * 1000),
            Preset::Upload => (10, 60 * 1000),
        };
        WindowPolicy {
            max_requests,
            window_ms,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AdmissionError::UnknownPreset(s.to_string()))
    }
}

/// The policy in effect for every preset.
///
/// Starts from the built-in defaults; individual presets can be overridden
/// from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    policies: HashMap<Preset, WindowPolicy>,
}

impl PolicyTable {
    /// Create a table holding the built-in preset policies.
    pub fn new() -> Self {
        Self {
            policies: Preset::ALL
                .into_iter()
                .map(|p| (p, p.default_policy()))
                .collect(),
        }
    }

    /// Build a table from named overrides, e.g. the `presets` section of the
    /// service configuration.
    pub fn with_overrides<'a, I>(overrides: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a WindowPolicy)>,
    {
        let mut table = Self::new();
        for (name, policy) in overrides {
            table.set(name.parse()?, *policy);
        }
        Ok(table)
    }

    /// Load overrides from a YAML mapping of preset name to policy.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: HashMap<String, WindowPolicy> = serde_yaml::from_str(yaml)
            .map_err(|e| AdmissionError::Config(format!("Failed to parse presets: {}", e)))?;
        Self::with_overrides(&overrides)
    }

    pub fn get(&self, preset: Preset) -> WindowPolicy {
        self.policies
            .get(&preset)
            .copied()
            .unwrap_or_else(|| preset.default_policy())
    }

    pub fn set(&mut self, preset: Preset, policy: WindowPolicy) {
        self.policies.insert(preset, policy);
    }

    /// The longest window across all presets.
    pub fn longest_window(&self) -> Duration {
        Preset::ALL
            .into_iter()
            .map(|p| self.get(p).window())
            .max()
            .unwrap_or_default()
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejects_zero_values() {
        assert!(matches!(
            WindowPolicy::new(0, Duration::from_secs(1)),
            Err(AdmissionError::InvalidPolicy { max_requests: 0, .. })
        ));
        assert!(matches!(
            WindowPolicy::new(5, Duration::ZERO),
            Err(AdmissionError::InvalidPolicy { window_ms: 0, .. })
        ));
        assert!(WindowPolicy::new(1, Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn test_policy_rejects_oversized_window() {
        assert!(WindowPolicy::from_millis(1, MAX_WINDOW_MS).is_ok());
        assert!(matches!(
            WindowPolicy::from_millis(1, MAX_WINDOW_MS + 1),
            Err(AdmissionError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            WindowPolicy::from_millis(1, i64::MAX as u64),
            Err(AdmissionError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            WindowPolicy::new(1, Duration::MAX),
            Err(AdmissionError::InvalidPolicy { window_ms: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_default_policy() {
        let policy = WindowPolicy::default();
        assert_eq!(policy.max_requests(), 100);
        assert_eq!(policy.window_ms(), 60_000);
    }

    #[test]
    fn test_nominal_reset_rounds_up() {
        assert_eq!(WindowPolicy::from_millis(1, 1000).unwrap().nominal_reset_secs(), 1);
        assert_eq!(WindowPolicy::from_millis(1, 1001).unwrap().nominal_reset_secs(), 2);
        assert_eq!(WindowPolicy::from_millis(1, 1).unwrap().nominal_reset_secs(), 1);
    }

    #[test]
    fn test_preset_defaults() {
        let expected = [
            (Preset::Auth, 5, 900_000),
            (Preset::Api, 100, 60_000),
            (Preset::Readonly, 200, 60_000),
            (Preset::Write, 20, 60_000),
            (Preset::Upload, 10, 60_000),
        ];
        for (preset, max, window) in expected {
            let policy = preset.default_policy();
            assert_eq!(policy.max_requests(), max, "{}", preset);
            assert_eq!(policy.window_ms(), window, "{}", preset);
        }
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("auth".parse::<Preset>().unwrap(), Preset::Auth);
        assert_eq!("ReadOnly".parse::<Preset>().unwrap(), Preset::Readonly);
        assert!(matches!(
            "bulk".parse::<Preset>(),
            Err(AdmissionError::UnknownPreset(name)) if name == "bulk"
        ));
    }

    #[test]
    fn test_policy_deserialize_validates() {
        let policy: WindowPolicy =
            serde_yaml::from_str("max_requests: 3\nwindow_ms: 1000\n").unwrap();
        assert_eq!(policy.max_requests(), 3);

        let err = serde_yaml::from_str::<WindowPolicy>("max_requests: 0\nwindow_ms: 1000\n");
        assert!(err.is_err());
    }

    #[test]
    fn test_table_overrides_from_yaml() {
        let yaml = r#"
auth:
  max_requests: 3
  window_ms: 60000
upload:
  max_requests: 1
  window_ms: 1000
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.get(Preset::Auth).max_requests(), 3);
        assert_eq!(table.get(Preset::Upload).window_ms(), 1000);
        // Untouched presets keep their defaults
        assert_eq!(table.get(Preset::Api), Preset::Api.default_policy());
    }

    #[test]
    fn test_table_rejects_unknown_preset() {
        let yaml = r#"
bulk:
  max_requests: 3
  window_ms: 60000
"#;
        assert!(matches!(
            PolicyTable::from_yaml(yaml),
            Err(AdmissionError::UnknownPreset(_))
        ));
    }

    #[test]
    fn test_longest_window() {
        assert_eq!(
            PolicyTable::new().longest_window(),
            Duration::from_secs(15 * 60)
        );
    }
}
