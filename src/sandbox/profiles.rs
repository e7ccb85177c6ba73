/*!
 * Limit Profiles
 * Named resource presets codifying intent for common execution classes
 */

use super::types::ExecLimits;
use std::collections::HashMap;
use std::time::Duration;

/// Table of named limit presets. Ships with four built-ins:
///
/// - `default`: wall=30s, everything else unbounded
/// - `prep`: wall=60s, cpu=15s, rss=512MB (setup/build scripts)
/// - `handler`: wall=5s, cpu=2s, rss=256MB (untrusted skill code, hot path)
/// - `tool`: wall=15s, cpu=5s, rss=512MB (ad-hoc tool invocations)
#[derive(Debug, Clone)]
pub struct ProfileTable {
    profiles: HashMap<String, ExecLimits>,
}

impl ProfileTable {
    /// Built-in limits applied when neither explicit limits nor a known
    /// profile are given
    fn builtin_default() -> ExecLimits {
        ExecLimits::unbounded().with_wall_time(Duration::from_secs(30))
    }

    /// Add or override a named profile
    pub fn with_profile(mut self, name: impl Into<String>, limits: ExecLimits) -> Self {
        self.profiles.insert(name.into(), limits);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ExecLimits> {
        self.profiles.get(name)
    }

    /// Resolve a profile name to effective limits. Unknown or absent names
    /// fall back to the `default` profile.
    pub fn resolve(&self, profile: Option<&str>) -> ExecLimits {
        let name = profile.unwrap_or("default");
        self.profiles
            .get(name)
            .or_else(|| self.profiles.get("default"))
            .cloned()
            .unwrap_or_else(Self::builtin_default)
    }
}

impl Default for ProfileTable {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert("default".to_string(), Self::builtin_default());
        profiles.insert(
            "prep".to_string(),
            ExecLimits::unbounded()
                .with_wall_time(Duration::from_secs(60))
                .with_cpu_time(Duration::from_secs(15))
                .with_max_rss_mb(512),
        );
        profiles.insert(
            "handler".to_string(),
            ExecLimits::unbounded()
                .with_wall_time(Duration::from_secs(5))
                .with_cpu_time(Duration::from_secs(2))
                .with_max_rss_mb(256),
        );
        profiles.insert(
            "tool".to_string(),
            ExecLimits::unbounded()
                .with_wall_time(Duration::from_secs(15))
                .with_cpu_time(Duration::from_secs(5))
                .with_max_rss_mb(512),
        );
        Self { profiles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let table = ProfileTable::default();

        let handler = table.get("handler").unwrap();
        assert_eq!(handler.wall_time, Some(Duration::from_secs(5)));
        assert_eq!(handler.cpu_time, Some(Duration::from_secs(2)));
        assert_eq!(handler.max_rss_mb, Some(256));

        let default = table.get("default").unwrap();
        assert_eq!(default.wall_time, Some(Duration::from_secs(30)));
        assert_eq!(default.cpu_time, None);
    }

    #[test]
    fn test_resolve_unknown_falls_back_to_default() {
        let table = ProfileTable::default();
        let limits = table.resolve(Some("no-such-profile"));
        assert_eq!(limits.wall_time, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_override_profile() {
        let table = ProfileTable::default().with_profile(
            "handler",
            ExecLimits::unbounded().with_wall_time(Duration::from_secs(1)),
        );
        assert_eq!(
            table.resolve(Some("handler")).wall_time,
            Some(Duration::from_secs(1))
        );
    }
}
