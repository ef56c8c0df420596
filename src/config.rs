//! Knobs for a [`MemCheck`](crate::MemCheck). Everything is a named field; there
//! are no global debug bits.

use std::{env, path::PathBuf};

use crate::{alloc::history::DEFAULT_FREE_HISTORY_LEN, error::ConfigError};

/// Ledger slots available by default
pub const DEFAULT_MAX_ALLOC_LIST: usize = 32768;

/// Which event classes also go to the `log` facade (target `memcheck`), on
/// top of the event log itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MirrorConfig {
    pub allocations: bool,
    pub releases: bool,
    pub resizes: bool,
    /// Null frees, unknown pointers, overruns
    pub anomalies: bool,
}

impl MirrorConfig {
    pub const fn all() -> Self {
        Self {
            allocations: true,
            releases: true,
            resizes: true,
            anomalies: true,
        }
    }

    /// Parse a comma separated list such as `alloc,free,anomaly` (or `all`)
    pub fn parse(list: &str) -> Option<Self> {
        let mut mirror = Self::default();
        for class in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match class {
                "all" => mirror = Self::all(),
                "alloc" => mirror.allocations = true,
                "free" => mirror.releases = true,
                "realloc" => mirror.resizes = true,
                "anomaly" => mirror.anomalies = true,
                _ => return None,
            }
        }
        Some(mirror)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemCheckConfig {
    /// Send the event log to stderr instead of a file
    pub console_only: bool,
    pub mirror: MirrorConfig,
    /// Directory the `<program>_mem.<pid>.log` file is created in
    pub log_dir: PathBuf,
    /// Ledger capacity. Running out aborts the process.
    pub max_alloc_list: usize,
    pub free_history_len: usize,
}

impl Default for MemCheckConfig {
    fn default() -> Self {
        Self {
            console_only: false,
            mirror: MirrorConfig::default(),
            log_dir: PathBuf::from("/tmp"),
            max_alloc_list: DEFAULT_MAX_ALLOC_LIST,
            free_history_len: DEFAULT_FREE_HISTORY_LEN,
        }
    }
}

impl MemCheckConfig {
    pub fn with_console_only(mut self, console_only: bool) -> Self {
        self.console_only = console_only;
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorConfig) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_max_alloc_list(mut self, max_alloc_list: usize) -> Self {
        self.max_alloc_list = max_alloc_list;
        self
    }

    pub fn with_free_history_len(mut self, free_history_len: usize) -> Self {
        self.free_history_len = free_history_len;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_alloc_list == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.free_history_len == 0 {
            return Err(ConfigError::ZeroFreeHistory);
        }
        Ok(())
    }

    /// Defaults, overridden by
    ///
    /// - `MEMCHECK_CONSOLE` (`1`/`true`/`yes`)
    /// - `MEMCHECK_LOG_DIR`
    /// - `MEMCHECK_MAX_ALLOC_LIST`
    /// - `MEMCHECK_MIRROR` (see [`MirrorConfig::parse()`])
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&'static str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup("MEMCHECK_CONSOLE") {
            config.console_only = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => return Err(bad_env("MEMCHECK_CONSOLE", value)),
            };
        }
        if let Some(value) = lookup("MEMCHECK_LOG_DIR") {
            config.log_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("MEMCHECK_MAX_ALLOC_LIST") {
            config.max_alloc_list = value
                .parse()
                .map_err(|_| bad_env("MEMCHECK_MAX_ALLOC_LIST", value.clone()))?;
        }
        if let Some(value) = lookup("MEMCHECK_MIRROR") {
            config.mirror =
                MirrorConfig::parse(&value).ok_or_else(|| bad_env("MEMCHECK_MIRROR", value.clone()))?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn bad_env(var: &'static str, value: String) -> ConfigError {
    ConfigError::BadEnv { var, value }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = MemCheckConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.max_alloc_list, DEFAULT_MAX_ALLOC_LIST);
        assert!(!config.console_only);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = MemCheckConfig::default().with_max_alloc_list(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
        let config = MemCheckConfig::default().with_free_history_len(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroFreeHistory));
    }

    #[test]
    fn environment_overrides() {
        let config = MemCheckConfig::from_lookup(lookup(&[
            ("MEMCHECK_CONSOLE", "yes"),
            ("MEMCHECK_LOG_DIR", "/var/tmp"),
            ("MEMCHECK_MAX_ALLOC_LIST", "100"),
            ("MEMCHECK_MIRROR", "alloc, anomaly"),
        ]))
        .unwrap();
        assert!(config.console_only);
        assert_eq!(config.log_dir, PathBuf::from("/var/tmp"));
        assert_eq!(config.max_alloc_list, 100);
        assert_eq!(
            config.mirror,
            MirrorConfig {
                allocations: true,
                anomalies: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn bad_environment_is_reported() {
        let err = MemCheckConfig::from_lookup(lookup(&[("MEMCHECK_MAX_ALLOC_LIST", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { var: "MEMCHECK_MAX_ALLOC_LIST", .. }));
        let err = MemCheckConfig::from_lookup(lookup(&[("MEMCHECK_MIRROR", "everything")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadEnv { var: "MEMCHECK_MIRROR", .. }));
        let err = MemCheckConfig::from_lookup(lookup(&[("MEMCHECK_MAX_ALLOC_LIST", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroCapacity);
    }
}
