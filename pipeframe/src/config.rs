//! Small, optional configuration surface (ambient stack addition; not
//! present in spec.md, which is silent on configuration). Grounded on
//! `formframe`'s YAML-backed config loading (`formframe/src/load/*`),
//! scaled down: this crate's actual configurable surface is two
//! values, so the config type stays a flat struct rather than
//! reproducing the teacher's filter-graph config arena.

use {
    crate::error::{Err, Result},
    serde::Deserialize,
    std::{path::Path, time::Duration},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overrides the bare executable name passed to `Supervisor::new`.
    /// Useful in tests and in deployments that vendor a specific build.
    pub ffmpeg_executable: Option<String>,
    /// Executor quiesce timeout, in milliseconds. Defaults to the
    /// 10,000 ms spec.md §4.4 step 6 pins. Read by `pipeframe-cli` and
    /// handed to `Supervisor::with_quiesce_timeout`.
    pub quiesce_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ffmpeg_executable: None,
            quiesce_timeout_ms: 10_000,
        }
    }
}

impl Config {
    pub fn quiesce_timeout(&self) -> Duration {
        Duration::from_millis(self.quiesce_timeout_ms)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Err::IllegalState(leak(e.to_string())).into())
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }
}

/// `Err::IllegalState` carries a `&'static str` (it's meant for fixed,
/// compile-time messages); a parse error message is dynamic, so it's
/// leaked once here rather than threading a lifetime through the whole
/// error enum for a path that's only exercised at startup.
fn leak(message: String) -> &'static str {
    Box::leak(message.into_boxed_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_quiesce_budget() {
        let cfg = Config::default();
        assert_eq!(cfg.quiesce_timeout(), Duration::from_millis(10_000));
    }

    #[test]
    fn parses_partial_yaml_with_defaults() {
        let cfg = Config::from_yaml_str("ffmpeg_executable: /opt/ffmpeg/bin/ffmpeg\n").unwrap();
        assert_eq!(cfg.ffmpeg_executable.as_deref(), Some("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(cfg.quiesce_timeout_ms, 10_000);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(Config::from_yaml_str(": not valid yaml :::").is_err());
    }
}
