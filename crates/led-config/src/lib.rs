//! Program-wide constants and an optional TOML override file.
//!
//! Mirrors the teacher's config-context split: a `ConfigFile` holds the raw
//! parsed (or default) values, a `StripContext` carries facts only known at
//! call time (whether the caller is running in test/mock mode), and
//! `Config::apply_context` folds the two into the `EffectiveLimits` the rest
//! of the workspace actually consumes.

use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct StripConfig {
    #[serde(default = "StripConfig::default_count")]
    pub count: u32,
}

impl Default for StripConfig {
    fn default() -> Self {
        Self {
            count: Self::default_count(),
        }
    }
}

impl StripConfig {
    const fn default_count() -> u32 {
        100
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_runtime_secs")]
    pub runtime_secs: u32,
    #[serde(default = "LimitsConfig::default_test_time_secs")]
    pub test_time_secs: u32,
    #[serde(default = "LimitsConfig::default_max_sleep_secs")]
    pub max_sleep_secs: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            runtime_secs: Self::default_runtime_secs(),
            test_time_secs: Self::default_test_time_secs(),
            max_sleep_secs: Self::default_max_sleep_secs(),
        }
    }
}

impl LimitsConfig {
    const fn default_runtime_secs() -> u32 {
        180
    }
    const fn default_test_time_secs() -> u32 {
        40
    }
    const fn default_max_sleep_secs() -> u32 {
        60
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub strip: StripConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Facts known only at call time, not from the file: is this a mock/test
/// run (uses `test_time_secs` instead of `runtime_secs`)?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripContext {
    pub test_mode: bool,
}

impl StripContext {
    pub const fn new(test_mode: bool) -> Self {
        Self { test_mode }
    }

    pub const fn live() -> Self {
        Self::new(false)
    }

    pub const fn test() -> Self {
        Self::new(true)
    }
}

/// The values the rest of the workspace actually consumes, after folding a
/// [`StripContext`] into the raw file data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLimits {
    pub pixel_count: usize,
    pub runtime_cap_secs: u64,
    pub max_sleep_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
    pub effective: Option<EffectiveLimits>,
}

/// Best-effort config path: a `led.toml` in the current working directory.
pub fn discover() -> PathBuf {
    PathBuf::from("led.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Config {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => Config {
                raw: Some(content),
                file,
                effective: None,
            },
            Err(e) => {
                tracing::warn!(target: "config", error = %e, path = %path.display(), "config_parse_failed_using_defaults");
                Config::default()
            }
        }
    } else {
        Config::default()
    }
}

impl Config {
    /// Folds a [`StripContext`] into the raw file values. `max_sleep_secs`
    /// is clamped so it can never exceed whichever runtime cap applies —
    /// a sleep longer than the program's own wall-clock budget can never
    /// complete.
    pub fn apply_context(&mut self, ctx: StripContext) -> EffectiveLimits {
        let runtime_cap_secs = if ctx.test_mode {
            self.file.limits.test_time_secs
        } else {
            self.file.limits.runtime_secs
        } as u64;

        let raw_max_sleep = self.file.limits.max_sleep_secs as u64;
        let max_sleep_secs = raw_max_sleep.min(runtime_cap_secs);

        if max_sleep_secs != raw_max_sleep {
            info!(
                target: "config",
                raw_max_sleep,
                clamped = max_sleep_secs,
                runtime_cap_secs,
                test_mode = ctx.test_mode,
                "max_sleep_secs_clamped"
            );
        }

        let effective = EffectiveLimits {
            pixel_count: self.file.strip.count as usize,
            runtime_cap_secs,
            max_sleep_secs,
        };
        self.effective = Some(effective);
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_led_config__.toml")));
        assert_eq!(cfg.file.strip.count, 100);
        assert_eq!(cfg.file.limits.runtime_secs, 180);
        assert_eq!(cfg.file.limits.test_time_secs, 40);
        assert_eq!(cfg.file.limits.max_sleep_secs, 60);
    }

    #[test]
    fn parses_strip_count_and_limits() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[strip]\ncount = 250\n[limits]\nruntime_secs = 90\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf()));
        assert_eq!(cfg.file.strip.count, 250);
        assert_eq!(cfg.file.limits.runtime_secs, 90);
        assert_eq!(cfg.file.limits.test_time_secs, 40);
    }

    #[test]
    fn live_context_uses_runtime_cap() {
        let mut cfg = load_from(Some(PathBuf::from("__nonexistent_led_config__.toml")));
        let eff = cfg.apply_context(StripContext::live());
        assert_eq!(eff.runtime_cap_secs, 180);
        assert_eq!(eff.pixel_count, 100);
    }

    #[test]
    fn test_context_uses_test_time_cap() {
        let mut cfg = load_from(Some(PathBuf::from("__nonexistent_led_config__.toml")));
        let eff = cfg.apply_context(StripContext::test());
        assert_eq!(eff.runtime_cap_secs, 40);
    }

    #[test]
    fn max_sleep_clamps_to_runtime_cap_in_test_mode() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[limits]\nmax_sleep_secs = 60\ntest_time_secs = 10\n").unwrap();
        let mut cfg = load_from(Some(tmp.path().to_path_buf()));
        let eff = cfg.apply_context(StripContext::test());
        assert_eq!(eff.runtime_cap_secs, 10);
        assert_eq!(eff.max_sleep_secs, 10);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid toml [[[").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf()));
        assert_eq!(cfg.file.strip.count, 100);
    }

    #[test]
    fn malformed_file_logs_the_fallback_warning() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "not valid toml [[[").unwrap();
        let path = tmp.path().to_path_buf();

        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::WARN)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();

        let cfg = with_default(subscriber, || load_from(Some(path)));

        let log_output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(log_output.contains("WARN config:"));
        assert!(log_output.contains("config_parse_failed_using_defaults"));
        assert_eq!(cfg.file.strip.count, 100);
    }
}
