//! Harness settings with environment overrides.

use crate::backend::BackendKind;
use crate::pool::PoolSettings;
use crate::readiness::ReadinessPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_SCRIPT_DIR: &str = "POLYDB_SCRIPT_DIR";
pub const ENV_MYSQL_IMAGE: &str = "POLYDB_MYSQL_IMAGE";
pub const ENV_OCEANBASE_IMAGE: &str = "POLYDB_OCEANBASE_IMAGE";
pub const ENV_READINESS_INTERVAL_SECS: &str = "POLYDB_READINESS_INTERVAL_SECS";
pub const ENV_READINESS_MAX_ATTEMPTS: &str = "POLYDB_READINESS_MAX_ATTEMPTS";
pub const ENV_READINESS_FAIL_FAST: &str = "POLYDB_READINESS_FAIL_FAST";
pub const ENV_POOL_MAX_CONNECTIONS: &str = "POLYDB_POOL_MAX_CONNECTIONS";
pub const ENV_POOL_MIN_IDLE: &str = "POLYDB_POOL_MIN_IDLE";

/// Everything tunable about a harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessSettings {
    /// Root directory init scripts are resolved against
    pub script_dir: PathBuf,
    pub mysql_image: String,
    pub oceanbase_image: String,
    pub readiness: ReadinessPolicy,
    pub pool: PoolSettings,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
            mysql_image: BackendKind::MySql.default_image().to_string(),
            oceanbase_image: BackendKind::OceanBase.default_image().to_string(),
            readiness: ReadinessPolicy::default(),
            pool: PoolSettings::default(),
        }
    }
}

/// `<crate under test>/resources` when run by cargo, `./resources` otherwise.
fn default_script_dir() -> PathBuf {
    std::env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("resources")
}

impl HarnessSettings {
    /// Defaults overridden by `POLYDB_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `POLYDB_*` key.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(dir) = lookup(ENV_SCRIPT_DIR).filter(|v| !v.trim().is_empty()) {
            settings.script_dir = PathBuf::from(dir.trim());
        }
        if let Some(image) = lookup(ENV_MYSQL_IMAGE).filter(|v| !v.trim().is_empty()) {
            settings.mysql_image = image.trim().to_string();
        }
        if let Some(image) = lookup(ENV_OCEANBASE_IMAGE).filter(|v| !v.trim().is_empty()) {
            settings.oceanbase_image = image.trim().to_string();
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_READINESS_INTERVAL_SECS) {
            settings.readiness.interval = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_READINESS_MAX_ATTEMPTS) {
            if attempts == 0 {
                warn!(key = ENV_READINESS_MAX_ATTEMPTS, "Ignoring zero attempt budget");
            } else {
                settings.readiness.max_attempts = attempts;
            }
        }
        if let Some(value) = lookup(ENV_READINESS_FAIL_FAST) {
            settings.readiness.fail_fast_on_fatal = is_truthy(&value);
        }
        if let Some(max) = parse_var::<u32>(&lookup, ENV_POOL_MAX_CONNECTIONS) {
            settings.pool.max_connections = max.max(1);
        }
        if let Some(min) = parse_var::<u32>(&lookup, ENV_POOL_MIN_IDLE) {
            settings.pool.min_idle = min;
        }
        settings.pool.min_idle = settings.pool.min_idle.min(settings.pool.max_connections);

        settings
    }

    /// Image to run for `kind`.
    pub fn image_for(&self, kind: BackendKind) -> &str {
        match kind {
            BackendKind::MySql => &self.mysql_image,
            BackendKind::OceanBase => &self.oceanbase_image,
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring invalid setting");
            None
        }
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
