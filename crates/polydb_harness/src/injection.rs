//! Process-wide pool handle for application wiring.

use crate::config::HarnessSettings;
use crate::pool::{MySqlPoolFactory, SwitchableMySqlPool};
use std::sync::{Arc, OnceLock};

/// Settings a host application should blank out so it does not build a
/// competing pool of its own (`DATABASE_URL` is what sqlx tooling reads).
pub const DATASOURCE_OVERRIDE_KEYS: &[&str] = &[
    "DATABASE_URL",
    "DATABASE_USER",
    "DATABASE_PASSWORD",
];

static SHARED_POOL: OnceLock<Arc<SwitchableMySqlPool>> = OnceLock::new();

/// The one pool every component of the process should depend on.
///
/// Created unconfigured on first use, sized from [`HarnessSettings::from_env`];
/// hand the same handle to the orchestrator so its switches are visible here.
pub fn shared_pool() -> Arc<SwitchableMySqlPool> {
    SHARED_POOL
        .get_or_init(|| Arc::new(pool_from_settings(&HarnessSettings::from_env())))
        .clone()
}

/// Like [`shared_pool`], but sized from `settings` if this is the first call.
///
/// Later calls return the existing pool unchanged.
pub fn shared_pool_with(settings: &HarnessSettings) -> Arc<SwitchableMySqlPool> {
    SHARED_POOL
        .get_or_init(|| Arc::new(pool_from_settings(settings)))
        .clone()
}

/// An unconfigured MySQL switchable pool using `settings.pool`.
pub fn pool_from_settings(settings: &HarnessSettings) -> SwitchableMySqlPool {
    SwitchableMySqlPool::with_factory(MySqlPoolFactory, settings.pool)
}

/// [`DATASOURCE_OVERRIDE_KEYS`] paired with empty values.
pub fn datasource_overrides() -> Vec<(&'static str, String)> {
    DATASOURCE_OVERRIDE_KEYS
        .iter()
        .map(|key| (*key, String::new()))
        .collect()
}
