//! Multi-database test harness
//!
//! Runs the same test logic against a MySQL and an OceanBase container, one
//! after the other, redirecting a single process-wide connection pool at each
//! backend in turn.
//!
//! # Features
//!
//! - `docker-tests`: Enable tests that start real containers
//!
//! # Usage
//!
//! ```rust,ignore
//! use polydb_harness::{
//!     shared_pool, shared_pool_with, BackendRunConfig, ControllerFactory, HarnessSettings,
//!     Orchestrator,
//! };
//!
//! let settings = HarnessSettings::from_env();
//! let orchestrator = Orchestrator::new(
//!     ControllerFactory::from_settings(&settings),
//!     shared_pool_with(&settings),
//! );
//!
//! let config = BackendRunConfig::mysql_and_oceanbase("init_mysql.sql", "");
//! orchestrator
//!     .run(&config, |descriptor| async move {
//!         let mut conn = shared_pool().acquire().await?;
//!         sqlx::query("SELECT 1").execute(&mut **conn).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

pub mod backend;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod error;
pub mod injection;
pub mod orchestrator;
pub mod pool;
pub mod provider;
pub mod readiness;
pub mod run_config;
pub mod script;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use backend::BackendKind;
pub use config::HarnessSettings;
pub use controller::{BackendController, ControllerFactory, ControllerState};
pub use descriptor::ConnectionDescriptor;
pub use error::{HarnessError, Result};
pub use injection::{
    datasource_overrides, pool_from_settings, shared_pool, shared_pool_with,
    DATASOURCE_OVERRIDE_KEYS,
};
pub use orchestrator::{BackendRun, Orchestrator, RunReport};
pub use pool::{PoolSettings, SwitchableConnection, SwitchableMySqlPool, SwitchablePool};
pub use provider::{is_docker_available, ContainerProvider, DockerProvider};
pub use readiness::ReadinessPolicy;
pub use run_config::BackendRunConfig;
