//! Runs test logic once per configured backend.
//!
//! Backends run strictly one after another: provision, optional init script,
//! redirect the shared pool, test logic, teardown. The first failure stops
//! the run after that backend's teardown.

use crate::backend::BackendKind;
use crate::controller::{BackendController, ControllerFactory};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use crate::pool::{MySqlPoolFactory, PoolFactory, SwitchablePool};
use crate::run_config::BackendRunConfig;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Outcome of a fully successful run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub backends: Vec<BackendRun>,
}

/// One backend's share of a run.
#[derive(Debug, Clone, Serialize)]
pub struct BackendRun {
    pub backend: BackendKind,
    pub url: String,
    /// Pool generation the test logic ran under
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

pub struct Orchestrator<F: PoolFactory = MySqlPoolFactory> {
    factory: ControllerFactory,
    pool: Arc<SwitchablePool<F>>,
}

impl<F: PoolFactory> Orchestrator<F> {
    pub fn new(factory: ControllerFactory, pool: Arc<SwitchablePool<F>>) -> Self {
        Self { factory, pool }
    }

    /// The pool redirected before each backend's test logic.
    pub fn pool(&self) -> &Arc<SwitchablePool<F>> {
        &self.pool
    }

    /// Run `logic` against every backend in `config`, in order.
    ///
    /// Errors are wrapped in [`HarnessError::BackendFailed`] and end the run;
    /// later backends are never started. Every started controller is stopped
    /// exactly once, including when `logic` panics.
    pub async fn run<L, Fut>(&self, config: &BackendRunConfig, mut logic: L) -> Result<RunReport>
    where
        L: FnMut(ConnectionDescriptor) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let run_id = Uuid::new_v4();
        if config.is_empty() {
            warn!(%run_id, "No backends configured");
        }

        let mut backends = Vec::with_capacity(config.len());
        for (kind, script) in config.entries() {
            let span = info_span!("backend_run", %run_id, backend = %kind);
            let outcome = self
                .run_backend(kind, script, &mut logic)
                .instrument(span)
                .await;

            match outcome {
                Ok(run) => backends.push(run),
                Err(e) => {
                    error!(%run_id, backend = %kind, error = %e, "Backend run failed, aborting");
                    return Err(HarnessError::backend_failed(kind, e));
                }
            }
        }

        info!(%run_id, backends = backends.len(), "Run complete");
        Ok(RunReport { run_id, backends })
    }

    /// [`run`](Self::run) for a single backend.
    pub async fn run_single<L, Fut>(
        &self,
        kind: BackendKind,
        script: &str,
        logic: L,
    ) -> Result<RunReport>
    where
        L: FnMut(ConnectionDescriptor) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let config = BackendRunConfig::new().with_init_script(kind, script);
        self.run(&config, logic).await
    }

    async fn run_backend<L, Fut>(
        &self,
        kind: BackendKind,
        script: Option<&str>,
        logic: &mut L,
    ) -> Result<BackendRun>
    where
        L: FnMut(ConnectionDescriptor) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let mut controller = self.factory.create(kind)?;
        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = AssertUnwindSafe(self.drive(controller.as_mut(), script, logic))
            .catch_unwind()
            .await;

        controller.stop_container().await;

        match outcome {
            Ok(Ok((descriptor, generation))) => {
                let elapsed_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(generation, elapsed_ms, "Backend run passed");
                Ok(BackendRun {
                    backend: kind,
                    url: descriptor.url().to_string(),
                    generation,
                    started_at,
                    elapsed_ms,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(payload) => {
                error!("Test logic panicked, container released");
                panic::resume_unwind(payload)
            }
        }
    }

    async fn drive<L, Fut>(
        &self,
        controller: &mut dyn BackendController,
        script: Option<&str>,
        logic: &mut L,
    ) -> Result<(ConnectionDescriptor, u64)>
    where
        L: FnMut(ConnectionDescriptor) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let descriptor = controller.start_container().await?;

        if let Some(script) = script.filter(|s| !s.trim().is_empty()) {
            controller.execute_init_script(&descriptor, script).await?;
            info!(script, "Init script applied");
        }

        let generation = self.pool.switch_to(&descriptor).await?;
        logic(descriptor.clone())
            .await
            .map_err(HarnessError::TestLogic)?;

        Ok((descriptor, generation))
    }
}
