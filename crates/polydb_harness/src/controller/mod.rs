//! Per-engine controllers: provision, readiness, init script, teardown.

mod factory;
mod mysql;
mod oceanbase;

pub use factory::ControllerFactory;
pub use mysql::{mysql_container_spec, MySqlController, MYSQL_DATABASE};
pub use oceanbase::{
    oceanbase_container_spec, AdminConnector, ClusterAdmin, OceanBaseController, SqlClusterAdmin,
    OCEANBASE_DATABASE, OCEANBASE_TENANT,
};

use crate::backend::BackendKind;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use crate::provider::{ContainerProvider, Credentials, Endpoint};
use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

/// Lifecycle of a controller's single container.
///
/// `Idle -> Provisioning -> Running -> ReadinessPending -> Ready`, with
/// `Failed` reachable from the in-between states and `Stopped` from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Provisioning,
    Running,
    ReadinessPending,
    Ready,
    Failed,
    Stopped,
}

impl ControllerState {
    pub fn can_transition_to(self, next: ControllerState) -> bool {
        use ControllerState::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Idle, Provisioning) => true,
            (Provisioning, Running) | (Provisioning, Failed) => true,
            (Running, ReadinessPending) | (Running, Failed) => true,
            (ReadinessPending, Ready) | (ReadinessPending, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Owns provisioning, readiness, initialization and teardown of one backend instance.
#[async_trait]
pub trait BackendController: Send {
    fn backend(&self) -> BackendKind;

    fn state(&self) -> ControllerState;

    /// Start the container and return a descriptor that accepts connections.
    async fn start_container(&mut self) -> Result<ConnectionDescriptor>;

    /// Block until the instance can serve queries. Most engines need nothing extra.
    async fn wait_for_ready(&mut self) -> Result<()> {
        Ok(())
    }

    /// Run an init script against `descriptor`. Blank references are a no-op.
    async fn execute_init_script(
        &mut self,
        descriptor: &ConnectionDescriptor,
        script: &str,
    ) -> Result<()>;

    /// Release the container. Safe to call repeatedly and before any start.
    async fn stop_container(&mut self);

    fn is_running(&self) -> bool;
}

/// The provider plus lifecycle bookkeeping shared by every controller.
pub(crate) struct ContainerHandle {
    backend: BackendKind,
    provider: Box<dyn ContainerProvider>,
    state: ControllerState,
}

impl ContainerHandle {
    pub(crate) fn new(backend: BackendKind, provider: Box<dyn ContainerProvider>) -> Self {
        Self {
            backend,
            provider,
            state: ControllerState::Idle,
        }
    }

    pub(crate) fn state(&self) -> ControllerState {
        self.state
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        self.provider.credentials()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.provider.is_running()
    }

    pub(crate) fn transition(&mut self, next: ControllerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HarnessError::invalid_state(format!(
                "{} controller cannot go from {} to {}",
                self.backend, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Mark the in-flight start as failed and hand the error back.
    pub(crate) fn fail(&mut self, err: HarnessError) -> HarnessError {
        self.state = ControllerState::Failed;
        err
    }

    /// Start the container and resolve its endpoint.
    pub(crate) async fn provision(&mut self) -> Result<Endpoint> {
        self.transition(ControllerState::Provisioning)?;
        info!(backend = %self.backend, "Starting {} container", self.backend);

        let started = match self.provider.start().await {
            Ok(()) => self.provider.endpoint().await,
            Err(e) => Err(e),
        };
        let endpoint = started.map_err(|source| {
            self.fail(HarnessError::Provision {
                backend: self.backend,
                source,
            })
        })?;

        self.transition(ControllerState::Running)?;
        info!(backend = %self.backend, host = %endpoint.host, port = endpoint.port, "Container running");
        Ok(endpoint)
    }

    pub(crate) async fn release(&mut self) {
        if self.provider.is_running() {
            match self.provider.stop().await {
                Ok(()) => info!(backend = %self.backend, "{} container stopped", self.backend),
                Err(e) => warn!(backend = %self.backend, error = %e, "Failed to stop container"),
            }
        }
        self.state = ControllerState::Stopped;
    }

    pub(crate) fn ensure_ready(&self, action: &str) -> Result<()> {
        if self.state != ControllerState::Ready {
            return Err(HarnessError::invalid_state(format!(
                "cannot {} while {} controller is {}",
                action, self.backend, self.state
            )));
        }
        Ok(())
    }
}
