//! MySQL controller.

use super::{BackendController, ContainerHandle, ControllerState};
use crate::backend::BackendKind;
use crate::descriptor::ConnectionDescriptor;
use crate::error::Result;
use crate::provider::{ContainerProvider, ContainerSpec, Credentials, StartupMessage};
use crate::script::ScriptRunner;
use async_trait::async_trait;
use tracing::info;

/// Database created in the container and used by tests.
pub const MYSQL_DATABASE: &str = "security";

const ROOT_USER: &str = "root";
const ROOT_PASSWORD: &str = "password";

/// Logged by the final server only; the init-time server listens on port 0.
const READY_MESSAGE: &str = "port: 3306  MySQL Community Server";

/// Container spec for a MySQL instance from `image`.
pub fn mysql_container_spec(image: &str) -> ContainerSpec {
    ContainerSpec {
        image: image.to_string(),
        container_port: BackendKind::MySql.container_port(),
        env: vec![
            ("MYSQL_ROOT_PASSWORD".to_string(), ROOT_PASSWORD.to_string()),
            ("MYSQL_DATABASE".to_string(), MYSQL_DATABASE.to_string()),
        ],
        startup_message: StartupMessage::Stderr(READY_MESSAGE.to_string()),
        startup_timeout: BackendKind::MySql.startup_timeout(),
        credentials: Credentials::new(ROOT_USER, ROOT_PASSWORD),
    }
}

/// Provisions MySQL. Ready as soon as the provider reports it started.
pub struct MySqlController {
    container: ContainerHandle,
    scripts: ScriptRunner,
}

impl MySqlController {
    pub fn new(provider: Box<dyn ContainerProvider>, scripts: ScriptRunner) -> Self {
        Self {
            container: ContainerHandle::new(BackendKind::MySql, provider),
            scripts,
        }
    }
}

#[async_trait]
impl BackendController for MySqlController {
    fn backend(&self) -> BackendKind {
        BackendKind::MySql
    }

    fn state(&self) -> ControllerState {
        self.container.state()
    }

    async fn start_container(&mut self) -> Result<ConnectionDescriptor> {
        let endpoint = self.container.provision().await?;
        let descriptor = ConnectionDescriptor::for_endpoint(
            BackendKind::MySql,
            &endpoint,
            self.container.credentials(),
            MYSQL_DATABASE,
        )
        .map_err(|e| self.container.fail(e))?;

        self.container.transition(ControllerState::ReadinessPending)?;
        if let Err(e) = self.wait_for_ready().await {
            return Err(self.container.fail(e));
        }
        self.container.transition(ControllerState::Ready)?;

        info!(url = %descriptor.url(), "MySQL ready");
        Ok(descriptor)
    }

    async fn execute_init_script(
        &mut self,
        descriptor: &ConnectionDescriptor,
        script: &str,
    ) -> Result<()> {
        if script.trim().is_empty() {
            return Ok(());
        }
        self.container.ensure_ready("execute init script")?;
        self.scripts.run(descriptor, script).await?;
        Ok(())
    }

    async fn stop_container(&mut self) {
        self.container.release().await;
    }

    fn is_running(&self) -> bool {
        self.container.is_running()
    }
}
