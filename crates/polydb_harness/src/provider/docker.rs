//! Docker-backed provider built on testcontainers.

use super::{ContainerProvider, ContainerSpec, Credentials, Endpoint, StartupMessage};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Command;
use std::time::{Duration, Instant};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info};

/// Interval between port checks.
const PORT_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Check if Docker is available on the system.
pub fn is_docker_available() -> bool {
    Command::new("docker")
        .arg("info")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Wait until `host:port` accepts TCP connections.
pub async fn wait_for_port(host: &str, port: u16, limit: Duration) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let start = Instant::now();

    loop {
        if TcpStream::connect(&addr).await.is_ok() {
            debug!("{} accepting connections after {:?}", addr, start.elapsed());
            return Ok(());
        }

        if start.elapsed() > limit {
            bail!("Timeout waiting for {} to accept connections after {:?}", addr, limit);
        }

        sleep(PORT_CHECK_INTERVAL).await;
    }
}

/// Runs one container per provider instance.
pub struct DockerProvider {
    spec: ContainerSpec,
    container: Option<ContainerAsync<GenericImage>>,
}

impl DockerProvider {
    pub fn new(spec: ContainerSpec) -> Self {
        Self {
            spec,
            container: None,
        }
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn start(&mut self) -> Result<()> {
        if self.container.is_some() {
            bail!("Container for {} already started", self.spec.image);
        }

        let (name, tag) = self.spec.image_parts();
        let wait = match &self.spec.startup_message {
            StartupMessage::Stdout(msg) => WaitFor::message_on_stdout(msg.clone()),
            StartupMessage::Stderr(msg) => WaitFor::message_on_stderr(msg.clone()),
        };

        info!(image = %self.spec.image, "Starting container");

        let mut request = GenericImage::new(name, tag)
            .with_exposed_port(self.spec.container_port.tcp())
            .with_wait_for(wait)
            .with_startup_timeout(self.spec.startup_timeout);
        for (key, value) in &self.spec.env {
            request = request.with_env_var(key, value);
        }

        let container = request
            .start()
            .await
            .with_context(|| format!("Failed to start container {}", self.spec.image))?;
        let host = container.get_host().await?.to_string();
        let port = container
            .get_host_port_ipv4(self.spec.container_port.tcp())
            .await?;
        self.container = Some(container);

        wait_for_port(&host, port, self.spec.startup_timeout).await?;
        info!(image = %self.spec.image, %host, port, "Container started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(container) = self.container.take() {
            container
                .stop()
                .await
                .with_context(|| format!("Failed to stop container {}", self.spec.image))?;
            info!(image = %self.spec.image, "Container stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.container.is_some()
    }

    async fn endpoint(&self) -> Result<Endpoint> {
        let container = self
            .container
            .as_ref()
            .with_context(|| format!("Container {} is not running", self.spec.image))?;
        Ok(Endpoint {
            host: container.get_host().await?.to_string(),
            port: container
                .get_host_port_ipv4(self.spec.container_port.tcp())
                .await?,
        })
    }

    fn credentials(&self) -> &Credentials {
        &self.spec.credentials
    }
}
