//! Container provisioning seam.
//!
//! Controllers never talk to Docker directly; they drive a [`ContainerProvider`].
//! [`DockerProvider`] is the default implementation, tests substitute fakes.

mod docker;

pub use docker::{is_docker_available, wait_for_port, DockerProvider};

use async_trait::async_trait;
use std::time::Duration;

/// Username/password pair for a provisioned instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Host-reachable address of a running container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Where the provider looks for the "started" log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupMessage {
    Stdout(String),
    Stderr(String),
}

/// Everything a provider needs to start one database container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Image reference, `name:tag`
    pub image: String,
    /// Port the database listens on inside the container
    pub container_port: u16,
    pub env: Vec<(String, String)>,
    pub startup_message: StartupMessage,
    pub startup_timeout: Duration,
    pub credentials: Credentials,
}

impl ContainerSpec {
    /// Split the image reference into name and tag (`latest` if untagged).
    pub fn image_parts(&self) -> (&str, &str) {
        match self.image.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (self.image.as_str(), "latest"),
        }
    }
}

/// Capability to run one database container.
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Start the container and return once its endpoint accepts connections.
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Stop and remove the container. No-op if not running.
    async fn stop(&mut self) -> anyhow::Result<()>;

    fn is_running(&self) -> bool;

    /// Host address and mapped port of the database.
    async fn endpoint(&self) -> anyhow::Result<Endpoint>;

    fn credentials(&self) -> &Credentials;
}
