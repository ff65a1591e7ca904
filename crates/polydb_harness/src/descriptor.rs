//! Resolved connection details for a live backend instance.

use crate::backend::BackendKind;
use crate::error::Result;
use crate::provider::{Credentials, Endpoint};
use sqlx::mysql::MySqlConnectOptions;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Reachable endpoint plus credentials, produced once per successful provisioning.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    backend: BackendKind,
    url: String,
    username: String,
    password: String,
    driver_id: String,
}

impl ConnectionDescriptor {
    /// Create a descriptor using the backend's default driver.
    pub fn new(
        backend: BackendKind,
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            url: url.into(),
            username: username.into(),
            password: password.into(),
            driver_id: backend.driver_id().to_string(),
        }
    }

    /// Build `<driver>://host:port/database` for a provider endpoint.
    pub fn for_endpoint(
        backend: BackendKind,
        endpoint: &Endpoint,
        credentials: &Credentials,
        database: &str,
    ) -> Result<Self> {
        let mut url = Url::parse(&format!(
            "{}://{}:{}",
            backend.driver_id(),
            endpoint.host,
            endpoint.port
        ))?;
        url.set_path(&format!("/{}", database));

        Ok(Self::new(
            backend,
            url.as_str(),
            &credentials.username,
            &credentials.password,
        ))
    }

    /// Override the driver identifier.
    pub fn with_driver_id(mut self, driver_id: impl Into<String>) -> Self {
        self.driver_id = driver_id.into();
        self
    }

    /// Same endpoint and credentials, different database.
    pub fn with_database(&self, database: &str) -> Result<Self> {
        let mut url = Url::parse(&self.url)?;
        url.set_path(&format!("/{}", database));
        Ok(Self {
            url: url.to_string(),
            ..self.clone()
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Display name of the backend.
    pub fn name(&self) -> &'static str {
        self.backend.display_name()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    /// Database named in the URL path, if any.
    pub fn database(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .map(|url| url.path().trim_start_matches('/').to_string())
            .filter(|db| !db.is_empty())
    }

    /// sqlx connect options for this descriptor.
    ///
    /// Credentials are applied separately so user names such as `root@sys`
    /// never need URL escaping.
    pub fn connect_options(&self) -> Result<MySqlConnectOptions> {
        Ok(MySqlConnectOptions::from_str(&self.url)?
            .username(&self.username)
            .password(&self.password))
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("driver_id", &self.driver_id)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} as {}",
            self.backend.display_name(),
            self.url,
            self.username
        )
    }
}
