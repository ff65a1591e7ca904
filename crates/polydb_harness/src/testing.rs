//! In-process doubles for providers, pools and controllers.

use crate::backend::BackendKind;
use crate::controller::{BackendController, ControllerState};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use crate::pool::{ManagedPool, PoolFactory, PoolSettings, PoolStatus};
use crate::provider::{ContainerProvider, Credentials, Endpoint};
use anyhow::anyhow;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared, ordered record of what the doubles were asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub(crate) fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub(crate) fn descriptor(kind: BackendKind, url: &str) -> ConnectionDescriptor {
    ConnectionDescriptor::new(kind, url, "root", "password")
}

/// Provider that "runs" a container on 127.0.0.1:40000.
pub(crate) struct FakeProvider {
    credentials: Credentials,
    running: bool,
    fail_start: bool,
    calls: EventLog,
}

impl FakeProvider {
    pub(crate) fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            running: false,
            fail_start: false,
            calls: EventLog::default(),
        }
    }

    pub(crate) fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub(crate) fn calls(&self) -> EventLog {
        self.calls.clone()
    }
}

#[async_trait]
impl ContainerProvider for FakeProvider {
    async fn start(&mut self) -> anyhow::Result<()> {
        if self.fail_start {
            return Err(anyhow!("no container runtime"));
        }
        self.running = true;
        self.calls.push("start");
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if self.running {
            self.running = false;
            self.calls.push("stop");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn endpoint(&self) -> anyhow::Result<Endpoint> {
        if !self.running {
            return Err(anyhow!("container not running"));
        }
        Ok(Endpoint {
            host: "127.0.0.1".to_string(),
            port: 40000,
        })
    }

    fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

/// Connection that only remembers where it points.
///
/// Pooled connections hold a lease on their pool until dropped.
#[derive(Debug)]
pub(crate) struct MockConn {
    pub target: String,
    _lease: Option<Arc<()>>,
}

/// Pool whose `close` waits for every leased connection, like sqlx's.
#[derive(Debug, Clone)]
pub(crate) struct MockPool {
    url: String,
    settings: PoolSettings,
    closed: Arc<AtomicBool>,
    leases: Arc<()>,
    events: EventLog,
}

impl MockPool {
    fn checked_out(&self) -> usize {
        // One reference per pool clone plus one per leased connection.
        Arc::strong_count(&self.leases) - Arc::strong_count(&self.closed)
    }
}

#[async_trait]
impl ManagedPool for MockPool {
    type Connection = MockConn;
    type Detached = MockConn;

    async fn acquire(&self) -> Result<MockConn> {
        if self.is_closed() {
            return Err(HarnessError::Database(sqlx::Error::PoolClosed));
        }
        Ok(MockConn {
            target: self.url.clone(),
            _lease: Some(self.leases.clone()),
        })
    }

    async fn connect_as(&self, username: &str, _password: &str) -> Result<MockConn> {
        if self.is_closed() {
            return Err(HarnessError::Database(sqlx::Error::PoolClosed));
        }
        Ok(MockConn {
            target: format!("{}@{}", username, self.url),
            _lease: None,
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.push(format!("close:{}", self.url));
        while self.checked_out() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.settings.max_connections,
            idle: self.settings.min_idle as usize,
        }
    }
}

/// Records `open:<url>` / `close:<url>` and can refuse one url.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockPoolFactory {
    events: EventLog,
    fail_on: Option<String>,
}

impl MockPoolFactory {
    /// Record into `events` instead of a private log.
    pub(crate) fn recording_to(events: EventLog) -> Self {
        Self {
            events,
            fail_on: None,
        }
    }

    pub(crate) fn failing_on(mut self, url: &str) -> Self {
        self.fail_on = Some(url.to_string());
        self
    }

    pub(crate) fn events(&self) -> EventLog {
        self.events.clone()
    }
}

#[async_trait]
impl PoolFactory for MockPoolFactory {
    type Pool = MockPool;

    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PoolSettings,
    ) -> Result<MockPool> {
        if self.fail_on.as_deref() == Some(descriptor.url()) {
            return Err(HarnessError::Database(sqlx::Error::PoolTimedOut));
        }
        self.events.push(format!("open:{}", descriptor.url()));
        Ok(MockPool {
            url: descriptor.url().to_string(),
            settings: *settings,
            closed: Arc::new(AtomicBool::new(false)),
            leases: Arc::new(()),
            events: self.events.clone(),
        })
    }
}

/// Controller that records `start:<name>`, `init:<name>:<script>` and
/// `stop:<name>` without touching a container.
pub(crate) struct MockController {
    backend: BackendKind,
    events: EventLog,
    state: ControllerState,
    fail_start: bool,
    fail_init: bool,
}

impl MockController {
    pub(crate) fn new(backend: BackendKind, events: EventLog) -> Self {
        Self {
            backend,
            events,
            state: ControllerState::Idle,
            fail_start: false,
            fail_init: false,
        }
    }

    pub(crate) fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub(crate) fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// `mysql://<lowercase name>:<port>/security`
    pub(crate) fn url_for(backend: BackendKind) -> String {
        format!(
            "mysql://{}:{}/security",
            backend.display_name().to_lowercase(),
            backend.container_port()
        )
    }
}

#[async_trait]
impl BackendController for MockController {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    async fn start_container(&mut self) -> Result<ConnectionDescriptor> {
        self.events.push(format!("start:{}", self.backend));
        if self.fail_start {
            self.state = ControllerState::Failed;
            return Err(HarnessError::Provision {
                backend: self.backend,
                source: anyhow!("image pull failed"),
            });
        }
        self.state = ControllerState::Ready;
        Ok(descriptor(self.backend, &Self::url_for(self.backend)))
    }

    async fn execute_init_script(
        &mut self,
        _descriptor: &ConnectionDescriptor,
        script: &str,
    ) -> Result<()> {
        self.events.push(format!("init:{}:{}", self.backend, script));
        if self.fail_init {
            return Err(HarnessError::ScriptNotFound(script.to_string()));
        }
        Ok(())
    }

    async fn stop_container(&mut self) {
        self.events.push(format!("stop:{}", self.backend));
        self.state = ControllerState::Stopped;
    }

    fn is_running(&self) -> bool {
        self.state == ControllerState::Ready
    }
}
