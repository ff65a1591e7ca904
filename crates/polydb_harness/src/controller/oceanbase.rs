//! OceanBase controller.
//!
//! The container logs "boot success!" well before the `test` tenant can
//! serve queries, so startup polls the sys tenant's tenant table until the
//! tenant reports `NORMAL`, then creates the test database.

use super::{BackendController, ContainerHandle, ControllerState};
use crate::backend::BackendKind;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use crate::provider::{ContainerProvider, ContainerSpec, Credentials, Endpoint, StartupMessage};
use crate::readiness::{poll_until_ready, ReadinessPolicy, TenantStatusSource};
use crate::script::ScriptRunner;
use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, Executor, MySqlConnection};
use std::sync::Arc;
use tracing::info;

/// Tenant the application connects to.
pub const OCEANBASE_TENANT: &str = "test";

/// Database created in the tenant once it is ready.
pub const OCEANBASE_DATABASE: &str = "security";

const TENANT_USER: &str = "root@test";
const TENANT_DATABASE: &str = "test";
const SYS_USER: &str = "root@sys";
const SYS_DATABASE: &str = "oceanbase";
const READY_MESSAGE: &str = "boot success!";
const TENANT_STATUS_QUERY: &str =
    "select status from oceanbase.DBA_OB_TENANTS where tenant_name = ?";

/// Container spec for a single-node OceanBase CE instance from `image`.
pub fn oceanbase_container_spec(image: &str) -> ContainerSpec {
    ContainerSpec {
        image: image.to_string(),
        container_port: BackendKind::OceanBase.container_port(),
        env: vec![("MODE".to_string(), "mini".to_string())],
        startup_message: StartupMessage::Stdout(READY_MESSAGE.to_string()),
        startup_timeout: BackendKind::OceanBase.startup_timeout(),
        credentials: Credentials::new(TENANT_USER, ""),
    }
}

/// Cluster-level operations needed while bringing OceanBase up.
#[async_trait]
pub trait ClusterAdmin: TenantStatusSource {
    /// `CREATE DATABASE IF NOT EXISTS` in the application tenant.
    async fn ensure_database(&self, name: &str) -> std::result::Result<(), sqlx::Error>;
}

/// Builds a [`ClusterAdmin`] for a freshly started container.
pub type AdminConnector =
    Arc<dyn Fn(&Endpoint, &Credentials) -> Result<Box<dyn ClusterAdmin>> + Send + Sync>;

/// [`ClusterAdmin`] over short-lived sqlx connections.
pub struct SqlClusterAdmin {
    sys: MySqlConnectOptions,
    tenant: MySqlConnectOptions,
}

impl SqlClusterAdmin {
    pub fn new(endpoint: &Endpoint, credentials: &Credentials) -> Result<Self> {
        let sys_credentials = Credentials::new(SYS_USER, credentials.password.clone());
        let sys = ConnectionDescriptor::for_endpoint(
            BackendKind::OceanBase,
            endpoint,
            &sys_credentials,
            SYS_DATABASE,
        )?;
        let tenant = ConnectionDescriptor::for_endpoint(
            BackendKind::OceanBase,
            endpoint,
            credentials,
            TENANT_DATABASE,
        )?;

        Ok(Self {
            sys: sys.connect_options()?,
            tenant: tenant.connect_options()?,
        })
    }
}

#[async_trait]
impl TenantStatusSource for SqlClusterAdmin {
    async fn tenant_status(&self, tenant: &str) -> std::result::Result<Option<String>, sqlx::Error> {
        let mut conn = MySqlConnection::connect_with(&self.sys).await?;
        let status = sqlx::query_scalar::<_, String>(TENANT_STATUS_QUERY)
            .bind(tenant)
            .fetch_optional(&mut conn)
            .await;
        conn.close().await?;
        status
    }
}

#[async_trait]
impl ClusterAdmin for SqlClusterAdmin {
    async fn ensure_database(&self, name: &str) -> std::result::Result<(), sqlx::Error> {
        let mut conn = MySqlConnection::connect_with(&self.tenant).await?;
        let created = conn
            .execute(format!("CREATE DATABASE IF NOT EXISTS {}", name).as_str())
            .await;
        conn.close().await?;
        created.map(|_| ())
    }
}

fn default_admin_connector() -> AdminConnector {
    Arc::new(|endpoint: &Endpoint, credentials: &Credentials| {
        Ok(Box::new(SqlClusterAdmin::new(endpoint, credentials)?) as Box<dyn ClusterAdmin>)
    })
}

/// Provisions OceanBase and waits for its tenant to become usable.
pub struct OceanBaseController {
    container: ContainerHandle,
    scripts: ScriptRunner,
    policy: ReadinessPolicy,
    connect_admin: AdminConnector,
    admin: Option<Box<dyn ClusterAdmin>>,
}

impl OceanBaseController {
    pub fn new(
        provider: Box<dyn ContainerProvider>,
        scripts: ScriptRunner,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            container: ContainerHandle::new(BackendKind::OceanBase, provider),
            scripts,
            policy,
            connect_admin: default_admin_connector(),
            admin: None,
        }
    }

    /// Replace how the cluster admin connection is built.
    pub fn with_admin_connector(mut self, connect_admin: AdminConnector) -> Self {
        self.connect_admin = connect_admin;
        self
    }
}

#[async_trait]
impl BackendController for OceanBaseController {
    fn backend(&self) -> BackendKind {
        BackendKind::OceanBase
    }

    fn state(&self) -> ControllerState {
        self.container.state()
    }

    async fn start_container(&mut self) -> Result<ConnectionDescriptor> {
        let endpoint = self.container.provision().await?;
        let prepared = (self.connect_admin)(&endpoint, self.container.credentials()).and_then(|admin| {
            let descriptor = ConnectionDescriptor::for_endpoint(
                BackendKind::OceanBase,
                &endpoint,
                self.container.credentials(),
                TENANT_DATABASE,
            )?
            .with_database(OCEANBASE_DATABASE)?;
            Ok((admin, descriptor))
        });
        let (admin, descriptor) = prepared.map_err(|e| self.container.fail(e))?;
        self.admin = Some(admin);

        self.container.transition(ControllerState::ReadinessPending)?;
        if let Err(e) = self.wait_for_ready().await {
            return Err(self.container.fail(e));
        }
        self.container.transition(ControllerState::Ready)?;

        info!(url = %descriptor.url(), "OceanBase ready");
        Ok(descriptor)
    }

    async fn wait_for_ready(&mut self) -> Result<()> {
        let admin = self
            .admin
            .as_deref()
            .ok_or_else(|| HarnessError::invalid_state("OceanBase container not started"))?;

        poll_until_ready(admin, BackendKind::OceanBase, OCEANBASE_TENANT, &self.policy).await?;
        admin.ensure_database(OCEANBASE_DATABASE).await?;
        info!(database = OCEANBASE_DATABASE, "OceanBase database ensured");
        Ok(())
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
        self.admin = None;
        self.container.release().await;
    }

    fn is_running(&self) -> bool {
        self.container.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::MemoryScriptLoader;
    use crate::testing::{EventLog, FakeProvider};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Tenant turns NORMAL on attempt `ready_on`; `None` never.
    struct StubAdmin {
        ready_on: Option<u32>,
        calls: Arc<AtomicU32>,
        events: EventLog,
    }

    #[async_trait]
    impl TenantStatusSource for StubAdmin {
        async fn tenant_status(
            &self,
            tenant: &str,
        ) -> std::result::Result<Option<String>, sqlx::Error> {
            assert_eq!(tenant, OCEANBASE_TENANT);
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.ready_on {
                Some(n) if call >= n => Ok(Some("NORMAL".to_string())),
                _ => Ok(None),
            }
        }
    }

    #[async_trait]
    impl ClusterAdmin for StubAdmin {
        async fn ensure_database(&self, name: &str) -> std::result::Result<(), sqlx::Error> {
            self.events.push(format!("create_database:{}", name));
            Ok(())
        }
    }

    fn controller(ready_on: Option<u32>) -> (OceanBaseController, Arc<AtomicU32>, EventLog) {
        let calls = Arc::new(AtomicU32::new(0));
        let events = EventLog::default();
        let provider = FakeProvider::new(Credentials::new(TENANT_USER, ""));
        let policy = ReadinessPolicy {
            interval: Duration::ZERO,
            max_attempts: 5,
            fail_fast_on_fatal: true,
        };

        let (connector_calls, connector_events) = (calls.clone(), events.clone());
        let connector: AdminConnector = Arc::new(move |endpoint: &Endpoint, credentials: &Credentials| {
            assert_eq!(endpoint.port, 40000);
            assert_eq!(credentials.username, TENANT_USER);
            Ok(Box::new(StubAdmin {
                ready_on,
                calls: connector_calls.clone(),
                events: connector_events.clone(),
            }) as Box<dyn ClusterAdmin>)
        });

        let controller = OceanBaseController::new(
            Box::new(provider),
            ScriptRunner::new(Arc::new(MemoryScriptLoader::new())),
            policy,
        )
        .with_admin_connector(connector);
        (controller, calls, events)
    }

    #[test]
    fn test_container_spec() {
        let spec = oceanbase_container_spec("oceanbase/oceanbase-ce:4.3.5-lts");
        assert_eq!(spec.container_port, 2881);
        assert_eq!(spec.credentials.username, "root@test");
        assert_eq!(
            spec.startup_message,
            StartupMessage::Stdout("boot success!".to_string())
        );
    }

    #[tokio::test]
    async fn test_start_waits_for_tenant() {
        let (mut controller, calls, events) = controller(Some(3));

        let descriptor = controller.start_container().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(events.snapshot(), vec!["create_database:security"]);
        assert_eq!(descriptor.url(), "mysql://127.0.0.1:40000/security");
        assert_eq!(descriptor.username(), "root@test");
        assert_eq!(controller.state(), ControllerState::Ready);

        controller.stop_container().await;
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_readiness_timeout_fails_controller() {
        let (mut controller, calls, events) = controller(None);

        let err = controller.start_container().await.unwrap_err();

        assert!(matches!(
            err,
            HarnessError::ReadinessTimeout {
                backend: BackendKind::OceanBase,
                attempts: 5
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(events.snapshot().is_empty());
        assert_eq!(controller.state(), ControllerState::Failed);
        // Container is still up until teardown.
        assert!(controller.is_running());

        controller.stop_container().await;
        assert!(!controller.is_running());
        assert_eq!(controller.state(), ControllerState::Stopped);
    }

    #[tokio::test]
    async fn test_wait_for_ready_before_start() {
        let (mut controller, _, _) = controller(Some(1));
        assert!(matches!(
            controller.wait_for_ready().await,
            Err(HarnessError::InvalidState(_))
        ));
    }
}
