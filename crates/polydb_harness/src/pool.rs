//! Connection pool façade that can be redirected to another database at runtime.
//!
//! Application code holds one [`SwitchablePool`] for the whole process. Each
//! [`SwitchablePool::switch_to`] bumps a generation counter, closes the
//! physical pool behind it and opens a new one. Connections carry the
//! generation they were checked out under, so work against a superseded
//! database can be detected with [`SwitchablePool::ensure_current`].
//!
//! Closing waits at most `acquire_timeout` for checked-out connections to come
//! back. Stragglers are closed when their holder drops them.

use crate::backend::BackendKind;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::{Connection, MySql, MySqlConnection, MySqlPool};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{info, warn};

/// Sizing and timeouts applied to every physical pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_idle: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_idle: 1,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Snapshot of a physical pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub size: u32,
    pub idle: usize,
}

/// A physical pool the façade can delegate to.
#[async_trait]
pub trait ManagedPool: Clone + Send + Sync + 'static {
    /// Pooled connection handed to callers.
    type Connection: Send;
    /// Unpooled connection opened with caller-supplied credentials.
    type Detached: Send;

    async fn acquire(&self) -> Result<Self::Connection>;

    async fn connect_as(&self, username: &str, password: &str) -> Result<Self::Detached>;

    /// Close the pool, waiting for checked-out connections to come back.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    fn status(&self) -> PoolStatus;
}

/// Builds physical pools for descriptors.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    type Pool: ManagedPool;

    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PoolSettings,
    ) -> Result<Self::Pool>;
}

/// sqlx MySQL pool, used for both MySQL and OceanBase.
#[derive(Debug, Clone)]
pub struct MySqlManagedPool {
    pool: MySqlPool,
    options: MySqlConnectOptions,
}

impl MySqlManagedPool {
    /// The underlying sqlx pool.
    pub fn inner(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl ManagedPool for MySqlManagedPool {
    type Connection = PoolConnection<MySql>;
    type Detached = MySqlConnection;

    async fn acquire(&self) -> Result<Self::Connection> {
        Ok(self.pool.acquire().await?)
    }

    async fn connect_as(&self, username: &str, password: &str) -> Result<Self::Detached> {
        let options = self.options.clone().username(username).password(password);
        Ok(MySqlConnection::connect_with(&options).await?)
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
        }
    }
}

/// Opens lazy sqlx MySQL pools.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlPoolFactory;

#[async_trait]
impl PoolFactory for MySqlPoolFactory {
    type Pool = MySqlManagedPool;

    async fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PoolSettings,
    ) -> Result<Self::Pool> {
        let options = descriptor.connect_options()?;
        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_idle)
            .acquire_timeout(settings.acquire_timeout)
            .connect_lazy_with(options.clone());
        Ok(MySqlManagedPool { pool, options })
    }
}

/// A connection tagged with the pool generation it came from.
#[derive(Debug)]
pub struct SwitchableConnection<C> {
    conn: C,
    generation: u64,
    backend: BackendKind,
}

impl<C> SwitchableConnection<C> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C> Deref for SwitchableConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C> DerefMut for SwitchableConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

struct ActivePool<P> {
    pool: P,
    descriptor: ConnectionDescriptor,
    generation: u64,
}

/// The process-wide pool whose target database can change between backend runs.
pub struct SwitchablePool<F: PoolFactory = MySqlPoolFactory> {
    factory: F,
    settings: PoolSettings,
    active: RwLock<Option<ActivePool<F::Pool>>>,
    generations: AtomicU64,
}

/// Switchable pool over sqlx MySQL pools.
pub type SwitchableMySqlPool = SwitchablePool<MySqlPoolFactory>;

impl SwitchablePool<MySqlPoolFactory> {
    pub fn new() -> Self {
        Self::with_factory(MySqlPoolFactory, PoolSettings::default())
    }
}

impl Default for SwitchablePool<MySqlPoolFactory> {
    fn default() -> Self {
        Self::new()
    }
}

type ConnectionOf<F> = <<F as PoolFactory>::Pool as ManagedPool>::Connection;
type DetachedOf<F> = <<F as PoolFactory>::Pool as ManagedPool>::Detached;

impl<F: PoolFactory> SwitchablePool<F> {
    pub fn with_factory(factory: F, settings: PoolSettings) -> Self {
        Self {
            factory,
            settings,
            active: RwLock::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Point the pool at `descriptor`.
    ///
    /// Waits for in-flight acquires, supersedes every outstanding connection,
    /// closes the previous pool, then opens the new one. If opening fails the
    /// pool stays unconfigured. Returns the new generation.
    pub async fn switch_to(&self, descriptor: &ConnectionDescriptor) -> Result<u64> {
        let mut active = self.active.write().await;
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(previous) = active.take() {
            self.retire(previous).await;
        }

        let pool = self.factory.open(descriptor, &self.settings).await?;
        *active = Some(ActivePool {
            pool,
            descriptor: descriptor.clone(),
            generation,
        });

        info!(url = %descriptor.url(), generation, "Pool switched to {}", descriptor.name());
        Ok(generation)
    }

    /// Check out a connection from the active pool.
    pub async fn acquire(&self) -> Result<SwitchableConnection<ConnectionOf<F>>> {
        let active = self.active.read().await;
        let active = active.as_ref().ok_or(HarnessError::NotConfigured)?;
        let conn = active.pool.acquire().await?;
        Ok(SwitchableConnection {
            conn,
            generation: active.generation,
            backend: active.descriptor.backend(),
        })
    }

    /// Open an unpooled connection to the active database with other credentials.
    pub async fn acquire_as(
        &self,
        username: &str,
        password: &str,
    ) -> Result<SwitchableConnection<DetachedOf<F>>> {
        let active = self.active.read().await;
        let active = active.as_ref().ok_or(HarnessError::NotConfigured)?;
        let conn = active.pool.connect_as(username, password).await?;
        Ok(SwitchableConnection {
            conn,
            generation: active.generation,
            backend: active.descriptor.backend(),
        })
    }

    /// Reject connections checked out before the latest switch.
    ///
    /// Does not wait for a switch in progress; a connection is stale as soon
    /// as a switch away from its pool has begun.
    pub async fn ensure_current<C>(&self, conn: &SwitchableConnection<C>) -> Result<()> {
        let current = self.generations.load(Ordering::SeqCst);
        if conn.generation != current {
            return Err(HarnessError::StaleGeneration {
                held: conn.generation,
                current,
            });
        }
        Ok(())
    }

    pub async fn is_configured(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Generation of the active pool.
    pub async fn generation(&self) -> Result<u64> {
        self.with_active(|active| active.generation).await
    }

    /// Descriptor the active pool points at.
    pub async fn descriptor(&self) -> Result<ConnectionDescriptor> {
        self.with_active(|active| active.descriptor.clone()).await
    }

    pub async fn status(&self) -> Result<PoolStatus> {
        self.with_active(|active| active.pool.status()).await
    }

    pub async fn acquire_timeout(&self) -> Result<Duration> {
        self.with_active(|_| self.settings.acquire_timeout).await
    }

    /// Handle to the active physical pool.
    pub async fn pool(&self) -> Result<F::Pool> {
        self.with_active(|active| active.pool.clone()).await
    }

    /// Close the active pool and return to the unconfigured state.
    pub async fn close(&self) {
        let mut active = self.active.write().await;
        if let Some(previous) = active.take() {
            self.generations.fetch_add(1, Ordering::SeqCst);
            self.retire(previous).await;
        }
    }

    /// Close a superseded pool, giving its checked-out connections up to
    /// `acquire_timeout` to come back.
    async fn retire(&self, previous: ActivePool<F::Pool>) {
        let drain = self.settings.acquire_timeout;
        match timeout(drain, previous.pool.close()).await {
            Ok(()) => info!(
                backend = %previous.descriptor.backend(),
                generation = previous.generation,
                "Closed previous pool"
            ),
            // Already marked closed: stragglers are dropped on return.
            Err(_) => warn!(
                backend = %previous.descriptor.backend(),
                generation = previous.generation,
                ?drain,
                "Previous pool still had connections checked out, abandoning them"
            ),
        }
    }

    async fn with_active<T>(&self, f: impl FnOnce(&ActivePool<F::Pool>) -> T) -> Result<T> {
        let active = self.active.read().await;
        active.as_ref().map(f).ok_or(HarnessError::NotConfigured)
    }
}
