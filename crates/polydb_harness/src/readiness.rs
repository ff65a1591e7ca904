//! Readiness polling for engines that report "started" before they can serve queries.

use crate::backend::BackendKind;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Status a tenant reports once it accepts queries.
pub const READY_STATUS: &str = "NORMAL";

/// Retry policy for [`poll_until_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Pause between failed attempts
    pub interval: Duration,
    /// Attempt budget; exhausting it is fatal
    pub max_attempts: u32,
    /// Stop immediately on errors retrying cannot fix (bad credentials, bad config)
    pub fail_fast_on_fatal: bool,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
            fail_fast_on_fatal: true,
        }
    }
}

impl ReadinessPolicy {
    /// Longest time polling can take, ignoring query latency.
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Something that can report the status of a tenant.
#[async_trait]
pub trait TenantStatusSource: Send + Sync {
    /// Current status of `tenant`, `None` if the tenant is not listed yet.
    async fn tenant_status(&self, tenant: &str) -> std::result::Result<Option<String>, sqlx::Error>;
}

/// Whether a probe error can never clear up by waiting.
pub fn is_fatal_probe_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Configuration(_) => true,
        sqlx::Error::Database(db) => {
            // 1044: access denied to database, 1045: access denied for user
            matches!(db.code().as_deref(), Some("1044") | Some("1045") | Some("28000"))
        }
        _ => false,
    }
}

/// Poll until `tenant` reports [`READY_STATUS`].
///
/// Returns the number of attempts used. Probe errors count as failed
/// attempts; only fatal errors (when the policy says so) and an exhausted
/// budget end the loop early.
pub async fn poll_until_ready<S>(
    source: &S,
    backend: BackendKind,
    tenant: &str,
    policy: &ReadinessPolicy,
) -> Result<u32>
where
    S: TenantStatusSource + ?Sized,
{
    for attempt in 1..=policy.max_attempts {
        match source.tenant_status(tenant).await {
            Ok(Some(status)) if status.eq_ignore_ascii_case(READY_STATUS) => {
                info!(%backend, tenant, attempt, "Tenant ready");
                return Ok(attempt);
            }
            Ok(status) => {
                debug!(%backend, tenant, attempt, ?status, "Tenant not ready yet");
            }
            Err(err) if policy.fail_fast_on_fatal && is_fatal_probe_error(&err) => {
                return Err(HarnessError::ReadinessFailed {
                    backend,
                    attempt,
                    source: err,
                });
            }
            Err(err) => {
                debug!(%backend, tenant, attempt, error = %err, "Readiness probe failed");
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    warn!(%backend, tenant, attempts = policy.max_attempts, "Tenant never became ready");
    Err(HarnessError::ReadinessTimeout {
        backend,
        attempts: policy.max_attempts,
    })
}
