//! Health aggregation.
//!
//! Checks run on their own interval in background tasks and record the last
//! outcome. [`HealthChecker::status`] only reads recorded results, so the
//! `/healthz` handler never waits on a slow dependency.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

use crate::storage::Storage;

/// A dependency health check.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Name the result is reported under.
    fn name(&self) -> &str;

    /// Runs the check. The error string is shown in the status body.
    async fn check(&self) -> Result<(), String>;
}

/// Last recorded outcome of one check.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    /// Whether the check passed.
    pub passed: bool,

    /// Failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the check last ran. `None` until the first run completes.
    #[serde(with = "time::serde::rfc3339::option")]
    pub checked_at: Option<OffsetDateTime>,
}

/// Aggregated status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `true` if every registered check passed its last run.
    pub healthy: bool,

    /// Per-check results, keyed by name.
    pub checks: BTreeMap<String, CheckResult>,
}

/// Owns the registered checks and their background tasks.
///
/// Dropping the checker stops every check task.
#[derive(Debug, Default)]
pub struct HealthChecker {
    results: Arc<DashMap<String, CheckResult>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Creates a checker with no checks; it reports healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a check that runs every `period`.
    ///
    /// Until its first run completes the check reports `initially_passing`.
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        check: Arc<dyn HealthCheck>,
        initially_passing: bool,
        period: Duration,
    ) {
        let name = check.name().to_string();
        self.results.insert(
            name.clone(),
            CheckResult {
                passed: initially_passing,
                error: (!initially_passing).then(|| "not yet checked".to_string()),
                checked_at: None,
            },
        );

        let results = self.results.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let outcome = check.check().await;
                if let Err(e) = &outcome {
                    tracing::warn!(check = %name, error = %e, "Health check failed");
                }
                results.insert(
                    name.clone(),
                    CheckResult {
                        passed: outcome.is_ok(),
                        error: outcome.err(),
                        checked_at: Some(OffsetDateTime::now_utc()),
                    },
                );
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Current status from the last recorded results.
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        let checks: BTreeMap<String, CheckResult> = self
            .results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        HealthStatus {
            healthy: checks.values().all(|c| c.passed),
            checks,
        }
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

/// Pings the storage backend.
pub struct StorageHealthCheck {
    storage: Arc<dyn Storage>,
}

impl StorageHealthCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl HealthCheck for StorageHealthCheck {
    fn name(&self) -> &str {
        "storage"
    }

    async fn check(&self) -> Result<(), String> {
        self.storage.ping().await.map_err(|e| e.to_string())
    }
}
