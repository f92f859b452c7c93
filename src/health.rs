//! Connection health checks, metrics and alerting
//!
//! A check is a lightweight end-to-end probe: is the adapter connected, and
//! does tool discovery answer within the response-time ceiling? Failures
//! degrade the reported status instead of raising, so monitoring callers
//! always receive a structured result.
//!
//! The background loop runs one check per interval and only ever cancels
//! during the sleep between checks; `stop` waits for an in-flight check.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;

fn as_secs<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Connected and functional, but slower than the ceiling
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Outcome of one health probe
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(serialize_with = "as_secs")]
    pub response_time: Duration,
    pub timestamp: DateTime<Utc>,
    pub details: Map<String, Value>,
    pub errors: Vec<String>,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Point-in-time metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    #[serde(serialize_with = "as_secs")]
    pub uptime: Duration,
    pub request_count: u64,
    pub error_count: u64,
    /// `1 - errors/requests`, 1.0 before any request
    pub success_rate: f64,
    #[serde(serialize_with = "as_secs")]
    pub avg_response_time: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Request totals recorded by the adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestTotals {
    pub requests: u64,
    pub errors: u64,
}

impl RequestTotals {
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            1.0 - (self.errors as f64 / self.requests as f64)
        }
    }
}

/// What the monitor needs from the thing it watches
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Run tool discovery and return the number of tools seen
    async fn probe_tools(&self) -> Result<usize>;

    fn request_totals(&self) -> RequestTotals;
}

/// Limits that raise alerts after background checks
#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub max_response_time: Duration,
    pub max_error_rate: f64,
    pub max_consecutive_failures: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            max_response_time: Duration::from_secs(10),
            max_error_rate: 0.1,
            max_consecutive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SlowResponse,
    ErrorRate,
    ConsecutiveFailures,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthAlert {
    pub kind: AlertKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between background checks
    pub interval: Duration,
    /// Discovery slower than this reports `Degraded`
    pub response_time_ceiling: Duration,
    /// Entries kept in each rolling history
    pub history_limit: usize,
    pub alerts: AlertThresholds,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            response_time_ceiling: Duration::from_secs(5),
            history_limit: 100,
            alerts: AlertThresholds::default(),
        }
    }
}

fn push_bounded<T>(buffer: &Mutex<VecDeque<T>>, item: T, limit: usize) {
    if let Ok(mut buffer) = buffer.lock() {
        buffer.push_back(item);
        while buffer.len() > limit.max(1) {
            buffer.pop_front();
        }
    }
}

fn snapshot<T: Clone>(buffer: &Mutex<VecDeque<T>>) -> Vec<T> {
    buffer
        .lock()
        .map(|b| b.iter().cloned().collect())
        .unwrap_or_default()
}

struct MonitorState {
    config: HealthConfig,
    started_at: Mutex<Instant>,
    history: Mutex<VecDeque<HealthCheckResult>>,
    metrics_history: Mutex<VecDeque<MetricSnapshot>>,
    alerts: Mutex<VecDeque<HealthAlert>>,
    consecutive_failures: AtomicU32,
}

impl MonitorState {
    async fn check(&self, probe: &dyn HealthProbe) -> HealthCheckResult {
        let started = Instant::now();
        let mut details = Map::new();
        let mut errors = Vec::new();

        let connected = probe.is_connected();
        details.insert("connected".into(), json!(connected));

        let status = if !connected {
            errors.push("Not connected to gateway".to_string());
            HealthStatus::Unhealthy
        } else {
            match probe.probe_tools().await {
                Ok(count) => {
                    details.insert("tool_count".into(), json!(count));
                    let elapsed = started.elapsed();
                    if elapsed < self.config.response_time_ceiling {
                        HealthStatus::Healthy
                    } else {
                        errors.push(format!(
                            "Response time {:.3}s exceeds ceiling {:.3}s",
                            elapsed.as_secs_f64(),
                            self.config.response_time_ceiling.as_secs_f64()
                        ));
                        HealthStatus::Degraded
                    }
                }
                Err(e) => {
                    details.insert("error_type".into(), json!(e.error_type()));
                    errors.push(format!("Tool discovery failed: {}", e));
                    HealthStatus::Unhealthy
                }
            }
        };

        let result = HealthCheckResult {
            status,
            response_time: started.elapsed(),
            timestamp: Utc::now(),
            details,
            errors,
        };
        push_bounded(&self.history, result.clone(), self.config.history_limit);
        debug!(status = %result.status, response_time = ?result.response_time, "Health check complete");
        result
    }

    fn metrics(&self, totals: RequestTotals) -> MetricSnapshot {
        let history = snapshot(&self.history);
        let avg_response_time = if history.is_empty() {
            Duration::ZERO
        } else {
            history.iter().map(|r| r.response_time).sum::<Duration>() / history.len() as u32
        };
        let uptime = self
            .started_at
            .lock()
            .map(|s| s.elapsed())
            .unwrap_or_default();

        MetricSnapshot {
            uptime,
            request_count: totals.requests,
            error_count: totals.errors,
            success_rate: totals.success_rate(),
            avg_response_time,
            timestamp: Utc::now(),
        }
    }

    fn raise(&self, kind: AlertKind, message: String) {
        warn!(alert = ?kind, "{}", message);
        push_bounded(
            &self.alerts,
            HealthAlert {
                kind,
                message,
                timestamp: Utc::now(),
            },
            self.config.history_limit,
        );
    }

    fn evaluate_alerts(&self, result: &HealthCheckResult, metrics: &MetricSnapshot) {
        let thresholds = &self.config.alerts;

        if result.response_time > thresholds.max_response_time {
            self.raise(
                AlertKind::SlowResponse,
                format!(
                    "Health check took {:.3}s (limit {:.3}s)",
                    result.response_time.as_secs_f64(),
                    thresholds.max_response_time.as_secs_f64()
                ),
            );
        }

        let error_rate = 1.0 - metrics.success_rate;
        if metrics.request_count > 0 && error_rate > thresholds.max_error_rate {
            self.raise(
                AlertKind::ErrorRate,
                format!(
                    "Error rate {:.1}% over {} requests exceeds {:.1}%",
                    error_rate * 100.0,
                    metrics.request_count,
                    thresholds.max_error_rate * 100.0
                ),
            );
        }

        let failures = if result.status == HealthStatus::Unhealthy {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            0
        };
        if failures == thresholds.max_consecutive_failures {
            self.raise(
                AlertKind::ConsecutiveFailures,
                format!("{} consecutive failed health checks", failures),
            );
        }
    }

    async fn run_iteration(&self, probe: &dyn HealthProbe) {
        let result = self.check(probe).await;
        let metrics = self.metrics(probe.request_totals());
        self.evaluate_alerts(&result, &metrics);
        push_bounded(&self.metrics_history, metrics, self.config.history_limit);
    }
}

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Health checks, rolling history and an optional background loop
pub struct HealthMonitor {
    state: Arc<MonitorState>,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            state: Arc::new(MonitorState {
                config,
                started_at: Mutex::new(Instant::now()),
                history: Mutex::new(VecDeque::new()),
                metrics_history: Mutex::new(VecDeque::new()),
                alerts: Mutex::new(VecDeque::new()),
                consecutive_failures: AtomicU32::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.state.config
    }

    /// Run one probe and record it in the history
    pub async fn check(&self, probe: &dyn HealthProbe) -> HealthCheckResult {
        self.state.check(probe).await
    }

    /// Start the background loop
    ///
    /// The loop holds only a weak reference and ends on its own once the
    /// probe is dropped. Returns `false` if a loop is already running.
    pub fn start(&self, probe: Weak<dyn HealthProbe>) -> bool {
        let Ok(mut task) = self.task.lock() else {
            return false;
        };
        if task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false) {
            debug!("Health monitoring already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = Arc::clone(&self.state);
        let interval = state.config.interval;

        let handle = tokio::spawn(async move {
            info!(interval = ?interval, "Health monitoring started");
            loop {
                let Some(probe) = probe.upgrade() else {
                    debug!("Monitored adapter dropped, ending health loop");
                    break;
                };
                state.run_iteration(probe.as_ref()).await;
                drop(probe);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Health monitoring stopped");
        });

        *task = Some(MonitorTask { cancel, handle });
        true
    }

    /// Cancel the loop and wait for any in-flight check to finish
    pub async fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(MonitorTask { cancel, handle }) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Health monitoring task ended abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn get_metrics(&self, totals: RequestTotals) -> MetricSnapshot {
        self.state.metrics(totals)
    }

    /// Clear every history and restart the uptime clock
    pub fn reset_metrics(&self) {
        if let Ok(mut b) = self.state.history.lock() {
            b.clear();
        }
        if let Ok(mut b) = self.state.metrics_history.lock() {
            b.clear();
        }
        if let Ok(mut b) = self.state.alerts.lock() {
            b.clear();
        }
        if let Ok(mut started) = self.state.started_at.lock() {
            *started = Instant::now();
        }
        self.state.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub fn history(&self) -> Vec<HealthCheckResult> {
        snapshot(&self.state.history)
    }

    pub fn metrics_history(&self) -> Vec<MetricSnapshot> {
        snapshot(&self.state.metrics_history)
    }

    pub fn recent_alerts(&self) -> Vec<HealthAlert> {
        snapshot(&self.state.alerts)
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.state.config)
            .field("running", &self.is_running())
            .finish()
    }
}
