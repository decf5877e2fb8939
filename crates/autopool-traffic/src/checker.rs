//! Health check probe logic.
//!
//! Performs HTTP health checks against target endpoints and folds the
//! results into per-target health with healthy/unhealthy thresholds.

use std::ops::RangeInclusive;

use bytes::Bytes;
use http_body_util::Empty;
use tracing::{debug, info, warn};

use autopool_core::backend::BackendFuture;
use autopool_core::{PoolConfig, TargetHealth};

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint answered inside the success range.
    Healthy,
    /// The health endpoint answered outside the success range.
    Unhealthy,
    /// The probe could not be executed (connection error).
    Failed,
    /// The probe did not finish within the health check timeout.
    TimedOut,
}

impl ProbeResult {
    pub fn is_success(self) -> bool {
        self == ProbeResult::Healthy
    }
}

/// Tracks consecutive probe results for a single target.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    status: TargetHealth,
    consecutive_failures: u32,
    consecutive_successes: u32,
    /// Failures before marking unhealthy.
    unhealthy_threshold: u32,
    /// Successes before marking healthy.
    healthy_threshold: u32,
}

impl HealthTracker {
    pub fn new(healthy_threshold: u32, unhealthy_threshold: u32) -> Self {
        Self {
            status: TargetHealth::Initial,
            consecutive_failures: 0,
            consecutive_successes: 0,
            unhealthy_threshold: unhealthy_threshold.max(1),
            healthy_threshold: healthy_threshold.max(1),
        }
    }

    /// Record a probe result and return the new health status.
    pub fn record(&mut self, result: ProbeResult) -> TargetHealth {
        if result.is_success() {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;

            if self.consecutive_successes >= self.healthy_threshold {
                if self.status != TargetHealth::Healthy {
                    info!(successes = self.consecutive_successes, "target healthy");
                }
                self.status = TargetHealth::Healthy;
            }
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;

            if self.consecutive_failures >= self.unhealthy_threshold {
                if self.status != TargetHealth::Unhealthy {
                    warn!(
                        failures = self.consecutive_failures,
                        threshold = self.unhealthy_threshold,
                        "target marked unhealthy"
                    );
                }
                self.status = TargetHealth::Unhealthy;
            }
        }

        self.status
    }

    pub fn status(&self) -> TargetHealth {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }
}

/// Probes one target endpoint (`host:port`). The caller bounds it with
/// the health check timeout.
pub trait HealthProbe: Send + Sync {
    fn probe<'a>(&'a self, endpoint: &'a str) -> BackendFuture<'a, ProbeResult>;
}

/// HTTP/1.1 GET of a fixed path; healthy when the status is in range.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    path: String,
    success: RangeInclusive<u16>,
}

impl HttpProbe {
    pub fn new(path: &str, success: RangeInclusive<u16>) -> Self {
        Self {
            path: path.to_string(),
            success,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(&config.health_check_path, config.success_range())
    }
}

impl HealthProbe for HttpProbe {
    fn probe<'a>(&'a self, endpoint: &'a str) -> BackendFuture<'a, ProbeResult> {
        Box::pin(async move {
            let uri = format!("http://{endpoint}{}", self.path);

            let stream = match tokio::net::TcpStream::connect(endpoint).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, %uri, "health probe connection failed");
                    return ProbeResult::Failed;
                }
            };

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(error = %e, %uri, "health probe handshake failed");
                    return ProbeResult::Failed;
                }
            };

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = match http::Request::builder()
                .method("GET")
                .uri(&uri)
                .header("host", endpoint)
                .header("user-agent", "autopool-health/0.1")
                .body(Empty::<Bytes>::new())
            {
                Ok(req) => req,
                Err(e) => {
                    debug!(error = %e, %uri, "invalid health probe request");
                    return ProbeResult::Failed;
                }
            };

            match sender.send_request(req).await {
                Ok(resp) => {
                    if self.success.contains(&resp.status().as_u16()) {
                        ProbeResult::Healthy
                    } else {
                        debug!(status = %resp.status(), %uri, "health probe outside success codes");
                        ProbeResult::Unhealthy
                    }
                }
                Err(e) => {
                    debug!(error = %e, %uri, "health probe request failed");
                    ProbeResult::Failed
                }
            }
        })
    }
}
