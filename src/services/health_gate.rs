//! Health gate: bounded readiness polling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::HealthTimeoutError;
use crate::domain::models::{HealthCheck, ServiceHandle};
use crate::domain::ports::ServiceRuntime;

/// How a gate ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy { attempts: u32, elapsed: Duration },
    /// Retry budget spent without a passing probe
    Exhausted(HealthTimeoutError),
    Cancelled,
}

/// Polls a service's probe until it passes, the retry budget runs out, or
/// the gate is cancelled.
///
/// Probes run every `interval`, the first one `interval` after the gate
/// opens. Each probe is bounded by `timeout`; a probe that times out or
/// cannot run counts as a failed attempt.
#[derive(Clone)]
pub struct HealthGate {
    runtime: Arc<dyn ServiceRuntime>,
}

impl HealthGate {
    pub fn new(runtime: Arc<dyn ServiceRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn wait_until_healthy(
        &self,
        handle: &ServiceHandle,
        check: &HealthCheck,
        cancel: &CancellationToken,
    ) -> HealthOutcome {
        let started = Instant::now();
        let mut attempts = 0;
        let mut interval = tokio::time::interval(check.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip first tick (fires immediately)
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    tracing::debug!(service = %handle.service, attempts, "health gate cancelled");
                    return HealthOutcome::Cancelled;
                }
                _ = interval.tick() => {
                    attempts += 1;
                    let probe = tokio::time::timeout(check.timeout, self.runtime.probe(handle, check));
                    let result = tokio::select! {
                        biased;

                        () = cancel.cancelled() => {
                            tracing::debug!(service = %handle.service, attempts, "health gate cancelled during probe");
                            return HealthOutcome::Cancelled;
                        }
                        result = probe => result,
                    };
                    let passed = match result {
                        Ok(Ok(passed)) => passed,
                        Ok(Err(e)) => {
                            tracing::warn!(service = %handle.service, attempt = attempts, error = %e, "health probe could not run");
                            false
                        }
                        Err(_) => {
                            tracing::debug!(
                                service = %handle.service,
                                attempt = attempts,
                                timeout_ms = u64::try_from(check.timeout.as_millis()).unwrap_or(u64::MAX),
                                "health probe timed out"
                            );
                            false
                        }
                    };

                    if passed {
                        tracing::info!(service = %handle.service, attempts, "service healthy");
                        return HealthOutcome::Healthy { attempts, elapsed: started.elapsed() };
                    }

                    tracing::debug!(
                        service = %handle.service,
                        attempt = attempts,
                        retries = check.retries,
                        "health probe failed"
                    );

                    if attempts >= check.retries {
                        let error = HealthTimeoutError {
                            service: handle.service.clone(),
                            attempts,
                            elapsed: started.elapsed(),
                        };
                        tracing::warn!(service = %handle.service, attempts, "health check retries exhausted");
                        return HealthOutcome::Exhausted(error);
                    }
                }
            }
        }
    }
}
