//! Read-only health view over every provider breaker and rate-limit budget.
//!
//! # Responsibilities
//! - Snapshot breaker state and admission counters per provider
//! - Detect circuits that stay away from `Closed` longer than an SLA
//! - Dispatch alerts for stuck circuits, once per episode when run periodically

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info};

use crate::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::config::GatewaySettings;
use crate::gateway::GatewayStats;
use crate::registry::ProviderRegistry;
use crate::response::duration_ms;
use crate::throttling::AdmissionCounters;
use crate::timestamp::UtcDateTime;

/// Rate-limit budget as exposed to health consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitView {
    pub window_ms: u64,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    #[serde(flatten)]
    pub breaker: BreakerSnapshot,
    pub rate_limit: Option<RateLimitView>,
    pub admission: AdmissionCounters,
}

/// A service whose circuit has not been `Closed` for longer than the SLA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StuckService {
    pub service: String,
    pub state: CircuitState,
    pub unhealthy_for_ms: u64,
    pub last_failure_at: Option<UtcDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthAlert {
    pub service: String,
    pub state: CircuitState,
    pub unhealthy_for_ms: u64,
    pub sla_ms: u64,
    pub raised_at: UtcDateTime,
}

/// External notification channel for stuck circuits.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: &HealthAlert);
}

/// Default sink: one `error` event per alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify(&self, alert: &HealthAlert) {
        error!(
            service = %alert.service,
            state = %alert.state,
            unhealthy_for_ms = alert.unhealthy_for_ms,
            sla_ms = alert.sla_ms,
            at = %alert.raised_at,
            "circuit stuck open beyond SLA"
        );
    }
}

#[derive(Debug, Clone)]
pub struct HealthAggregator {
    registry: Arc<ProviderRegistry>,
}

impl HealthAggregator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    /// Health per provider name. Pure read: no breaker state changes.
    pub fn snapshot(&self) -> BTreeMap<String, ServiceHealth> {
        let limiter = self.registry.rate_limiter();
        self.registry
            .providers()
            .iter()
            .map(|descriptor| {
                let key = descriptor.policy_key();
                let health = ServiceHealth {
                    breaker: descriptor.breaker().snapshot(),
                    rate_limit: limiter.policy(key).map(|policy| RateLimitView {
                        window_ms: duration_ms(policy.window),
                        limit: policy.limit,
                    }),
                    admission: limiter.counters(key).unwrap_or_default(),
                };
                (descriptor.name().to_owned(), health)
            })
            .collect()
    }

    pub fn stuck_open(&self, sla: Duration) -> Vec<StuckService> {
        let sla_ms = duration_ms(sla);
        self.registry
            .providers()
            .iter()
            .filter_map(|descriptor| {
                let snapshot = descriptor.breaker().snapshot();
                let unhealthy_for_ms = snapshot.unhealthy_for_ms?;
                (snapshot.state != CircuitState::Closed && unhealthy_for_ms > sla_ms).then(|| {
                    StuckService {
                        service: snapshot.service,
                        state: snapshot.state,
                        unhealthy_for_ms,
                        last_failure_at: snapshot.last_failure_at,
                    }
                })
            })
            .collect()
    }

    /// Alert once per stuck service and return the stuck list.
    pub fn check(&self, sla: Duration, sink: &dyn AlertSink) -> Vec<StuckService> {
        let stuck = self.stuck_open(sla);
        for service in &stuck {
            sink.notify(&alert_for(service, sla));
        }
        stuck
    }
}

fn alert_for(service: &StuckService, sla: Duration) -> HealthAlert {
    HealthAlert {
        service: service.service.clone(),
        state: service.state,
        unhealthy_for_ms: service.unhealthy_for_ms,
        sla_ms: duration_ms(sla),
        raised_at: UtcDateTime::now(),
    }
}

/// Periodic stuck-circuit checker for long-lived processes.
pub struct HealthMonitor {
    aggregator: HealthAggregator,
    interval: Duration,
    sla: Duration,
    sink: Arc<dyn AlertSink>,
}

impl HealthMonitor {
    pub fn new(
        aggregator: HealthAggregator,
        interval: Duration,
        sla: Duration,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            aggregator,
            interval,
            sla,
            sink,
        }
    }

    /// Monitor using the `[gateway]` interval and SLA.
    pub fn from_settings(
        aggregator: HealthAggregator,
        settings: &GatewaySettings,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self::new(
            aggregator,
            settings.health_interval(),
            settings.health_sla(),
            sink,
        )
    }

    pub fn with_sla(mut self, sla: Duration) -> Self {
        self.sla = sla;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sla(&self) -> Duration {
        self.sla
    }

    /// Run until `shutdown` fires or its sender is dropped.
    ///
    /// A service is alerted when it first exceeds the SLA and again only
    /// after it has recovered and become stuck once more.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = duration_ms(self.interval),
            sla_ms = duration_ms(self.sla),
            "health monitor starting"
        );

        let mut ticker = time::interval(self.interval.max(Duration::from_millis(1)));
        let mut alerted = HashSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut alerted);
                }
                _ = shutdown.recv() => {
                    info!("health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn tick(&self, alerted: &mut HashSet<String>) {
        let stuck = self.aggregator.stuck_open(self.sla);
        let stuck_names = stuck
            .iter()
            .map(|service| service.service.clone())
            .collect::<HashSet<_>>();

        alerted.retain(|service| {
            let still_stuck = stuck_names.contains(service);
            if !still_stuck {
                info!(service = %service, "circuit recovered within health monitor");
            }
            still_stuck
        });

        for service in &stuck {
            if alerted.insert(service.service.clone()) {
                self.sink.notify(&alert_for(service, self.sla));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Healthy,
    /// Some provider is not `Closed`, or no provider is registered.
    Degraded,
    /// Every provider is `Open`; only local fallback results are served.
    Unhealthy,
}

impl OverallStatus {
    fn from_states(states: &[CircuitState]) -> Self {
        if states.is_empty() {
            Self::Degraded
        } else if states.iter().all(|state| *state == CircuitState::Open) {
            Self::Unhealthy
        } else if states.iter().any(|state| *state != CircuitState::Closed) {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall: OverallStatus,
    pub generated_at: UtcDateTime,
    pub services: BTreeMap<String, ServiceHealth>,
    pub stats: GatewayStats,
}

impl HealthReport {
    pub fn build(aggregator: &HealthAggregator, stats: GatewayStats) -> Self {
        let services = aggregator.snapshot();
        let states = services
            .values()
            .map(|health| health.breaker.state)
            .collect::<Vec<_>>();
        Self {
            overall: OverallStatus::from_states(&states),
            generated_at: UtcDateTime::now(),
            services,
            stats,
        }
    }
}
