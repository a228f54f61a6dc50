use std::sync::Arc;
use std::time::Duration;

use aigate_core::{AppConfig, Gateway, HealthMonitor, TracingAlertSink};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::info;

use crate::cli::HealthArgs;
use crate::error::CliError;

pub async fn run(args: &HealthArgs, gateway: &Gateway, config: &AppConfig) -> Result<Value, CliError> {
    let sla = args
        .sla_secs
        .map_or_else(|| config.gateway.health_sla(), Duration::from_secs);

    if let Some(watch_secs) = args.watch_secs {
        let monitor = HealthMonitor::from_settings(
            gateway.health(),
            &config.gateway,
            Arc::new(TracingAlertSink),
        )
        .with_sla(sla);
        watch(monitor, Duration::from_secs(watch_secs)).await?;
    }

    let stuck = gateway.health().check(sla, &TracingAlertSink);
    let report = gateway.health_report();

    Ok(json!({
        "report": report,
        "stuck_open": stuck,
        "sla_secs": sla.as_secs(),
    }))
}

async fn watch(monitor: HealthMonitor, period: Duration) -> Result<(), CliError> {
    let (shutdown, receiver) = broadcast::channel(1);
    let handle = tokio::spawn(monitor.run(receiver));

    tokio::select! {
        _ = tokio::time::sleep(period) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, stopping health monitor");
        }
    }

    // The monitor also exits when every sender is gone.
    let _ = shutdown.send(());
    handle
        .await
        .map_err(|error| CliError::Command(format!("health monitor task failed: {error}")))
}
