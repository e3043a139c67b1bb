//! Basic telemetry usage example
//!
//! Shows correlation ids, nested context, redaction and the cloud formats.
//!
//! Run with: cargo run --example basic_usage

use keel_telemetry::{
    correlation::{correlation_scope, RequestContext},
    fields, log_context, scope, with_context, LogFormat, LogLevel, TelemetryConfig,
    TelemetrySystem,
};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = TelemetryConfig::default();
    config.logging.level = LogLevel::Debug;
    config.logging.format = Some(LogFormat::Console);
    config.logging.colorize = true;
    config.privacy.sensitive_fields.push("customer_note".to_string());

    let _guard = TelemetrySystem::init(config.clone()).await?;

    // Plain tracing events go through the same pipeline
    tracing::info!(
        user_id = "user123",
        password = "not-logged",
        "User login event"
    );

    // One request as a unit of work
    correlation_scope(None, async {
        let request = RequestContext::start("POST", "/orders", None)?;

        with_context(fields! { step = "validate" }, |logger| {
            logger.info("Validating order");
        })?;

        let _ctx = log_context(fields! { step = "charge", customer_note = "leave at door" })?;
        keel_telemetry::emit!(
            LogLevel::Info,
            "Charging card",
            card_number = "4111 1111 1111 1111",
            amount_cents = 2599
        );
        sleep(Duration::from_millis(20)).await;

        request.complete(201);
        Ok::<_, keel_telemetry::Error>(())
    })
    .await?;

    // Child tasks get a copy of the parent's bindings
    correlation_scope(Some("batch-42".into()), async {
        let workers: Vec<_> = (0..3)
            .map(|worker| {
                scope::spawn(async move {
                    keel_telemetry::bind_context(fields! { worker = worker });
                    keel_telemetry::emit!(LogLevel::Debug, "Worker finished");
                })
            })
            .collect();
        for worker in workers {
            let _ = worker.await;
        }
    })
    .await;

    // Same record, cloud schemas
    for format in [LogFormat::Json, LogFormat::Gcp, LogFormat::Aws] {
        config.logging.format = Some(format);
        let _reloaded = TelemetrySystem::reload(config.clone()).await?;

        correlation_scope(Some("c1".into()), async {
            keel_telemetry::emit!(LogLevel::Error, "Payment provider unavailable", provider = "acme");
        })
        .await;
    }

    Ok(())
}
