use std::sync::Arc;

use futures::StreamExt;

use load_alerts::bot::CommandRouter;
use load_alerts::channels::{InboundEvent, PostingSource, SubscriberChannel, TelegramChannel};
use load_alerts::config::AlertsConfig;
use load_alerts::matching::{DispatchPolicy, Dispatcher};
use load_alerts::store::{LibSqlRuleStore, RuleStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AlertsConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export LOAD_ALERTS_BOT_TOKEN=123456:ABC-...");
        eprintln!("  export LOAD_ALERTS_CHANNEL=@your_load_channel");
        std::process::exit(1);
    });

    eprintln!("🚚 Load Alerts v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Channel: @{}", config.load_channel.trim_start_matches('@'));
    eprintln!("   Database: {}", config.db_path);

    // ── Rule store ───────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let store: Arc<dyn RuleStore> = Arc::new(
        LibSqlRuleStore::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
            std::process::exit(1);
        }),
    );

    // ── Transport ────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(
        config.bot_token.clone(),
        &config.load_channel,
        config.poll_timeout_secs,
    ));
    telegram.health_check().await?;

    // ── Matching core ────────────────────────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&store), DispatchPolicy::default()));
    let router = CommandRouter::new(Arc::clone(&store), Arc::clone(&dispatcher));

    let mut events = telegram.start().await?;
    tracing::info!("Load Alerts running");

    // One posting is dispatched fully before the next event is handled,
    // so alert ordering follows posting order.
    while let Some(event) = events.next().await {
        match event {
            InboundEvent::Posting(posting) => {
                router.record_posting(&posting.text);
                match dispatcher.dispatch(&posting.text).await {
                    Ok(alerts) => {
                        if !alerts.is_empty() {
                            let delivered =
                                dispatcher.deliver_all(telegram.as_ref(), &alerts).await;
                            tracing::info!(
                                matched = alerts.len(),
                                delivered,
                                "Posting processed"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Dispatch failed — posting skipped");
                    }
                }
            }
            InboundEvent::Command(command) => {
                match router.handle(command.subscriber_id, &command.text).await {
                    Ok(reply) => {
                        if let Err(e) =
                            telegram.deliver(command.subscriber_id, &reply).await
                        {
                            tracing::warn!(
                                subscriber_id = command.subscriber_id,
                                error = %e,
                                "Failed to deliver command reply"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            subscriber_id = command.subscriber_id,
                            error = %e,
                            "Command handling failed"
                        );
                        let _ = telegram
                            .deliver(
                                command.subscriber_id,
                                "Something went wrong — please try again.",
                            )
                            .await;
                    }
                }
            }
        }
    }

    tracing::warn!("Event stream ended — shutting down");
    Ok(())
}
