//! Draw day: one event from sign-up to final roster.
//!
//! Twelve entrants join a class with four places. The organizer draws,
//! some invitees decline and are backfilled, the rest accept, and the event
//! is finalized. Every delivery is logged instead of sent.
//!
//! ```text
//! RUST_LOG=draw_day=info,enrollment_runtime=info cargo run -p draw-day
//! ENROLLMENT_LOTTERY_SEED=7 cargo run -p draw-day   # reproducible draw
//! ```

use anyhow::Context;
use enrollment_core::dispatcher::{DispatchError, NotificationDispatcher};
use enrollment_core::event::{CapacityPolicy, EventDraft, Pool};
use enrollment_core::ids::{EntrantId, EventId, NotificationId};
use enrollment_core::notification::ResponseState;
use enrollment_runtime::{EngineConfig, MetricsRecorder, ResponseOutcome, SelectionEngine};
use enrollment_testing::InMemoryEventStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Delivery stand-in that writes each message to the log.
struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn send(
        &self,
        notification_id: NotificationId,
        entrant_id: EntrantId,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(async move {
            info!(%notification_id, %entrant_id, %message, "delivered");
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = EngineConfig::from_env();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.observability.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let recorder = if config.observability.metrics_enabled {
        Some(MetricsRecorder::install().context("installing metrics recorder")?)
    } else {
        None
    };
    info!(
        max_retries = config.retry.max_retries,
        seed = ?config.lottery.seed,
        metrics = config.observability.metrics_enabled,
        "Configuration loaded"
    );

    let store = InMemoryEventStore::new();
    let engine = SelectionEngine::from_config(Arc::new(store.clone()), Arc::new(LogDispatcher), &config);

    let event = EventId::new("wheel-throwing-101");
    engine
        .create_event(EventDraft::new(
            event.clone(),
            "Wheel Throwing 101",
            CapacityPolicy::new(4).with_waiting_list_limit(12),
        ))
        .await?;

    for n in 1..=12 {
        engine.join(&event, &EntrantId::new(format!("entrant-{n:02}"))).await?;
    }
    if let Err(error) = engine.join(&event, &EntrantId::new("entrant-13")).await {
        warn!(%error, "late sign-up turned away");
    }
    engine.withdraw(&event, &EntrantId::new("entrant-12")).await?;

    let lottery = engine.run_lottery(&event, 4).await?;
    info!(drawn = ?lottery.drawn, "lottery drawn");

    // The first two invitees decline; everyone else who is invited accepts.
    let mut declines = 2;
    loop {
        let pending: Vec<_> = store
            .notifications()
            .into_iter()
            .filter(|n| n.event_id == event && n.is_pending())
            .collect();
        if pending.is_empty() {
            break;
        }
        for notification in pending {
            let accept = declines == 0;
            if !accept {
                declines -= 1;
            }
            match engine.record_response(notification.id, accept).await? {
                ResponseOutcome::Recorded {
                    state: ResponseState::Declined,
                    replacement,
                } => info!(entrant_id = %notification.entrant_id, ?replacement, "declined"),
                ResponseOutcome::Recorded { state, .. } => {
                    info!(entrant_id = %notification.entrant_id, %state, "answered");
                },
                ResponseOutcome::AlreadyRecorded(state) => {
                    info!(entrant_id = %notification.entrant_id, %state, "already answered");
                },
            }
        }
    }

    let outcome = engine.finalize(&event).await?;
    info!(
        final_entrants = ?outcome.final_entrants,
        cancelled = outcome.cancelled,
        "event finalized"
    );

    engine
        .announce(&event, Pool::Final, "See you at the studio on Saturday!")
        .await?;

    let record = engine.snapshot(&event).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);

    if let Some(text) = recorder.as_ref().and_then(MetricsRecorder::render) {
        println!("{text}");
    }
    Ok(())
}
