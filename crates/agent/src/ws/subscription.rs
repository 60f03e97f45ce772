//! Per-(session, reader) polling with edge detection
//!
//! Each subscription runs one poller that identifies the card on every
//! tick and emits an event only on edges: a UID that differs from the last
//! observed one (arrival) or a no-card result while a UID was stored
//! (removal). Other failures are reported as error events without
//! disturbing the stored UID.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

use nfc_agent_core::{Card, Error, ErrorKind};
use nfc_agent_tags::CardService;

use super::envelope::event_message;

/// Default poll period when the subscriber names none
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_millis(500);
/// Fastest permitted poll period
pub const MIN_POLL_PERIOD: Duration = Duration::from_millis(100);

/// What a single poll outcome means for the subscription
#[derive(Debug, PartialEq)]
pub(crate) enum EdgeEvent {
    /// A card arrived (or changed)
    Card(Box<Card>),
    /// The stored card disappeared
    Removed,
    /// A failure other than no-card
    Error(String),
    /// Nothing changed
    None,
}

/// Fold one poll outcome into the stored UID and decide what to emit.
pub(crate) fn edge_transition(
    last_uid: &mut String,
    outcome: &Result<Card, Error>,
) -> EdgeEvent {
    match outcome {
        Ok(card) if card.uid != *last_uid => {
            *last_uid = card.uid.clone();
            EdgeEvent::Card(Box::new(card.clone()))
        }
        Ok(_) => EdgeEvent::None,
        Err(e) if e.kind() == ErrorKind::NoCard => {
            if last_uid.is_empty() {
                EdgeEvent::None
            } else {
                last_uid.clear();
                EdgeEvent::Removed
            }
        }
        Err(e) => EdgeEvent::Error(format!("{}: {}", e.kind(), e.message())),
    }
}

/// A running poller for one (session, reader) pair
pub(crate) struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    /// Stop the poller. No events are emitted afterwards.
    pub(crate) fn stop(self) {
        self.handle.abort();
    }
}

/// Start the driver loop for one subscription. Events go into the
/// session's bounded outbound queue; overflow severs the session via
/// `closer` instead of ever blocking the loop.
pub(crate) fn spawn_poller(
    service: Arc<CardService>,
    reader_name: String,
    period: Duration,
    out: mpsc::Sender<String>,
    closer: Arc<Notify>,
) -> Subscription {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // A fresh poller has no observed UID, so a card already on the
        // reader re-emits an arrival on the first tick.
        let mut last_uid = String::new();

        loop {
            ticker.tick().await;

            let outcome = service.identify(&reader_name).await;
            let event = edge_transition(&mut last_uid, &outcome);

            let message = match event {
                EdgeEvent::Card(card) => event_message(
                    "card",
                    json!({ "reader_name": reader_name, "card": card }),
                ),
                EdgeEvent::Removed => {
                    event_message("removed", json!({ "reader_name": reader_name }))
                }
                EdgeEvent::Error(error) => {
                    event_message("error", json!({ "reader_name": reader_name, "error": error }))
                }
                EdgeEvent::None => continue,
            };

            if let Err(e) = out.try_send(message) {
                debug!(reader = %reader_name, error = %e, "subscription queue unavailable");
                closer.notify_one();
                return;
            }
        }
    });

    Subscription { handle }
}
