//! Turn notifications
//!
//! Hand-off delivery is best effort. A [`Notifier`] reports how delivery went
//! but never returns an error into the coordinator; retries are the
//! transport's business.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use axiom_ceremony::{CeremonyId, HandOff, HandOffAction, Participant, ParticipantId};

/// Message sent to the participant whose turn has come
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnNotification {
    pub ceremony_id: CeremonyId,
    pub action: HandOffAction,
    pub participant_id: ParticipantId,
    pub participant_name: String,
    pub turn: usize,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
}

impl TurnNotification {
    pub fn from_hand_off(hand_off: &HandOff) -> Self {
        Self {
            ceremony_id: hand_off.ceremony_id.clone(),
            action: hand_off.action,
            participant_id: hand_off.participant.id.clone(),
            participant_name: hand_off.participant.display_name.clone(),
            turn: hand_off.turn,
            total: hand_off.total,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed { reason: String },
}

impl DeliveryStatus {
    pub fn failed(reason: impl Into<String>) -> Self {
        DeliveryStatus::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered)
    }
}

/// Delivers hand-off messages to participants
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, participant: &Participant, message: &TurnNotification)
        -> DeliveryStatus;
}

/// Writes notifications to the tracing log only
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        participant: &Participant,
        message: &TurnNotification,
    ) -> DeliveryStatus {
        info!(
            ceremony_id = %message.ceremony_id,
            participant = %participant.id,
            contact = %participant.contact,
            turn = message.turn,
            "Notifying {} ({}/{})",
            participant.display_name,
            message.turn + 1,
            message.total
        );
        DeliveryStatus::Delivered
    }
}

/// File-drop transport: one JSON document per notification in a directory
///
/// Whatever relays messages to participants picks them up from there.
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
    dir: PathBuf,
}

impl OutboxNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    fn message_path(&self, message: &TurnNotification) -> PathBuf {
        self.dir.join(format!(
            "{}_{:04}_{}.json",
            message.ceremony_id,
            message.turn,
            sanitize(message.participant_id.as_str())
        ))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn notify(
        &self,
        participant: &Participant,
        message: &TurnNotification,
    ) -> DeliveryStatus {
        #[derive(Serialize)]
        struct Envelope<'a> {
            endpoint: Option<&'a str>,
            contact: &'a str,
            #[serde(flatten)]
            message: &'a TurnNotification,
        }

        let envelope = Envelope {
            endpoint: participant.endpoint.as_deref(),
            contact: &participant.contact,
            message,
        };

        let content = match serde_json::to_string_pretty(&envelope) {
            Ok(content) => content,
            Err(e) => return DeliveryStatus::failed(format!("encode notification: {}", e)),
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            return DeliveryStatus::failed(format!("create outbox {:?}: {}", self.dir, e));
        }

        let path = self.message_path(message);
        let temp_path = path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&temp_path, content).await {
            return DeliveryStatus::failed(format!("write {:?}: {}", temp_path, e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            return DeliveryStatus::failed(format!("publish {:?}: {}", path, e));
        }

        debug!("Queued notification for {} at {:?}", participant.id, path);
        DeliveryStatus::Delivered
    }
}

/// In-memory notifier that records every message
///
/// Participants listed with [`MemoryNotifier::fail_for`] are treated as
/// unreachable.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<TurnNotification>>,
    unreachable: Mutex<HashSet<ParticipantId>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, participant_id: impl Into<ParticipantId>) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.insert(participant_id.into());
        }
    }

    pub fn restore(&self, participant_id: &ParticipantId) {
        if let Ok(mut unreachable) = self.unreachable.lock() {
            unreachable.remove(participant_id);
        }
    }

    /// Messages delivered so far, in delivery order
    pub fn sent(&self) -> Vec<TurnNotification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn recipients(&self) -> Vec<ParticipantId> {
        self.sent().into_iter().map(|m| m.participant_id).collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify(
        &self,
        participant: &Participant,
        message: &TurnNotification,
    ) -> DeliveryStatus {
        let unreachable = self
            .unreachable
            .lock()
            .map(|u| u.contains(&participant.id))
            .unwrap_or(false);
        if unreachable {
            return DeliveryStatus::failed(format!("{} is unreachable", participant.id));
        }

        match self.sent.lock() {
            Ok(mut sent) => {
                sent.push(message.clone());
                DeliveryStatus::Delivered
            }
            Err(_) => DeliveryStatus::failed("notifier state poisoned"),
        }
    }
}
