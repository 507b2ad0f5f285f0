//! Ceremony coordinator
//!
//! Wraps one [`Ceremony`] behind an async mutex so that turn validation and
//! ledger append happen atomically, however many callers race. Hand-off
//! notifications are spawned after the transition commits and never hold
//! it up; delivery failures only surface as a warning on `status()`.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use axiom_ceremony::{
    digest_verifier, Ceremony, CeremonyId, CeremonyStatus, ContributionHash, ContributionRecord,
    ContributionVerifier, HandOff, ParticipantId, SubmissionOutcome,
};

use crate::audit::{AuditEvent, AuditLog, AuditRecord};
use crate::error::Result;
use crate::notifier::{DeliveryStatus, Notifier, TurnNotification};

/// Drives a single ceremony
///
/// Dropping a coordinator aborts any delivery still in flight, so call
/// [`Coordinator::flush_notifications`] before letting it go.
pub struct Coordinator {
    ceremony_id: CeremonyId,
    state: Arc<Mutex<Ceremony>>,
    notifier: Arc<dyn Notifier>,
    verifier: Arc<dyn ContributionVerifier>,
    audit: Option<Arc<AuditLog>>,
    deliveries: Mutex<JoinSet<()>>,
}

impl Coordinator {
    /// Coordinate `ceremony`, verifying contributions with its digest algorithm
    pub fn new(ceremony: Ceremony, notifier: Arc<dyn Notifier>) -> Self {
        let verifier: Arc<dyn ContributionVerifier> =
            Arc::from(digest_verifier(ceremony.hash_algorithm()));

        Self {
            ceremony_id: ceremony.ceremony_id().clone(),
            state: Arc::new(Mutex::new(ceremony)),
            notifier,
            verifier,
            audit: None,
            deliveries: Mutex::new(JoinSet::new()),
        }
    }

    /// Replace the verification predicate
    pub fn with_verifier(mut self, verifier: Arc<dyn ContributionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Append every transition to `log`
    pub fn with_audit_log(mut self, log: Arc<AuditLog>) -> Self {
        self.audit = Some(log);
        self
    }

    pub fn ceremony_id(&self) -> &CeremonyId {
        &self.ceremony_id
    }

    /// Log the ceremony's creation; call once, when the ceremony is new
    pub async fn record_creation(&self) {
        let ceremony = self.state.lock().await;
        self.audit(AuditEvent::CeremonyCreated {
            participants: ceremony.participants().iter().map(|p| p.id.clone()).collect(),
            hash_algorithm: ceremony.hash_algorithm(),
        });
        info!(
            ceremony_id = %self.ceremony_id,
            "Ceremony created with {} participants",
            ceremony.participants().len()
        );
    }

    /// Start the ceremony and notify the first participant
    pub async fn start(&self) -> Result<HandOff> {
        let hand_off = {
            let mut ceremony = self.state.lock().await;
            let hand_off = ceremony.start().map_err(|e| {
                warn!(ceremony_id = %self.ceremony_id, "Start rejected: {}", e);
                e
            })?;

            self.audit(AuditEvent::CeremonyStarted {
                first_participant: hand_off.participant.id.clone(),
                total: hand_off.total,
            });
            hand_off
        };

        info!(
            ceremony_id = %self.ceremony_id,
            "Ceremony started, first participant {}",
            hand_off.participant.display_name
        );

        self.dispatch(hand_off.clone()).await;
        Ok(hand_off)
    }

    /// Submit a contribution for the participant whose turn it is
    ///
    /// On acceptance the next participant is notified, or the ceremony
    /// completes.
    pub async fn submit_contribution(
        &self,
        participant_id: &ParticipantId,
        payload: &[u8],
        claimed_hash: &ContributionHash,
    ) -> Result<SubmissionOutcome> {
        let outcome = {
            let mut ceremony = self.state.lock().await;
            let turn = ceremony.current_turn();

            let outcome = match ceremony.submit_contribution(
                participant_id,
                payload,
                claimed_hash,
                self.verifier.as_ref(),
            ) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(
                        ceremony_id = %self.ceremony_id,
                        participant = %participant_id,
                        turn,
                        "Contribution rejected: {}",
                        e
                    );
                    self.audit(AuditEvent::ContributionRejected {
                        turn,
                        participant_id: participant_id.clone(),
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    });
                    return Err(e.into());
                }
            };

            let accepted = outcome.accepted();
            self.audit(AuditEvent::ContributionAccepted {
                turn: accepted.turn,
                participant_id: accepted.participant_id.clone(),
                contribution_hash: accepted.contribution_hash,
            });
            info!(
                ceremony_id = %self.ceremony_id,
                participant = %accepted.participant_id,
                hash = %accepted.contribution_hash.short(),
                "Contribution accepted ({}/{})",
                ceremony.current_turn(),
                ceremony.participants().len()
            );

            if let SubmissionOutcome::Completed { final_hash, .. } = &outcome {
                self.audit(AuditEvent::CeremonyCompleted {
                    contributions: ceremony.current_turn(),
                    final_hash: *final_hash,
                });
                info!(
                    ceremony_id = %self.ceremony_id,
                    final_hash = %final_hash,
                    "Ceremony complete, all {} participants contributed",
                    ceremony.participants().len()
                );
            }

            outcome
        };

        if let SubmissionOutcome::HandOff { next, .. } = &outcome {
            self.dispatch(next.clone()).await;
        }

        Ok(outcome)
    }

    /// Operator abort: moves the ceremony to `Failed`
    pub async fn abort(&self, reason: &str) -> Result<()> {
        let mut ceremony = self.state.lock().await;
        ceremony.abort(reason)?;

        self.audit(AuditEvent::CeremonyAborted {
            turn: ceremony.current_turn(),
            reason: reason.to_string(),
        });
        warn!(ceremony_id = %self.ceremony_id, "Ceremony aborted: {}", reason);
        Ok(())
    }

    pub async fn status(&self) -> CeremonyStatus {
        self.state.lock().await.status()
    }

    pub async fn history(&self) -> Vec<ContributionRecord> {
        self.state.lock().await.history()
    }

    /// Consistent copy of the whole ceremony, for persistence
    pub async fn snapshot(&self) -> Ceremony {
        self.state.lock().await.clone()
    }

    /// Deliveries spawned and not yet reaped
    pub async fn pending_notifications(&self) -> usize {
        self.deliveries.lock().await.len()
    }

    /// Wait for every spawned delivery to finish
    pub async fn flush_notifications(&self) {
        let mut deliveries = self.deliveries.lock().await;
        while let Some(result) = deliveries.join_next().await {
            if let Err(e) = result {
                error!(ceremony_id = %self.ceremony_id, "Notification task failed: {}", e);
            }
        }
    }

    /// Spawn delivery of a hand-off; the transition has already committed
    async fn dispatch(&self, hand_off: HandOff) {
        let message = TurnNotification::from_hand_off(&hand_off);
        let notifier = Arc::clone(&self.notifier);
        let state = Arc::clone(&self.state);
        let audit = self.audit.clone();
        let ceremony_id = self.ceremony_id.clone();

        let mut deliveries = self.deliveries.lock().await;
        while let Some(result) = deliveries.try_join_next() {
            if let Err(e) = result {
                error!(ceremony_id = %self.ceremony_id, "Notification task failed: {}", e);
            }
        }
        deliveries.spawn(async move {
            let participant = &hand_off.participant;
            match notifier.notify(participant, &message).await {
                DeliveryStatus::Delivered => {
                    debug!(
                        ceremony_id = %ceremony_id,
                        participant = %participant.id,
                        "Hand-off delivered"
                    );
                    let mut ceremony = state.lock().await;
                    if ceremony.current_turn() == message.turn {
                        ceremony.clear_notification_warning();
                    }
                }
                DeliveryStatus::Failed { reason } => {
                    warn!(
                        ceremony_id = %ceremony_id,
                        participant = %participant.id,
                        turn = message.turn,
                        "Hand-off delivery failed: {}",
                        reason
                    );
                    let mut ceremony = state.lock().await;
                    let current =
                        ceremony.current_turn() == message.turn && !ceremony.phase().is_terminal();
                    if current {
                        ceremony.record_notification_failure(format!(
                            "could not notify {} for turn {}: {}",
                            participant.id, message.turn, reason
                        ));
                    } else {
                        debug!(
                            ceremony_id = %ceremony_id,
                            turn = message.turn,
                            "Turn already over, not raising a warning"
                        );
                    }
                    drop(ceremony);
                    write_audit(
                        audit.as_deref(),
                        AuditRecord::new(
                            ceremony_id.clone(),
                            AuditEvent::NotificationFailed {
                                turn: message.turn,
                                participant_id: participant.id.clone(),
                                reason,
                            },
                        ),
                    );
                }
            }
        });
    }

    fn audit(&self, event: AuditEvent) {
        write_audit(
            self.audit.as_deref(),
            AuditRecord::new(self.ceremony_id.clone(), event),
        );
    }
}

/// Audit failures are logged, never propagated into the transition
fn write_audit(log: Option<&AuditLog>, record: AuditRecord) {
    if let Some(log) = log {
        if let Err(e) = log.append(&record) {
            error!(
                ceremony_id = %record.ceremony_id,
                "Failed to append {} to audit log {:?}: {}",
                record.event.event_type(),
                log.path(),
                e
            );
        }
    }
}
