//! Sequential baton-pass ceremony state machine
//!
//! Participants contribute strictly in registration order. A turn advances
//! only after the current participant's contribution verifies; a stalled
//! participant blocks every later turn until an operator aborts.
//!
//! ```text
//! Waiting --start--> InProgress --last submission--> Completed
//!    |                   |
//!    +------abort--------+--------------------------> Failed
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CeremonyError, Result, VerificationFailure};
use crate::hash::{transcript_hash, ContributionVerifier, HashAlgorithm};
use crate::types::{
    CeremonyId, CeremonyStatus, ContributionHash, ContributionRecord, ContributionStatus,
    CurrentTurn, HandOff, HandOffAction, Participant, ParticipantId, Phase, SubmissionOutcome,
};
use crate::MIN_PARTICIPANTS;

/// Aggregate state of one ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ceremony {
    ceremony_id: CeremonyId,
    phase: Phase,
    participants: Vec<Participant>,
    current_turn: usize,
    ledger: Vec<ContributionRecord>,
    hash_algorithm: HashAlgorithm,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    notification_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_hash: Option<ContributionHash>,
}

impl Ceremony {
    /// Create a ceremony in the `Waiting` phase
    ///
    /// Participant ids must be non-empty and unique. The minimum roster size
    /// is only enforced by [`Ceremony::start`].
    pub fn new(
        ceremony_id: CeremonyId,
        participants: Vec<Participant>,
        hash_algorithm: HashAlgorithm,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for participant in &participants {
            if participant.id.as_str().trim().is_empty() {
                return Err(CeremonyError::Validation {
                    ceremony_id: ceremony_id.to_string(),
                    reason: "participant id must not be empty".to_string(),
                });
            }
            if !seen.insert(participant.id.clone()) {
                return Err(CeremonyError::Validation {
                    ceremony_id: ceremony_id.to_string(),
                    reason: format!("duplicate participant id: {}", participant.id),
                });
            }
        }

        let now = Utc::now();
        Ok(Self {
            ceremony_id,
            phase: Phase::Waiting,
            participants,
            current_turn: 0,
            ledger: Vec::new(),
            hash_algorithm,
            created_at: now,
            updated_at: now,
            notification_warning: None,
            final_hash: None,
        })
    }

    /// Create a ceremony with a freshly generated id
    pub fn with_generated_id(
        participants: Vec<Participant>,
        hash_algorithm: HashAlgorithm,
    ) -> Result<Self> {
        Self::new(CeremonyId::generate(), participants, hash_algorithm)
    }

    pub fn ceremony_id(&self) -> &CeremonyId {
        &self.ceremony_id
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn current_turn(&self) -> usize {
        self.current_turn
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn final_hash(&self) -> Option<&ContributionHash> {
        self.final_hash.as_ref()
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Participant whose turn it is, while in progress
    pub fn current_participant(&self) -> Option<&Participant> {
        match self.phase {
            Phase::InProgress => self.participants.get(self.current_turn),
            _ => None,
        }
    }

    /// Begin the ceremony and hand the baton to the first participant
    pub fn start(&mut self) -> Result<HandOff> {
        if self.phase != Phase::Waiting {
            return Err(self.invalid_transition("start"));
        }

        if self.participants.len() < MIN_PARTICIPANTS {
            return Err(CeremonyError::Validation {
                ceremony_id: self.ceremony_id.to_string(),
                reason: format!(
                    "at least {} participants required, got {}",
                    MIN_PARTICIPANTS,
                    self.participants.len()
                ),
            });
        }

        self.phase = Phase::InProgress;
        self.touch();

        Ok(self.hand_off(HandOffAction::StartContribution))
    }

    /// Accept the current participant's contribution
    ///
    /// Rejections leave the ceremony untouched; the same participant may
    /// resubmit.
    pub fn submit_contribution(
        &mut self,
        participant_id: &ParticipantId,
        payload: &[u8],
        claimed_hash: &ContributionHash,
        verifier: &dyn ContributionVerifier,
    ) -> Result<SubmissionOutcome> {
        if self.phase != Phase::InProgress {
            return Err(self.invalid_transition("submit a contribution"));
        }

        let expected = &self.participants[self.current_turn];
        if &expected.id != participant_id {
            return Err(CeremonyError::OutOfTurn {
                ceremony_id: self.ceremony_id.to_string(),
                participant_id: participant_id.clone(),
                expected: Some(expected.id.clone()),
                turn: self.current_turn,
            });
        }

        let computed = verifier
            .verify(expected, payload, claimed_hash)
            .map_err(|failure| self.verification_error(participant_id, failure))?;

        if let Some(previous) = self.ledger.iter().find(|r| r.contribution_hash == computed) {
            let failure = VerificationFailure::DuplicateContribution {
                hash: computed,
                previous: previous.participant_id.clone(),
            };
            return Err(self.verification_error(participant_id, failure));
        }

        let record = ContributionRecord {
            turn: self.current_turn,
            participant_id: expected.id.clone(),
            display_name: expected.display_name.clone(),
            contribution_hash: computed,
            submitted_at: Utc::now(),
            status: ContributionStatus::Completed,
            error: None,
        };

        self.ledger.push(record.clone());
        self.current_turn += 1;
        self.touch();

        if self.current_turn == self.participants.len() {
            let final_hash = transcript_hash(&self.ledger);
            self.final_hash = Some(final_hash);
            self.phase = Phase::Completed;
            return Ok(SubmissionOutcome::Completed {
                accepted: record,
                final_hash,
            });
        }

        Ok(SubmissionOutcome::HandOff {
            accepted: record,
            next: self.hand_off(HandOffAction::ContinueContribution),
        })
    }

    /// Operator abort; the only way into `Failed`
    pub fn abort(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.phase.is_terminal() {
            return Err(self.invalid_transition("abort"));
        }

        self.phase = Phase::Failed {
            reason: reason.into(),
        };
        self.touch();
        Ok(())
    }

    pub fn status(&self) -> CeremonyStatus {
        let current = match &self.phase {
            Phase::Waiting => CurrentTurn::NotStarted,
            Phase::InProgress => CurrentTurn::Participant {
                participant: self.participants[self.current_turn].clone(),
            },
            Phase::Completed => CurrentTurn::Complete,
            Phase::Failed { .. } => CurrentTurn::Aborted,
        };

        CeremonyStatus {
            ceremony_id: self.ceremony_id.clone(),
            phase: self.phase.clone(),
            current_turn: self.current_turn,
            total_participants: self.participants.len(),
            current,
            contributions: self.ledger.len(),
            updated_at: self.updated_at,
            notification_warning: self.notification_warning.clone(),
            final_hash: self.final_hash,
        }
    }

    /// Owned copy of the ledger
    pub fn history(&self) -> Vec<ContributionRecord> {
        self.ledger.clone()
    }

    /// Surface a failed hand-off delivery through `status()`
    pub fn record_notification_failure(&mut self, message: impl Into<String>) {
        self.notification_warning = Some(message.into());
    }

    pub fn clear_notification_warning(&mut self) {
        self.notification_warning = None;
    }

    /// Check structural invariants, e.g. after loading a snapshot
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |reason: String| CeremonyError::Validation {
            ceremony_id: self.ceremony_id.to_string(),
            reason,
        };

        if self.ledger.len() != self.current_turn {
            return Err(fail(format!(
                "ledger holds {} records but turn is {}",
                self.ledger.len(),
                self.current_turn
            )));
        }
        if self.current_turn > self.participants.len() {
            return Err(fail(format!(
                "turn {} exceeds {} participants",
                self.current_turn,
                self.participants.len()
            )));
        }
        for (turn, (record, participant)) in self.ledger.iter().zip(&self.participants).enumerate()
        {
            if record.turn != turn || record.participant_id != participant.id {
                return Err(fail(format!(
                    "ledger entry {} does not belong to {}",
                    turn, participant.id
                )));
            }
        }

        let mut ids = HashSet::new();
        if !self.participants.iter().all(|p| ids.insert(&p.id)) {
            return Err(fail("duplicate participant ids".to_string()));
        }
        if self.phase != Phase::Waiting && self.participants.len() < MIN_PARTICIPANTS {
            return Err(fail(format!(
                "{} ceremony has fewer than {} participants",
                self.phase, MIN_PARTICIPANTS
            )));
        }

        let complete = self.current_turn == self.participants.len() && !self.participants.is_empty();
        match &self.phase {
            Phase::Waiting if self.current_turn != 0 => {
                Err(fail("waiting ceremony has contributions".to_string()))
            }
            Phase::InProgress if complete => {
                Err(fail("every participant contributed but ceremony is open".to_string()))
            }
            Phase::Completed if !complete => {
                Err(fail("completed ceremony is missing contributions".to_string()))
            }
            Phase::Completed if self.final_hash != Some(transcript_hash(&self.ledger)) => {
                Err(fail("final hash does not match ledger".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn hand_off(&self, action: HandOffAction) -> HandOff {
        HandOff {
            ceremony_id: self.ceremony_id.clone(),
            participant: self.participants[self.current_turn].clone(),
            action,
            turn: self.current_turn,
            total: self.participants.len(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid_transition(&self, operation: &'static str) -> CeremonyError {
        CeremonyError::InvalidTransition {
            ceremony_id: self.ceremony_id.to_string(),
            operation,
            phase: self.phase.name(),
        }
    }

    fn verification_error(
        &self,
        participant_id: &ParticipantId,
        failure: VerificationFailure,
    ) -> CeremonyError {
        CeremonyError::Verification {
            ceremony_id: self.ceremony_id.to_string(),
            participant_id: participant_id.clone(),
            turn: self.current_turn,
            failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{ContentHasher, DigestVerifier, Sha256Hasher};

    fn roster(ids: &[&str]) -> Vec<Participant> {
        ids.iter()
            .map(|id| Participant::new(*id, id.to_uppercase(), format!("{}@axiom.test", id)))
            .collect()
    }

    fn ceremony(ids: &[&str]) -> Ceremony {
        Ceremony::new(
            CeremonyId::new("test-ceremony").unwrap(),
            roster(ids),
            HashAlgorithm::Sha256,
        )
        .unwrap()
    }

    fn hash(payload: &[u8]) -> ContributionHash {
        Sha256Hasher.compute_hash(payload)
    }

    fn verifier() -> DigestVerifier<Sha256Hasher> {
        DigestVerifier::new(Sha256Hasher)
    }

    #[test]
    fn start_requires_two_participants() {
        let mut c = ceremony(&["solo"]);
        let err = c.start().unwrap_err();
        assert!(matches!(err, CeremonyError::Validation { .. }));
        assert_eq!(c.phase(), &Phase::Waiting);
    }

    #[test]
    fn start_hands_off_to_first_participant() {
        let mut c = ceremony(&["a", "b"]);
        let hand_off = c.start().unwrap();
        assert_eq!(hand_off.participant.id, "a");
        assert_eq!(hand_off.action, HandOffAction::StartContribution);
        assert_eq!(hand_off.turn, 0);
        assert_eq!(c.phase(), &Phase::InProgress);
    }

    #[test]
    fn double_start_is_invalid_transition() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        let err = c.start().unwrap_err();
        assert!(matches!(
            err,
            CeremonyError::InvalidTransition { operation: "start", phase: "in_progress", .. }
        ));
    }

    #[test]
    fn duplicate_participants_are_rejected() {
        let err = Ceremony::new(
            CeremonyId::generate(),
            roster(&["a", "b", "a"]),
            HashAlgorithm::Sha256,
        )
        .unwrap_err();
        assert!(matches!(err, CeremonyError::Validation { .. }));
    }

    #[test]
    fn submit_before_start_is_invalid_transition() {
        let mut c = ceremony(&["a", "b"]);
        let err = c
            .submit_contribution(&"a".into(), b"x", &hash(b"x"), &verifier())
            .unwrap_err();
        assert!(matches!(err, CeremonyError::InvalidTransition { .. }));
    }

    #[test]
    fn unknown_participant_is_out_of_turn() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        let err = c
            .submit_contribution(&"mallory".into(), b"x", &hash(b"x"), &verifier())
            .unwrap_err();
        match err {
            CeremonyError::OutOfTurn { expected, turn, .. } => {
                assert_eq!(expected, Some(ParticipantId::from("a")));
                assert_eq!(turn, 0);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(c.history().is_empty());
    }

    #[test]
    fn duplicate_contribution_is_rejected() {
        let mut c = ceremony(&["a", "b", "c"]);
        c.start().unwrap();
        c.submit_contribution(&"a".into(), b"same", &hash(b"same"), &verifier())
            .unwrap();
        let err = c
            .submit_contribution(&"b".into(), b"same", &hash(b"same"), &verifier())
            .unwrap_err();
        match err {
            CeremonyError::Verification {
                failure: VerificationFailure::DuplicateContribution { previous, .. },
                ..
            } => assert_eq!(previous, "a"),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(c.current_turn(), 1);
    }

    #[test]
    fn final_submission_completes_with_transcript_hash() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        c.submit_contribution(&"a".into(), b"1", &hash(b"1"), &verifier())
            .unwrap();
        let outcome = c
            .submit_contribution(&"b".into(), b"2", &hash(b"2"), &verifier())
            .unwrap();

        let expected = transcript_hash(&c.history());
        match outcome {
            SubmissionOutcome::Completed { final_hash, accepted } => {
                assert_eq!(final_hash, expected);
                assert_eq!(accepted.turn, 1);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(c.phase(), &Phase::Completed);
        assert_eq!(c.status().current, CurrentTurn::Complete);
        assert!(c.check_invariants().is_ok());
    }

    #[test]
    fn abort_is_terminal() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        c.abort("participant a unreachable").unwrap();
        assert!(c.phase().is_terminal());
        assert_eq!(c.status().current, CurrentTurn::Aborted);
        assert!(c.abort("again").is_err());
        assert!(c
            .submit_contribution(&"a".into(), b"1", &hash(b"1"), &verifier())
            .is_err());
    }

    #[test]
    fn waiting_ceremony_can_be_aborted() {
        let mut c = ceremony(&["a", "b"]);
        c.abort("cancelled before start").unwrap();
        assert!(matches!(c.phase(), Phase::Failed { .. }));
        assert!(c.start().is_err());
    }

    #[test]
    fn history_is_a_copy() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        c.submit_contribution(&"a".into(), b"1", &hash(b"1"), &verifier())
            .unwrap();
        let mut snapshot = c.history();
        snapshot.clear();
        assert_eq!(c.history().len(), 1);
    }

    #[test]
    fn notification_warning_surfaces_in_status() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        c.record_notification_failure("endpoint refused connection");
        assert_eq!(
            c.status().notification_warning.as_deref(),
            Some("endpoint refused connection")
        );
        c.clear_notification_warning();
        assert!(c.status().notification_warning.is_none());
    }

    #[test]
    fn tampered_snapshot_fails_invariants() {
        let mut c = ceremony(&["a", "b"]);
        c.start().unwrap();
        c.submit_contribution(&"a".into(), b"1", &hash(b"1"), &verifier())
            .unwrap();

        let mut json: serde_json::Value = serde_json::to_value(&c).unwrap();
        json["current_turn"] = serde_json::json!(0);
        let tampered: Ceremony = serde_json::from_value(json).unwrap();
        assert!(tampered.check_invariants().is_err());
    }
}
