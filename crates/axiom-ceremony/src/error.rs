//! Error types for ceremony operations
//!
//! Every variant is local to the operation that raised it: none of them
//! changes ceremony state, and none of them moves a ceremony to `Failed`.

use thiserror::Error;

use crate::types::{ContributionHash, ParticipantId};

/// Result type for ceremony operations
pub type Result<T> = std::result::Result<T, CeremonyError>;

/// Errors raised by the ceremony state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CeremonyError {
    /// A precondition was not met
    #[error("Validation failed for ceremony {ceremony_id}: {reason}")]
    Validation { ceremony_id: String, reason: String },

    /// A participant submitted outside of its turn
    #[error(
        "Out-of-turn submission in ceremony {ceremony_id}: {participant_id} submitted at turn {turn}, expected {}",
        expected_name(.expected)
    )]
    OutOfTurn {
        ceremony_id: String,
        participant_id: ParticipantId,
        expected: Option<ParticipantId>,
        turn: usize,
    },

    /// The contribution did not verify; the turn stays open
    #[error(
        "Verification failed in ceremony {ceremony_id} for {participant_id} at turn {turn}: {failure}"
    )]
    Verification {
        ceremony_id: String,
        participant_id: ParticipantId,
        turn: usize,
        failure: VerificationFailure,
    },

    /// The operation is not valid in the current phase
    #[error("Invalid transition in ceremony {ceremony_id}: cannot {operation} while {phase}")]
    InvalidTransition {
        ceremony_id: String,
        operation: &'static str,
        phase: &'static str,
    },
}

impl CeremonyError {
    /// Short machine-readable kind, used in audit records
    pub fn kind(&self) -> &'static str {
        match self {
            CeremonyError::Validation { .. } => "validation",
            CeremonyError::OutOfTurn { .. } => "out_of_turn",
            CeremonyError::Verification { .. } => "verification",
            CeremonyError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}

fn expected_name(expected: &Option<ParticipantId>) -> &str {
    expected.as_ref().map(|p| p.as_str()).unwrap_or("nobody")
}

/// Why a contribution was rejected by a verifier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// Recomputed digest differs from the claimed one
    #[error("hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch {
        claimed: ContributionHash,
        computed: ContributionHash,
    },

    /// Same digest already sits in the ledger
    #[error("duplicate contribution {hash}, already submitted by {previous}")]
    DuplicateContribution {
        hash: ContributionHash,
        previous: ParticipantId,
    },

    /// Payload rejected by a custom predicate
    #[error("rejected: {0}")]
    Rejected(String),
}
