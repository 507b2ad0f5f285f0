//! Axiom Ceremony - Sequential multi-party contribution protocol
//!
//! This crate holds the pure state machine behind the Axiom trusted setup:
//! an ordered roster of participants passes a baton, each contributing once
//! and in turn, with every contribution verified by recomputing its digest
//! before the next participant is handed the turn.
//!
//! Nothing here performs I/O. Notification delivery, locking and audit
//! logging live in `axiom-coordinator`.

pub mod ceremony;
pub mod error;
pub mod hash;
pub mod types;

pub use ceremony::Ceremony;
pub use error::{CeremonyError, Result, VerificationFailure};
pub use hash::{
    digest_verifier, transcript_hash, transcript_hash_of, ContentHasher, ContributionVerifier,
    DigestVerifier, HashAlgorithm, Sha256Hasher, Sha3Hasher,
};
pub use types::{
    CeremonyId, CeremonyStatus, ContributionHash, ContributionRecord, ContributionStatus,
    CurrentTurn, HandOff, HandOffAction, Participant, ParticipantId, Phase, SubmissionOutcome,
};

/// Smallest roster that can start: a hand-off needs a sender and a receiver
pub const MIN_PARTICIPANTS: usize = 2;

/// Length of generated ceremony ids, in hex chars
pub const CEREMONY_ID_HEX_LEN: usize = 16;
