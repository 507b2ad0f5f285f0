//! Identifiers, digests and records shared by the ceremony state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{CeremonyError, Result};
use crate::CEREMONY_ID_HEX_LEN;

/// Ceremony identifier
///
/// Generated ids are the first 8 bytes of SHA-256 over a nanosecond timestamp
/// and 16 bytes of OS randomness, rendered as 16 lowercase hex chars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CeremonyId(String);

impl CeremonyId {
    /// Generate a fresh ceremony id
    pub fn generate() -> Self {
        let nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| Utc::now().timestamp_micros() * 1_000);

        let mut salt = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_be_bytes());
        hasher.update(salt);
        let digest = hasher.finalize();

        Self(hex::encode(&digest[..CEREMONY_ID_HEX_LEN / 2]))
    }

    /// Use an operator-supplied id
    ///
    /// Accepts `[A-Za-z0-9_-]`, at most 64 chars.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > 64 {
            return Err(CeremonyError::Validation {
                ceremony_id: raw,
                reason: "ceremony id must be 1 to 64 characters".to_string(),
            });
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CeremonyError::Validation {
                ceremony_id: raw,
                reason: "ceremony id may only contain [A-Za-z0-9_-]".to_string(),
            });
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CeremonyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CeremonyId {
    type Error = CeremonyError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CeremonyId> for String {
    fn from(id: CeremonyId) -> Self {
        id.0
    }
}

impl FromStr for CeremonyId {
    type Err = CeremonyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Stable participant identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for ParticipantId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ParticipantId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Content digest of a contribution payload (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContributionHash(pub [u8; 32]);

impl ContributionHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Short display format (first 4 bytes as hex)
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for ContributionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContributionHash({})", self.to_hex())
    }
}

impl fmt::Display for ContributionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContributionHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for ContributionHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ContributionHash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContributionHash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// One ceremony party
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,

    pub display_name: String,

    /// Opaque contact string (address, handle, email)
    pub contact: String,

    /// Where turn notifications are delivered, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Participant {
    pub fn new(
        id: impl Into<ParticipantId>,
        display_name: impl Into<String>,
        contact: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            contact: contact.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Status of a single contribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    #[default]
    Pending,
    Completed,
    Failed,
}

/// Ledger entry for one accepted turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionRecord {
    /// 0-based turn the contribution was made at
    pub turn: usize,

    pub participant_id: ParticipantId,

    pub display_name: String,

    pub contribution_hash: ContributionHash,

    pub submitted_at: DateTime<Utc>,

    pub status: ContributionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ceremony lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    /// Created, not yet started
    #[default]
    Waiting,

    InProgress,

    /// Every participant contributed (terminal)
    Completed,

    /// Aborted by the operator (terminal)
    Failed { reason: String },
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::InProgress => "in_progress",
            Phase::Completed => "completed",
            Phase::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a notified participant is being asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandOffAction {
    /// First turn: start from the initial parameters
    StartContribution,

    /// Later turns: build on the previous participant's output
    ContinueContribution,
}

/// The baton pass to the next participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandOff {
    pub ceremony_id: CeremonyId,
    pub participant: Participant,
    pub action: HandOffAction,
    pub turn: usize,
    pub total: usize,
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Turn advanced; `next` must be notified
    HandOff {
        accepted: ContributionRecord,
        next: HandOff,
    },

    /// The last participant contributed and the ceremony is complete
    Completed {
        accepted: ContributionRecord,
        final_hash: ContributionHash,
    },
}

impl SubmissionOutcome {
    pub fn accepted(&self) -> &ContributionRecord {
        match self {
            SubmissionOutcome::HandOff { accepted, .. } => accepted,
            SubmissionOutcome::Completed { accepted, .. } => accepted,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, SubmissionOutcome::Completed { .. })
    }
}

/// Whose turn it is, as reported by `status()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurrentTurn {
    NotStarted,
    Participant { participant: Participant },
    Complete,
    Aborted,
}

/// Read-only view of a ceremony
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeremonyStatus {
    pub ceremony_id: CeremonyId,
    pub phase: Phase,
    pub current_turn: usize,
    pub total_participants: usize,
    pub current: CurrentTurn,
    pub contributions: usize,
    pub updated_at: DateTime<Utc>,

    /// Last failed hand-off delivery, if it has not since succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_warning: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_hash: Option<ContributionHash>,
}

impl CeremonyStatus {
    /// `"turn/total"`
    pub fn progress(&self) -> String {
        format!("{}/{}", self.current_turn, self.total_participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_fixed_length_hex() {
        let id = CeremonyId::generate();
        assert_eq!(id.as_str().len(), CEREMONY_ID_HEX_LEN);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, CeremonyId::generate());
    }

    #[test]
    fn operator_ids_are_validated() {
        assert!(CeremonyId::new("phase2-axiom_01").is_ok());
        assert!(CeremonyId::new("").is_err());
        assert!(CeremonyId::new("has space").is_err());
        assert!(CeremonyId::new("x".repeat(65)).is_err());
    }

    #[test]
    fn contribution_hash_accepts_prefixed_hex() {
        let hash = ContributionHash::new([0xab; 32]);
        let prefixed = format!("0x{}", hash.to_hex().to_uppercase());
        assert_eq!(ContributionHash::from_hex(&prefixed).unwrap(), hash);
        assert!(ContributionHash::from_hex("abcd").is_err());
    }

    #[test]
    fn phase_serializes_tagged() {
        let json = serde_json::to_string(&Phase::Failed {
            reason: "operator abort".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"phase":"failed","reason":"operator abort"}"#);
        assert!(Phase::Completed.is_terminal());
        assert!(!Phase::InProgress.is_terminal());
    }
}
