//! Append-only ceremony event log
//!
//! Each state transition is appended as one JSON line:
//!
//! ```text
//! {"timestamp":"...","ceremony_id":"...","event_type":"CONTRIBUTION_ACCEPTED","data":{...}}
//! ```
//!
//! The log exists for external audit. It is not replayed into a ceremony;
//! [`verify_log`] only checks that what it records is self-consistent.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use axiom_ceremony::{
    transcript_hash_of, CeremonyId, ContributionHash, ContributionRecord, HashAlgorithm,
    ParticipantId,
};

use crate::error::{CoordinatorError, Result};

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub ceremony_id: CeremonyId,
    #[serde(flatten)]
    pub event: AuditEvent,
}

impl AuditRecord {
    pub fn new(ceremony_id: CeremonyId, event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            ceremony_id,
            event,
        }
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Ceremony events, tagged by `event_type` with their payload under `data`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event_type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum AuditEvent {
    CeremonyCreated {
        participants: Vec<ParticipantId>,
        hash_algorithm: HashAlgorithm,
    },
    CeremonyStarted {
        first_participant: ParticipantId,
        total: usize,
    },
    ContributionAccepted {
        turn: usize,
        participant_id: ParticipantId,
        contribution_hash: ContributionHash,
    },
    ContributionRejected {
        turn: usize,
        participant_id: ParticipantId,
        kind: String,
        reason: String,
    },
    NotificationFailed {
        turn: usize,
        participant_id: ParticipantId,
        reason: String,
    },
    CeremonyCompleted {
        contributions: usize,
        final_hash: ContributionHash,
    },
    CeremonyAborted {
        turn: usize,
        reason: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AuditEvent::CeremonyCreated { .. } => "CEREMONY_CREATED",
            AuditEvent::CeremonyStarted { .. } => "CEREMONY_STARTED",
            AuditEvent::ContributionAccepted { .. } => "CONTRIBUTION_ACCEPTED",
            AuditEvent::ContributionRejected { .. } => "CONTRIBUTION_REJECTED",
            AuditEvent::NotificationFailed { .. } => "NOTIFICATION_FAILED",
            AuditEvent::CeremonyCompleted { .. } => "CEREMONY_COMPLETED",
            AuditEvent::CeremonyAborted { .. } => "CEREMONY_ABORTED",
        }
    }
}

/// JSON-lines audit log opened for appending
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// Open (or create) a log file for appending
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = record.to_line()?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| CoordinatorError::AuditLog("log file lock poisoned".to_string()))?;
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}

/// Parse a single log line
pub fn parse_line(line: &str) -> Result<AuditRecord> {
    Ok(serde_json::from_str(line)?)
}

/// Read every record in a log file; blank lines are skipped
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<AuditRecord>> {
    let file = File::open(path.as_ref())?;
    let mut records = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = parse_line(&line).map_err(|e| {
            CoordinatorError::AuditLog(format!("line {}: {}", index + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Accepted-contribution records for a ledger, in ledger order
pub fn records_from_history(
    ceremony_id: &CeremonyId,
    history: &[ContributionRecord],
) -> Vec<AuditRecord> {
    history
        .iter()
        .map(|record| AuditRecord {
            timestamp: record.submitted_at,
            ceremony_id: ceremony_id.clone(),
            event: AuditEvent::ContributionAccepted {
                turn: record.turn,
                participant_id: record.participant_id.clone(),
                contribution_hash: record.contribution_hash,
            },
        })
        .collect()
}

/// Ordered `(participant, digest)` pairs of accepted contributions
pub fn contributions_from_log<'a>(
    records: impl IntoIterator<Item = &'a AuditRecord>,
    ceremony_id: &CeremonyId,
) -> Vec<(ParticipantId, ContributionHash)> {
    records
        .into_iter()
        .filter(|r| &r.ceremony_id == ceremony_id)
        .filter_map(|r| match &r.event {
            AuditEvent::ContributionAccepted {
                participant_id,
                contribution_hash,
                ..
            } => Some((participant_id.clone(), *contribution_hash)),
            _ => None,
        })
        .collect()
}

/// Result of checking one ceremony's log entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogVerification {
    pub ceremony_id: CeremonyId,
    pub contributions: Vec<(ParticipantId, ContributionHash)>,
    /// Final hash claimed by the completion event, if any
    pub recorded_final_hash: Option<ContributionHash>,
    /// Transcript hash recomputed from the accepted contributions
    pub recomputed_final_hash: ContributionHash,
    pub completed: bool,
    pub aborted: bool,
    pub issues: Vec<String>,
}

impl LogVerification {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check every ceremony found in a log
///
/// Results come back in order of first appearance.
pub fn verify_log(records: &[AuditRecord]) -> Vec<LogVerification> {
    let mut ids: Vec<&CeremonyId> = Vec::new();
    for record in records {
        if !ids.contains(&&record.ceremony_id) {
            ids.push(&record.ceremony_id);
        }
    }

    ids.into_iter()
        .map(|id| verify_ceremony(records, id))
        .collect()
}

fn verify_ceremony(records: &[AuditRecord], ceremony_id: &CeremonyId) -> LogVerification {
    let mut issues = Vec::new();
    let mut roster: Option<&Vec<ParticipantId>> = None;
    let mut contributions = Vec::new();
    let mut seen_participants = HashSet::new();
    let mut seen_hashes = HashSet::new();
    let mut recorded_final_hash = None;
    let mut completed = false;
    let mut aborted = false;

    for record in records.iter().filter(|r| &r.ceremony_id == ceremony_id) {
        if completed || aborted {
            if let AuditEvent::ContributionAccepted { turn, .. } = &record.event {
                issues.push(format!("contribution at turn {} after terminal event", turn));
            }
        }

        match &record.event {
            AuditEvent::CeremonyCreated { participants, .. } => roster = Some(participants),
            AuditEvent::ContributionAccepted {
                turn,
                participant_id,
                contribution_hash,
            } => {
                if *turn != contributions.len() {
                    issues.push(format!(
                        "turn {} recorded where turn {} was expected",
                        turn,
                        contributions.len()
                    ));
                }
                if let Some(expected) = roster.and_then(|r| r.get(*turn)) {
                    if expected != participant_id {
                        issues.push(format!(
                            "turn {} taken by {} but roster expects {}",
                            turn, participant_id, expected
                        ));
                    }
                }
                if !seen_participants.insert(participant_id.clone()) {
                    issues.push(format!("{} contributed more than once", participant_id));
                }
                if !seen_hashes.insert(*contribution_hash) {
                    issues.push(format!("duplicate contribution hash {}", contribution_hash));
                }
                contributions.push((participant_id.clone(), *contribution_hash));
            }
            AuditEvent::CeremonyCompleted {
                contributions: count,
                final_hash,
            } => {
                completed = true;
                recorded_final_hash = Some(*final_hash);
                if *count != contributions.len() {
                    issues.push(format!(
                        "completion reports {} contributions, log holds {}",
                        count,
                        contributions.len()
                    ));
                }
            }
            AuditEvent::CeremonyAborted { .. } => aborted = true,
            _ => {}
        }
    }

    if let Some(roster) = roster {
        if completed && contributions.len() != roster.len() {
            issues.push(format!(
                "ceremony completed with {} of {} participants",
                contributions.len(),
                roster.len()
            ));
        }
    }

    let recomputed_final_hash = transcript_hash_of(contributions.iter().map(|(_, h)| h));
    if let Some(recorded) = recorded_final_hash {
        if recorded != recomputed_final_hash {
            issues.push(format!(
                "final hash {} does not match recomputed {}",
                recorded, recomputed_final_hash
            ));
        }
    }

    LogVerification {
        ceremony_id: ceremony_id.clone(),
        contributions,
        recorded_final_hash,
        recomputed_final_hash,
        completed,
        aborted,
        issues,
    }
}
