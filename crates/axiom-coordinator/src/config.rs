//! Ceremony configuration
//!
//! Read from TOML or JSON depending on the file extension:
//!
//! ```toml
//! ceremony_id = "axiom-genesis"
//! hash_algorithm = "sha256"
//! audit_log = "/var/lib/axiom/genesis.jsonl"
//! outbox_dir = "/var/lib/axiom/outbox"
//!
//! [[participants]]
//! id = "alice"
//! name = "Alice"
//! contact = "alice@example.org"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use axiom_ceremony::{Ceremony, CeremonyId, HashAlgorithm, Participant, MIN_PARTICIPANTS};

use crate::audit::AuditLog;
use crate::error::{CoordinatorError, Result};
use crate::notifier::{LogNotifier, Notifier, OutboxNotifier};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "AXIOM_CEREMONY_CONFIG";

/// One roster entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl From<&ParticipantConfig> for Participant {
    fn from(config: &ParticipantConfig) -> Self {
        let participant = Participant::new(
            config.id.as_str(),
            config.name.as_str(),
            config.contact.as_str(),
        );
        match &config.endpoint {
            Some(endpoint) => participant.with_endpoint(endpoint.as_str()),
            None => participant,
        }
    }
}

/// Ceremony configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CeremonyConfig {
    /// Fixed ceremony id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceremony_id: Option<String>,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// JSON-lines event log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,

    /// Directory receiving hand-off notifications; log-only when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox_dir: Option<PathBuf>,

    /// Where ceremony snapshots are kept
    #[serde(default = "CeremonyConfig::default_state_dir")]
    pub state_dir: PathBuf,

    // TOML tables must follow plain keys, so this stays last
    /// Contribution order
    #[serde(default)]
    pub participants: Vec<ParticipantConfig>,
}

impl Default for CeremonyConfig {
    fn default() -> Self {
        Self {
            ceremony_id: None,
            hash_algorithm: HashAlgorithm::default(),
            participants: Vec::new(),
            audit_log: None,
            outbox_dir: None,
            state_dir: Self::default_state_dir(),
        }
    }
}

impl CeremonyConfig {
    fn default_state_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("axiom")
            .join("ceremonies")
    }

    /// Load from a `.toml` or `.json` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match Format::of(path)? {
            Format::Toml => Ok(toml::from_str(&content)?),
            Format::Json => Ok(serde_json::from_str(&content)?),
        }
    }

    /// Load from the path in `AXIOM_CEREMONY_CONFIG`, if set
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)).map(Some),
            None => Ok(None),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match Format::of(path)? {
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| CoordinatorError::Serialization(e.to_string()))?,
            Format::Json => serde_json::to_string_pretty(self)?,
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check the roster can run a ceremony
    pub fn validate(&self) -> Result<()> {
        if self.participants.len() < MIN_PARTICIPANTS {
            return Err(CoordinatorError::Config(format!(
                "at least {} participants required, {} configured",
                MIN_PARTICIPANTS,
                self.participants.len()
            )));
        }
        if let Some(id) = &self.ceremony_id {
            CeremonyId::new(id.as_str())?;
        }
        Ok(())
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.participants.iter().map(Participant::from).collect()
    }

    /// Configured id, or a freshly generated one
    pub fn ceremony_id(&self) -> Result<CeremonyId> {
        match &self.ceremony_id {
            Some(id) => Ok(CeremonyId::new(id.as_str())?),
            None => Ok(CeremonyId::generate()),
        }
    }

    /// Build a ceremony in the `Waiting` phase
    ///
    /// Short rosters are accepted here; `start` reports them.
    pub fn build_ceremony(&self) -> Result<Ceremony> {
        Ok(Ceremony::new(
            self.ceremony_id()?,
            self.participants(),
            self.hash_algorithm,
        )?)
    }

    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match &self.outbox_dir {
            Some(dir) => Arc::new(OutboxNotifier::new(dir)),
            None => Arc::new(LogNotifier),
        }
    }

    pub fn open_audit_log(&self) -> Result<Option<Arc<AuditLog>>> {
        self.audit_log
            .as_ref()
            .map(|path| AuditLog::open(path).map(Arc::new))
            .transpose()
    }
}

enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            _ => Err(CoordinatorError::Config(format!(
                "unsupported config format {:?}, expected .toml or .json",
                path
            ))),
        }
    }
}
