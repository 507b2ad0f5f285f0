//! CLI command implementations

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use axiom_ceremony::{
    CeremonyId, CeremonyStatus, ContributionHash, ContributionRecord, CurrentTurn,
    HashAlgorithm, ParticipantId, SubmissionOutcome,
};
use axiom_coordinator::{
    read_log, verify_log, CeremonyConfig, Coordinator, LogVerification, SnapshotLock,
    SnapshotStorage,
};

/// Axiom Ceremony - sequential trusted setup coordinator
#[derive(Parser)]
#[command(name = "axiom-ceremony")]
#[command(about = "Coordinate a sequential baton-pass trusted setup ceremony", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Ceremony config (TOML or JSON); defaults to $AXIOM_CEREMONY_CONFIG
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding ceremony snapshots
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a ceremony from the config's roster
    Init,

    /// Start a ceremony and notify the first participant
    Start {
        /// Ceremony id
        id: String,
    },

    /// Submit a contribution for the participant whose turn it is
    Submit {
        /// Ceremony id
        id: String,

        /// Submitting participant id
        #[arg(short, long)]
        participant: String,

        /// Contribution payload file
        #[arg(long)]
        payload: PathBuf,

        /// Claimed digest (hex); computed from the payload when omitted
        #[arg(long)]
        hash: Option<String>,
    },

    /// Show ceremony status
    Status {
        /// Ceremony id
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show accepted contributions in order
    History {
        /// Ceremony id
        id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Abort a ceremony
    Abort {
        /// Ceremony id
        id: String,

        /// Reason recorded with the abort
        #[arg(short, long)]
        reason: String,
    },

    /// Check an audit log for consistency
    VerifyLog {
        /// Audit log (JSON lines)
        file: PathBuf,
    },

    /// Hash a payload file
    Hash {
        /// File to hash
        file: PathBuf,

        /// Digest algorithm
        #[arg(short, long, default_value = "sha256")]
        algorithm: HashAlgorithm,
    },

    /// List stored ceremonies
    List,
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let session = Session::resolve(cli.config.as_deref(), cli.state_dir)?;

    match cli.command {
        Commands::Init => init(&session).await,
        Commands::Start { id } => start(&session, &parse_id(&id)?).await,
        Commands::Submit {
            id,
            participant,
            payload,
            hash,
        } => {
            submit(
                &session,
                &parse_id(&id)?,
                ParticipantId::new(participant),
                &payload,
                hash.as_deref(),
            )
            .await
        }
        Commands::Status { id, json } => status(&session, &parse_id(&id)?, json),
        Commands::History { id, json } => history(&session, &parse_id(&id)?, json),
        Commands::Abort { id, reason } => abort(&session, &parse_id(&id)?, &reason).await,
        Commands::VerifyLog { file } => verify(&file),
        Commands::Hash { file, algorithm } => hash_file(&file, algorithm),
        Commands::List => list(&session),
    }
}

/// Resolved configuration for one invocation
struct Session {
    config: Option<CeremonyConfig>,
    state_dir: PathBuf,
}

impl Session {
    fn resolve(config_path: Option<&Path>, state_dir: Option<PathBuf>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Some(
                CeremonyConfig::load(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
            ),
            None => CeremonyConfig::from_env()?,
        };

        let state_dir = state_dir
            .or_else(|| config.as_ref().map(|c| c.state_dir.clone()))
            .unwrap_or_else(|| CeremonyConfig::default().state_dir);
        debug!("Using state directory {:?}", state_dir);

        Ok(Self { config, state_dir })
    }

    fn storage(&self) -> Result<SnapshotStorage> {
        SnapshotStorage::new(&self.state_dir)
            .with_context(|| format!("opening state directory {}", self.state_dir.display()))
    }

    fn required_config(&self) -> Result<&CeremonyConfig> {
        match &self.config {
            Some(config) => Ok(config),
            None => bail!("no config given; pass --config or set AXIOM_CEREMONY_CONFIG"),
        }
    }

    /// Coordinator for a stored ceremony, wired to the configured notifier and log
    ///
    /// The returned lock must be held until the updated snapshot is saved.
    fn coordinator(
        &self,
        storage: &SnapshotStorage,
        id: &CeremonyId,
    ) -> Result<(SnapshotLock, Coordinator)> {
        let lock = storage.lock(id)?;
        let ceremony = storage.load(id)?;
        let config = self.config.clone().unwrap_or_default();

        let mut coordinator = Coordinator::new(ceremony, config.notifier());
        if let Some(log) = config.open_audit_log()? {
            coordinator = coordinator.with_audit_log(log);
        }
        Ok((lock, coordinator))
    }
}

fn parse_id(id: &str) -> Result<CeremonyId> {
    CeremonyId::new(id).with_context(|| format!("invalid ceremony id {:?}", id))
}

async fn init(session: &Session) -> Result<()> {
    let config = session.required_config()?;
    let ceremony = config.build_ceremony()?;
    let storage = session.storage()?;
    let _lock = storage.lock(ceremony.ceremony_id())?;
    storage.create(&ceremony)?;

    let mut coordinator = Coordinator::new(ceremony, config.notifier());
    if let Some(log) = config.open_audit_log()? {
        coordinator = coordinator.with_audit_log(log);
    }
    coordinator.record_creation().await;

    let id = coordinator.ceremony_id();
    println!("✓ Ceremony created: {}", id);
    println!("  Participants: {}", config.participants.len());
    println!("  Hash algorithm: {}", config.hash_algorithm);
    println!("  Snapshot: {}", storage.base_path().join(format!("{}.json", id)).display());
    Ok(())
}

async fn start(session: &Session, id: &CeremonyId) -> Result<()> {
    let storage = session.storage()?;
    let (_lock, coordinator) = session.coordinator(&storage, id)?;

    let hand_off = coordinator.start().await?;
    coordinator.flush_notifications().await;
    storage.save(&coordinator.snapshot().await)?;

    println!("✓ Ceremony {} started", id);
    println!(
        "  First participant: {} ({})",
        hand_off.participant.display_name, hand_off.participant.id
    );
    print_warning(&coordinator.status().await);
    Ok(())
}

async fn submit(
    session: &Session,
    id: &CeremonyId,
    participant: ParticipantId,
    payload_path: &Path,
    claimed: Option<&str>,
) -> Result<()> {
    let storage = session.storage()?;
    let (_lock, coordinator) = session.coordinator(&storage, id)?;

    let payload = std::fs::read(payload_path)
        .with_context(|| format!("reading payload {}", payload_path.display()))?;
    let claimed = match claimed {
        Some(hex) => ContributionHash::from_hex(hex)
            .with_context(|| format!("invalid contribution hash {:?}", hex))?,
        None => {
            let algorithm = coordinator.snapshot().await.hash_algorithm();
            algorithm.hasher().compute_hash(&payload)
        }
    };

    let result = coordinator
        .submit_contribution(&participant, &payload, &claimed)
        .await;
    coordinator.flush_notifications().await;
    storage.save(&coordinator.snapshot().await)?;
    let outcome = result?;

    let accepted = outcome.accepted();
    println!(
        "✓ Contribution accepted from {} (turn {})",
        accepted.display_name,
        accepted.turn + 1
    );
    println!("  Hash: {}", accepted.contribution_hash);
    match &outcome {
        SubmissionOutcome::HandOff { next, .. } => {
            println!(
                "  Next: {} ({}), turn {}/{}",
                next.participant.display_name,
                next.participant.id,
                next.turn + 1,
                next.total
            );
        }
        SubmissionOutcome::Completed { final_hash, .. } => {
            println!("✓ Ceremony complete");
            println!("  Final hash: {}", final_hash);
        }
    }
    print_warning(&coordinator.status().await);
    Ok(())
}

fn status(session: &Session, id: &CeremonyId, json: bool) -> Result<()> {
    let storage = session.storage()?;
    let status = storage.load(id)?.status();

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Ceremony {}", status.ceremony_id);
    println!("  Phase: {}", status.phase);
    if let axiom_ceremony::Phase::Failed { reason } = &status.phase {
        println!("  Reason: {}", reason);
    }
    println!("  Progress: {}", status.progress());
    match &status.current {
        CurrentTurn::NotStarted => println!("  Current: not started"),
        CurrentTurn::Participant { participant } => {
            println!("  Current: {} ({})", participant.display_name, participant.id)
        }
        CurrentTurn::Complete => println!("  Current: complete"),
        CurrentTurn::Aborted => println!("  Current: aborted"),
    }
    println!("  Updated: {}", status.updated_at.to_rfc3339());
    if let Some(final_hash) = &status.final_hash {
        println!("  Final hash: {}", final_hash);
    }
    print_warning(&status);
    Ok(())
}

fn history(session: &Session, id: &CeremonyId, json: bool) -> Result<()> {
    let storage = session.storage()?;
    let history: Vec<ContributionRecord> = storage.load(id)?.history();

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No contributions yet");
        return Ok(());
    }
    for record in &history {
        println!(
            "  {:>3}. {:<20} {}  {}",
            record.turn + 1,
            record.display_name,
            record.contribution_hash,
            record.submitted_at.to_rfc3339()
        );
    }
    Ok(())
}

async fn abort(session: &Session, id: &CeremonyId, reason: &str) -> Result<()> {
    let storage = session.storage()?;
    let (_lock, coordinator) = session.coordinator(&storage, id)?;

    coordinator.abort(reason).await?;
    storage.save(&coordinator.snapshot().await)?;

    println!("✓ Ceremony {} aborted: {}", id, reason);
    Ok(())
}

fn verify(path: &Path) -> Result<()> {
    let records = read_log(path).with_context(|| format!("reading {}", path.display()))?;
    let results = verify_log(&records);
    info!("Checked {} records across {} ceremonies", records.len(), results.len());

    let mut consistent = true;
    for result in &results {
        print_verification(result);
        consistent &= result.is_consistent();
    }

    if !consistent {
        bail!("audit log {} has inconsistencies", path.display());
    }
    Ok(())
}

fn print_verification(result: &LogVerification) {
    let state = if result.completed {
        "completed"
    } else if result.aborted {
        "aborted"
    } else {
        "open"
    };
    let mark = if result.is_consistent() { "✓" } else { "✗" };

    println!("{} Ceremony {} ({})", mark, result.ceremony_id, state);
    println!("  Contributions: {}", result.contributions.len());
    println!("  Transcript hash: {}", result.recomputed_final_hash);
    for issue in &result.issues {
        println!("  ⚠️  {}", issue);
    }
}

fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<()> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let hash = algorithm.hasher().hash_reader(&mut file)?;
    println!("{}  {}", hash, path.display());
    Ok(())
}

fn list(session: &Session) -> Result<()> {
    let storage = session.storage()?;
    let ids = storage.list()?;
    if ids.is_empty() {
        println!("No ceremonies in {}", storage.base_path().display());
        return Ok(());
    }

    for id in ids {
        let status = storage.load(&id)?.status();
        println!("  {:<24} {:<12} {}", id, status.phase.name(), status.progress());
    }
    Ok(())
}

fn print_warning(status: &CeremonyStatus) {
    if let Some(warning) = &status.notification_warning {
        println!("\n⚠️  WARNING: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_submit() {
        let cli = Cli::parse_from([
            "axiom-ceremony",
            "--state-dir",
            "/tmp/state",
            "submit",
            "genesis",
            "--participant",
            "alice",
            "--payload",
            "contrib.bin",
        ]);
        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        match cli.command {
            Commands::Submit {
                id,
                participant,
                hash,
                ..
            } => {
                assert_eq!(id, "genesis");
                assert_eq!(participant, "alice");
                assert!(hash.is_none());
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn parses_hash_algorithm() {
        let cli = Cli::parse_from(["axiom-ceremony", "hash", "f.bin", "--algorithm", "sha3-256"]);
        match cli.command {
            Commands::Hash { algorithm, .. } => assert_eq!(algorithm, HashAlgorithm::Sha3_256),
            _ => panic!("expected hash"),
        }
    }

    #[test]
    fn rejects_bad_ceremony_id() {
        assert!(parse_id("not valid!").is_err());
        assert!(parse_id("genesis-01").is_ok());
    }
}
