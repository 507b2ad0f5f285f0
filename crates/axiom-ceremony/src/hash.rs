//! Content hashing and contribution verification
//!
//! The coordinator never trusts a claimed digest. A [`ContributionVerifier`]
//! recomputes it from the payload; the default [`DigestVerifier`] compares
//! the two byte-for-byte. Other verification predicates (for example checking
//! a zk parameter update) plug in behind the same trait.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::error::VerificationFailure;
use crate::types::{ContributionHash, ContributionRecord, Participant};

const READ_BUFFER_SIZE: usize = 8192;

/// Digest used to identify contribution payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha3_256,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha3_256 => "sha3_256",
        }
    }

    /// Boxed hasher for this algorithm
    pub fn hasher(&self) -> Box<dyn ContentHasher> {
        match self {
            HashAlgorithm::Sha256 => Box::new(Sha256Hasher),
            HashAlgorithm::Sha3_256 => Box::new(Sha3Hasher),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "sha256" | "sha_256" | "sha2_256" => Ok(HashAlgorithm::Sha256),
            "sha3_256" | "sha3" => Ok(HashAlgorithm::Sha3_256),
            other => Err(format!("unknown hash algorithm: {}", other)),
        }
    }
}

/// Deterministic content digest
pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> HashAlgorithm;

    fn compute_hash(&self, payload: &[u8]) -> ContributionHash;

    /// Hash a stream in fixed-size chunks
    fn hash_reader(&self, reader: &mut dyn Read) -> std::io::Result<ContributionHash>;
}

/// SHA-256 content hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn compute_hash(&self, payload: &[u8]) -> ContributionHash {
        ContributionHash::new(Sha256::digest(payload).into())
    }

    fn hash_reader(&self, reader: &mut dyn Read) -> std::io::Result<ContributionHash> {
        digest_reader::<Sha256>(reader)
    }
}

/// SHA3-256 content hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha3Hasher;

impl ContentHasher for Sha3Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha3_256
    }

    fn compute_hash(&self, payload: &[u8]) -> ContributionHash {
        ContributionHash::new(Sha3_256::digest(payload).into())
    }

    fn hash_reader(&self, reader: &mut dyn Read) -> std::io::Result<ContributionHash> {
        digest_reader::<Sha3_256>(reader)
    }
}

fn digest_reader<D: Digest>(reader: &mut dyn Read) -> std::io::Result<ContributionHash> {
    let mut hasher = D::new();
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    let digest = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest[..32]);
    Ok(ContributionHash::new(bytes))
}

/// Pluggable verification predicate for a submitted contribution
///
/// Returns the digest the coordinator records in the ledger.
pub trait ContributionVerifier: Send + Sync {
    fn verify(
        &self,
        participant: &Participant,
        payload: &[u8],
        claimed: &ContributionHash,
    ) -> Result<ContributionHash, VerificationFailure>;
}

/// Recomputes the payload digest and compares it with the claim
#[derive(Debug, Clone, Default)]
pub struct DigestVerifier<H> {
    hasher: H,
}

impl<H: ContentHasher> DigestVerifier<H> {
    pub fn new(hasher: H) -> Self {
        Self { hasher }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }
}

impl<H: ContentHasher> ContributionVerifier for DigestVerifier<H> {
    fn verify(
        &self,
        _participant: &Participant,
        payload: &[u8],
        claimed: &ContributionHash,
    ) -> Result<ContributionHash, VerificationFailure> {
        let computed = self.hasher.compute_hash(payload);
        if computed.as_bytes() != claimed.as_bytes() {
            return Err(VerificationFailure::HashMismatch {
                claimed: *claimed,
                computed,
            });
        }
        Ok(computed)
    }
}

/// Verifier matching the given algorithm
pub fn digest_verifier(algorithm: HashAlgorithm) -> Box<dyn ContributionVerifier> {
    match algorithm {
        HashAlgorithm::Sha256 => Box::new(DigestVerifier::new(Sha256Hasher)),
        HashAlgorithm::Sha3_256 => Box::new(DigestVerifier::new(Sha3Hasher)),
    }
}

/// Final parameters hash over the ledger
///
/// SHA-256 over the concatenated lowercase hex digests, in ledger order.
pub fn transcript_hash<'a>(
    records: impl IntoIterator<Item = &'a ContributionRecord>,
) -> ContributionHash {
    transcript_hash_of(records.into_iter().map(|r| &r.contribution_hash))
}

/// Same as [`transcript_hash`] over bare digests
pub fn transcript_hash_of<'a>(
    hashes: impl IntoIterator<Item = &'a ContributionHash>,
) -> ContributionHash {
    let mut hasher = Sha256::new();
    for hash in hashes {
        hasher.update(hash.to_hex().as_bytes());
    }
    ContributionHash::new(hasher.finalize().into())
}
