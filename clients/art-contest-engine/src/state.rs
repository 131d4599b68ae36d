//! Data model shared by the engine components.
//!
//! Contract-sourced records are read-only views: only the contest contract
//! mutates them, the engine merely reads and decrypts.

use std::collections::BTreeMap;
use std::fmt;

use anchor_lang::prelude::*;

use crate::constants::{AUTHORIZATION_DOMAIN, MAX_TITLE_LEN};
use crate::error::EngineError;

// ==================== HANDLES ====================

/// Opaque reference to a ciphertext held by the compute backend.
///
/// Immutable once emitted by the contract. The all-zero handle means
/// "no value recorded" and always resolves to 0 without a round trip.
#[derive(
    AnchorSerialize, AnchorDeserialize, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct CipherHandle(pub [u8; 32]);

impl CipherHandle {
    pub const ZERO: CipherHandle = CipherHandle([0u8; 32]);

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for CipherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherHandle({})", self)
    }
}

// ==================== GENERATIONS ====================

/// Identifies one instance binding. Bumped on every reset and every
/// (re)initialization; results tagged with an older generation are stale.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ==================== AUTHORIZATION ====================

/// Ephemeral key pair generated by the compute instance for one
/// authorization. The relay re-encrypts plaintexts to `public_key`.
#[derive(Clone, PartialEq, Eq)]
pub struct EphemeralKeypair {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// The structured message a signer approves to delegate decryption rights.
///
/// Wallets receive this typed value, never an opaque digest, so every field
/// is visible to the user at signing time.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub domain: String,
    pub chain_id: u64,
    pub contract: Pubkey,
    pub public_key: [u8; 32],
    pub validity_start: i64,
    pub validity_duration: i64,
}

impl AuthorizationRequest {
    pub fn new(
        chain_id: u64,
        contract: Pubkey,
        public_key: [u8; 32],
        validity_start: i64,
        validity_duration: i64,
    ) -> Self {
        Self {
            domain: AUTHORIZATION_DOMAIN.to_string(),
            chain_id,
            contract,
            public_key,
            validity_start,
            validity_duration,
        }
    }

    /// Canonical borsh encoding of the request
    pub fn message_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = AnchorSerialize::serialize(self, &mut buf);
        buf
    }
}

/// A signed, time-bounded capability to decrypt handles of one contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptionAuthorization {
    pub signer: Pubkey,
    pub contract: Pubkey,
    pub keypair: EphemeralKeypair,
    pub signature: Vec<u8>,
    pub validity_start: i64,
    pub validity_duration: i64,
}

impl DecryptionAuthorization {
    pub fn public_key(&self) -> &[u8; 32] {
        &self.keypair.public_key
    }

    pub fn expires_at(&self) -> i64 {
        self.validity_start.saturating_add(self.validity_duration)
    }

    /// Expired once `now` is past the end of the window
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at()
    }

    /// Reusable only while strictly before the end of the window minus `margin`
    pub fn is_usable(&self, now: i64, margin: i64) -> bool {
        now < self.expires_at().saturating_sub(margin)
    }
}

// ==================== CONTEST RECORDS ====================

/// Entry as stored by the contest contract.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct EntryRecord {
    pub id: u64,
    pub contestant: Pubkey,
    pub title: String,
    pub description_hash: String,
    pub file_hash: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub timestamp: i64,
    pub score_handle: CipherHandle,
}

impl EntryRecord {
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }
}

/// Arguments of `submitEntry`.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Debug, PartialEq, Eq)]
pub struct EntrySubmission {
    pub title: String,
    pub description_hash: String,
    pub file_hash: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
}

impl EntrySubmission {
    /// Builds a submission from raw form input: `tags_csv` is comma
    /// separated, blanks are dropped.
    pub fn from_form(
        title: &str,
        description_hash: &str,
        file_hash: &str,
        tags_csv: &str,
        categories: Vec<String>,
    ) -> Self {
        let tags = tags_csv
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            title: title.trim().to_string(),
            description_hash: description_hash.trim().to_string(),
            file_hash: file_hash.trim().to_string(),
            tags,
            categories,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        if self.title.is_empty() {
            return Err(EngineError::InvalidSubmission("title is required"));
        }
        if self.title.chars().count() > MAX_TITLE_LEN {
            return Err(EngineError::InvalidSubmission("title is too long"));
        }
        if self.description_hash.is_empty() {
            return Err(EngineError::InvalidSubmission("description is required"));
        }
        if self.categories.is_empty() {
            return Err(EngineError::InvalidSubmission(
                "at least one category is required",
            ));
        }
        Ok(())
    }
}

/// An entry together with its decrypted score.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedEntry {
    pub entry: EntryRecord,
    pub score: u64,
}

/// Vote handle of one (entry, category) pair and its resolved count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryTally {
    pub handle: CipherHandle,
    pub votes: u64,
}

pub type CategoryVotes = BTreeMap<String, CategoryTally>;

/// One leaderboard row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RankedEntry {
    pub entry_id: u64,
    pub votes: u64,
}

/// Summary shown to a contestant for one of their entries.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryPerformance {
    pub entry_id: u64,
    pub score: u64,
    pub total_votes: u64,
    pub average_votes_per_category: f64,
    pub score_per_vote: f64,
}

impl EntryPerformance {
    pub fn from_tallies(entry: &EntryRecord, score: u64, votes: &CategoryVotes) -> Self {
        let total_votes: u64 = votes.values().map(|tally| tally.votes).sum();

        let average_votes_per_category = if entry.categories.is_empty() {
            0.0
        } else {
            total_votes as f64 / entry.categories.len() as f64
        };
        let score_per_vote = if total_votes == 0 {
            0.0
        } else {
            score as f64 / total_votes as f64
        };

        Self {
            entry_id: entry.id,
            score,
            total_votes,
            average_votes_per_category,
            score_per_vote,
        }
    }
}
