//! Challenge storage
//!
//! Stores finished challenges under a stable digest of their tier and
//! seed. The directory store writes through a temporary file and a
//! rename so an interrupted write never leaves a half-written entry;
//! saving a key that already exists is a no-op, since challenges are
//! deterministic and the bytes would be identical.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::challenge::Challenge;
use crate::difficulty::Difficulty;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Stable storage key for a tier and seed.
pub fn challenge_key(tier: Difficulty, seed: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tier.label().as_bytes());
    hasher.update(seed.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Anything that can hold challenges keyed by tier and seed.
pub trait ChallengeStore: Send + Sync {
    /// Record a challenge. Saving the same tier and seed twice is a
    /// no-op.
    fn save(&mut self, challenge: &Challenge) -> StoreResult<()>;

    /// Look up the challenge for a tier and seed, if one was saved.
    fn fetch(&self, tier: Difficulty, seed: u64) -> StoreResult<Option<Challenge>>;

    /// Drop the entry for a tier and seed. Deleting a missing entry is
    /// not an error.
    fn delete(&mut self, tier: Difficulty, seed: u64) -> StoreResult<()>;
}

/// Challenge store backed by a directory of JSON files, one per entry.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    base_path: PathBuf,
}

impl DirectoryStore {
    /// Open a store rooted at `base_path`, creating the directory when
    /// it does not exist yet.
    pub fn new<P: AsRef<Path>>(base_path: P) -> StoreResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(DirectoryStore { base_path })
    }

    fn entry_path(&self, tier: Difficulty, seed: u64) -> PathBuf {
        self.base_path
            .join(format!("{}.json", challenge_key(tier, seed)))
    }
}

impl ChallengeStore for DirectoryStore {
    fn save(&mut self, challenge: &Challenge) -> StoreResult<()> {
        let path = self.entry_path(challenge.tier, challenge.seed);
        if path.exists() {
            return Ok(());
        }
        let temp_path = path.with_extension("tmp");
        {
            let file = fs::File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, challenge)?;
            writer.flush()?;
        }
        // Atomic rename so readers never observe a partial entry
        fs::rename(&temp_path, &path)?;
        debug!(
            "saved {} challenge for seed {}",
            challenge.tier, challenge.seed
        );
        Ok(())
    }

    fn fetch(&self, tier: Difficulty, seed: u64) -> StoreResult<Option<Challenge>> {
        let contents = match fs::read_to_string(self.entry_path(tier, seed)) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn delete(&mut self, tier: Difficulty, seed: u64) -> StoreResult<()> {
        match fs::remove_file(self.entry_path(tier, seed)) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// In-memory store for tests and short-lived runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Challenge>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl ChallengeStore for MemoryStore {
    fn save(&mut self, challenge: &Challenge) -> StoreResult<()> {
        self.entries
            .entry(challenge_key(challenge.tier, challenge.seed))
            .or_insert_with(|| challenge.clone());
        Ok(())
    }

    fn fetch(&self, tier: Difficulty, seed: u64) -> StoreResult<Option<Challenge>> {
        Ok(self.entries.get(&challenge_key(tier, seed)).cloned())
    }

    fn delete(&mut self, tier: Difficulty, seed: u64) -> StoreResult<()> {
        self.entries.remove(&challenge_key(tier, seed));
        Ok(())
    }
}
