//! Seed phrases and the keys a wallet can be unlocked with.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Accepted number of words in a seed phrase (with and without the
/// trailing checksum word).
pub const SEED_WORDS: [usize; 2] = [28, 29];
const MIN_WORD_LEN: usize = 4;
const MAX_WORD_LEN: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeedError {
    #[error("seed is empty")]
    Empty,
    #[error("seed can only contain lowercase letters and spaces")]
    InvalidCharacters,
    #[error("seed must have 28 or 29 words, got {0}")]
    WordCount(usize),
    #[error("seed word '{0}' has an invalid length")]
    WordLength(String),
}

/// A seed phrase that passed the shape checks. Whether the words belong to
/// the dictionary is left to the wallet module.
#[derive(Clone, PartialEq, Eq)]
pub struct SeedPhrase(String);

impl SeedPhrase {
    pub fn parse(s: &str) -> Result<Self, SeedError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SeedError::Empty);
        }
        if !s.chars().all(|c| c.is_ascii_lowercase() || c == ' ') {
            return Err(SeedError::InvalidCharacters);
        }
        let words: Vec<&str> = s.split_whitespace().collect();
        if !SEED_WORDS.contains(&words.len()) {
            return Err(SeedError::WordCount(words.len()));
        }
        if let Some(w) = words
            .iter()
            .find(|w| w.len() < MIN_WORD_LEN || w.len() > MAX_WORD_LEN)
        {
            return Err(SeedError::WordLength(w.to_string()));
        }
        Ok(Self(words.join(" ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.0.split(' ')
    }
}

impl fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedPhrase(<redacted>)")
    }
}

/// Symmetric key derived from a password or a seed phrase.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    pub fn from_password(password: &str) -> Self {
        Self::derive(b"password", password.as_bytes())
    }

    pub fn from_seed(seed: &SeedPhrase) -> Self {
        Self::derive(b"seed", seed.as_str().as_bytes())
    }

    fn derive(domain: &[u8], material: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(material);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CipherKey({})", self.fingerprint())
    }
}

/// Every key `password` could stand for: the seed key when the text is a
/// seed phrase, then the plain password key.
pub fn encryption_keys(password: &str) -> Vec<CipherKey> {
    let mut keys = Vec::with_capacity(2);
    if let Ok(seed) = SeedPhrase::parse(password) {
        keys.push(CipherKey::from_seed(&seed));
    }
    keys.push(CipherKey::from_password(password));
    keys
}
