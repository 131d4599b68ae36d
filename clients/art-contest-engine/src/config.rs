use std::collections::BTreeMap;
use std::time::Duration;

use anchor_lang::prelude::Pubkey;

use crate::constants::*;
use crate::error::{EngineError, Result};

/// Contest contract address per chain id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deployments(BTreeMap<u64, Pubkey>);

impl Deployments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chain_id: u64, contract: Pubkey) -> Option<Pubkey> {
        self.0.insert(chain_id, contract)
    }

    pub fn contract_for(&self, chain_id: u64) -> Option<Pubkey> {
        self.0.get(&chain_id).copied()
    }

    pub fn is_supported(&self, chain_id: u64) -> bool {
        self.0.contains_key(&chain_id)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub deployments: Deployments,
    /// Lifetime requested for every new decryption authorization
    pub authorization_validity_secs: i64,
    /// Cached authorizations this close to expiry are treated as missing
    pub authorization_safety_margin_secs: i64,
    /// Upper bound on a single relay round trip
    pub relay_timeout: Duration,
    /// Keep resolved plaintexts in memory until the next reset
    pub cache_plaintexts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            deployments: Deployments::new(),
            authorization_validity_secs: DEFAULT_AUTHORIZATION_VALIDITY_SECS,
            authorization_safety_margin_secs: DEFAULT_AUTHORIZATION_SAFETY_MARGIN_SECS,
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
            cache_plaintexts: true,
        }
    }
}

impl EngineConfig {
    pub fn with_deployment(mut self, chain_id: u64, contract: Pubkey) -> Self {
        self.deployments.insert(chain_id, contract);
        self
    }

    pub fn with_authorization_validity(mut self, validity_secs: i64, safety_margin_secs: i64) -> Self {
        self.authorization_validity_secs = validity_secs;
        self.authorization_safety_margin_secs = safety_margin_secs;
        self
    }

    pub fn with_relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    pub fn with_plaintext_cache(mut self, enabled: bool) -> Self {
        self.cache_plaintexts = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.authorization_validity_secs <= 0 {
            return Err(EngineError::InvalidConfig(
                "authorization validity must be positive",
            ));
        }
        if self.authorization_safety_margin_secs < 0 {
            return Err(EngineError::InvalidConfig(
                "authorization safety margin must not be negative",
            ));
        }
        if self.authorization_safety_margin_secs >= self.authorization_validity_secs {
            return Err(EngineError::InvalidConfig(
                "authorization safety margin must be shorter than its validity",
            ));
        }
        if self.relay_timeout.is_zero() {
            return Err(EngineError::InvalidConfig("relay timeout must be non-zero"));
        }
        Ok(())
    }
}
