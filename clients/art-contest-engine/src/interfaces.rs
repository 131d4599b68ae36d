//! Seams to the collaborators the engine drives but does not own: the
//! wallet, the confidential-compute backend and its relay, the contest
//! contract and the wall clock.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anchor_lang::prelude::Pubkey;
use arcium_client::idl::arcium::types::ArgumentList;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{ContractError, RelayError, WalletError};
use crate::state::{
    AuthorizationRequest, CipherHandle, DecryptionAuthorization, EntryRecord, EntrySubmission,
    EphemeralKeypair,
};

/// Wallet-signing capability.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Chain the wallet is currently connected to
    async fn chain_id(&self) -> Result<u64, WalletError>;

    /// Active signer address
    async fn address(&self) -> Result<Pubkey, WalletError>;

    /// Prompts `signer` for a structured signature over `request`.
    ///
    /// No timeout applies: the prompt waits on the user until answered or
    /// until the caller drops the future.
    async fn sign_typed(
        &self,
        signer: &Pubkey,
        request: &AuthorizationRequest,
    ) -> Result<Vec<u8>, WalletError>;

    /// Chain-change notifications, one value per switch
    fn subscribe_chain_changes(&self) -> broadcast::Receiver<u64>;
}

/// Factory for compute instances bound to one chain.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn create_instance(&self, chain_id: u64) -> Result<Arc<dyn ComputeInstance>, RelayError>;
}

/// A decrypt request as sent to the relay.
///
/// `args` carries the same handles as `handles`, in order, encoded the way
/// the relay's computation expects them.
pub struct DecryptRequest<'a> {
    pub contract: Pubkey,
    pub authorization: &'a DecryptionAuthorization,
    pub handles: &'a [CipherHandle],
    pub comp_def_offset: u32,
    pub args: ArgumentList,
}

/// A confidential-compute client bound to the active chain.
#[async_trait]
pub trait ComputeInstance: Send + Sync {
    fn generate_keypair(&self) -> EphemeralKeypair;

    /// Returns one plaintext per requested handle, in request order.
    /// Rejects expired or mismatched authorizations.
    async fn user_decrypt(&self, request: DecryptRequest<'_>) -> Result<Vec<u64>, RelayError>;
}

/// Contest contract. Write calls return only once their transaction is
/// confirmed and yield its signature.
#[async_trait]
pub trait ContestContract: Send + Sync {
    async fn submit_entry(
        &self,
        contract: &Pubkey,
        submission: &EntrySubmission,
    ) -> Result<String, ContractError>;

    async fn score_entry(&self, contract: &Pubkey, entry_id: u64) -> Result<String, ContractError>;

    async fn vote_entry(
        &self,
        contract: &Pubkey,
        entry_id: u64,
        category: &str,
    ) -> Result<String, ContractError>;

    async fn get_all_entries(&self, contract: &Pubkey) -> Result<Vec<u64>, ContractError>;

    async fn get_entry(&self, contract: &Pubkey, entry_id: u64) -> Result<EntryRecord, ContractError>;

    async fn get_category_votes(
        &self,
        contract: &Pubkey,
        entry_id: u64,
        category: &str,
    ) -> Result<CipherHandle, ContractError>;
}

/// Source of unix time for authorization windows.
pub trait Clock: Send + Sync {
    fn unix_timestamp(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_timestamp(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}
