//! Art Contest - Encrypted Tally Client Engine
//!
//! Scores and per-category votes of contest entries are stored on-chain as
//! encrypted handles. This crate turns them back into numbers for the entry
//! owner or an authorized viewer:
//!
//! - `instance`: binds a confidential-compute client to the connected chain
//!   and rebinds it on chain changes
//! - `authorization`: obtains and caches signed, time-bounded decryption
//!   authorizations per (signer, contract)
//! - `resolver`: resolves handles to plaintext, singly or in deduplicated,
//!   order-preserving batches
//! - `ranking`: deterministic per-category leaderboards
//!
//! Plaintexts live only in memory and never outlive the current binding.

pub mod authorization;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod instance;
pub mod interfaces;
pub mod ranking;
pub mod resolver;
pub mod state;

pub use authorization::AuthorizationCache;
pub use config::{Deployments, EngineConfig};
pub use engine::{entries_by_contestant, ArtContestEngine};
pub use error::{ContractError, EngineError, RelayError, Result, WalletError};
pub use instance::{InstanceBinding, InstanceManager, InstanceState};
pub use interfaces::{
    Clock, ComputeBackend, ComputeInstance, ContestContract, DecryptRequest, SystemClock, Wallet,
};
pub use ranking::{rank_order, RankingAggregator};
pub use resolver::HandleResolver;
pub use state::*;
