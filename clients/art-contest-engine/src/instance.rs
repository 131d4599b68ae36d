//! Binding of the confidential-compute client to the connected chain.
//!
//! Exactly one binding is live at a time. Every reset or initialization
//! advances the generation counter, and any asynchronous result produced
//! under an older generation is discarded rather than applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use anchor_lang::prelude::Pubkey;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::interfaces::{ComputeBackend, ComputeInstance, Wallet};
use crate::state::Generation;

/// A ready compute instance together with the chain and contest deployment
/// it was created for.
pub struct InstanceBinding {
    pub generation: Generation,
    pub chain_id: u64,
    pub contract: Pubkey,
    pub instance: Arc<dyn ComputeInstance>,
}

impl std::fmt::Debug for InstanceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceBinding")
            .field("generation", &self.generation)
            .field("chain_id", &self.chain_id)
            .field("contract", &self.contract)
            .finish_non_exhaustive()
    }
}

/// Availability as seen by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceState {
    Uninitialized,
    Ready { chain_id: u64, generation: Generation },
    Unavailable(EngineError),
}

pub struct InstanceManager {
    config: Arc<EngineConfig>,
    wallet: Option<Arc<dyn Wallet>>,
    backend: Arc<dyn ComputeBackend>,
    generation: AtomicU64,
    binding: RwLock<Option<Arc<InstanceBinding>>>,
    failure: Mutex<Option<EngineError>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl InstanceManager {
    pub fn new(
        config: Arc<EngineConfig>,
        wallet: Option<Arc<dyn Wallet>>,
        backend: Arc<dyn ComputeBackend>,
    ) -> Self {
        Self {
            config,
            wallet,
            backend,
            generation: AtomicU64::new(0),
            binding: RwLock::new(None),
            failure: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    pub fn wallet(&self) -> Result<&Arc<dyn Wallet>> {
        self.wallet.as_ref().ok_or(EngineError::ProviderUnavailable)
    }

    pub fn current_generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        self.current_generation() == generation
    }

    /// The live binding, or the reason there is none
    pub fn binding(&self) -> Result<Arc<InstanceBinding>> {
        if let Some(binding) = self.read_binding().as_ref() {
            return Ok(binding.clone());
        }
        match self.lock_failure().clone() {
            Some(err) => Err(err),
            None => Err(EngineError::NotInitialized),
        }
    }

    pub fn state(&self) -> InstanceState {
        if let Some(binding) = self.read_binding().as_ref() {
            return InstanceState::Ready {
                chain_id: binding.chain_id,
                generation: binding.generation,
            };
        }
        match self.lock_failure().clone() {
            Some(err) => InstanceState::Unavailable(err),
            None => InstanceState::Uninitialized,
        }
    }

    /// Creates and installs a compute instance for `chain_id`, retiring the
    /// previous binding first, whether or not creation succeeds.
    ///
    /// Fails with `ProviderUnavailable` without a wallet, `UnsupportedChain`
    /// when no contest deployment is known, and `StaleInstance` when another
    /// reset or initialization superseded this one while it was in flight.
    /// A superseded attempt never records its failure.
    pub async fn initialize(&self, chain_id: u64) -> Result<Arc<InstanceBinding>> {
        let result = self.try_initialize(chain_id).await;
        match &result {
            Ok(binding) => {
                info!(
                    chain_id,
                    generation = %binding.generation,
                    contract = %binding.contract,
                    "compute instance ready"
                );
            }
            Err(err) if err.is_stale() => {
                debug!(chain_id, "initialization superseded, discarding outcome");
            }
            Err(err) => warn!(chain_id, %err, "compute instance unavailable"),
        }
        result
    }

    async fn try_initialize(&self, chain_id: u64) -> Result<Arc<InstanceBinding>> {
        let generation = {
            let mut slot = self.write_binding();
            *slot = None;
            *self.lock_failure() = None;
            self.advance_generation()
        };

        let contract = match self.wallet().and_then(|_| {
            self.config
                .deployments
                .contract_for(chain_id)
                .ok_or(EngineError::UnsupportedChain(chain_id))
        }) {
            Ok(contract) => contract,
            Err(err) => return Err(self.record_failure(generation, err)),
        };
        debug!(chain_id, %generation, "creating compute instance");

        let instance = match self.backend.create_instance(chain_id).await {
            Ok(instance) => instance,
            Err(err) => {
                let err = EngineError::InstanceCreation(err.to_string());
                return Err(self.record_failure(generation, err));
            }
        };

        let binding = Arc::new(InstanceBinding {
            generation,
            chain_id,
            contract,
            instance,
        });

        let mut slot = self.write_binding();
        if !self.is_current(generation) {
            return Err(EngineError::StaleInstance);
        }
        *slot = Some(binding.clone());
        Ok(binding)
    }

    /// Reads the wallet's current chain and initializes for it
    pub async fn connect(&self) -> Result<Arc<InstanceBinding>> {
        let generation = self.current_generation();
        let chain_id = match self.wallet() {
            Ok(wallet) => wallet.chain_id().await.map_err(EngineError::from),
            Err(err) => Err(err),
        };
        match chain_id {
            Ok(chain_id) => self.initialize(chain_id).await,
            Err(err) => {
                let err = self.retire(generation, err);
                if !err.is_stale() {
                    warn!(%err, "wallet chain unavailable");
                }
                Err(err)
            }
        }
    }

    /// Drops the live binding, if any. Idempotent.
    pub fn reset(&self) {
        let mut slot = self.write_binding();
        let previous = slot.take();
        let generation = self.advance_generation();
        *self.lock_failure() = None;

        if let Some(binding) = previous {
            info!(
                chain_id = binding.chain_id,
                retired = %binding.generation,
                %generation,
                "compute instance reset"
            );
        }
    }

    pub async fn on_chain_changed(&self, chain_id: u64) -> Result<Arc<InstanceBinding>> {
        info!(chain_id, "chain changed");
        self.reset();
        self.initialize(chain_id).await
    }

    /// Subscribes to the wallet's chain-change notifications, replacing any
    /// previous subscription. The listener task only holds a weak reference
    /// and ends with the manager.
    pub fn watch_chain_changes(self: &Arc<Self>) -> Result<()> {
        let mut changes = self.wallet()?.subscribe_chain_changes();
        let weak: Weak<Self> = Arc::downgrade(self);

        let mut subscription = self.lock_subscription();
        if let Some(previous) = subscription.take() {
            previous.abort();
        }

        *subscription = Some(tokio::spawn(async move {
            loop {
                let chain_id = match changes.recv().await {
                    Ok(chain_id) => chain_id,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed chain change notifications");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = manager.on_chain_changed(chain_id).await {
                    if !err.is_stale() {
                        warn!(chain_id, %err, "reinitialization after chain change failed");
                    }
                }
            }
            debug!("chain change subscription closed");
        }));
        Ok(())
    }

    /// Records `err` as the current failure of `generation`. Returns
    /// `StaleInstance` instead when that generation was superseded.
    fn record_failure(&self, generation: Generation, err: EngineError) -> EngineError {
        let _slot = self.write_binding();
        if !self.is_current(generation) {
            return EngineError::StaleInstance;
        }
        *self.lock_failure() = Some(err.clone());
        err
    }

    /// Drops the live binding and records `err`, unless something newer
    /// than `generation` has taken over in the meantime.
    fn retire(&self, generation: Generation, err: EngineError) -> EngineError {
        let mut slot = self.write_binding();
        if !self.is_current(generation) {
            return EngineError::StaleInstance;
        }
        *slot = None;
        self.advance_generation();
        *self.lock_failure() = Some(err.clone());
        err
    }

    fn advance_generation(&self) -> Generation {
        Generation(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn read_binding(&self) -> std::sync::RwLockReadGuard<'_, Option<Arc<InstanceBinding>>> {
        self.binding.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_binding(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<InstanceBinding>>> {
        self.binding.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_failure(&self) -> std::sync::MutexGuard<'_, Option<EngineError>> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for InstanceManager {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_subscription().take() {
            handle.abort();
        }
    }
}
