//! Signed decryption authorizations, cached per (signer, contract).
//!
//! A signer is prompted only on a cache miss or when the cached
//! authorization is inside its safety margin. Callers arriving while a
//! prompt for the same pair is outstanding wait on that prompt instead of
//! opening another one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anchor_lang::prelude::Pubkey;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::instance::{InstanceBinding, InstanceManager};
use crate::interfaces::Clock;
use crate::state::{AuthorizationRequest, DecryptionAuthorization, Generation};

type SlotKey = (Pubkey, Pubkey);
type Outcome = Option<Result<DecryptionAuthorization>>;

struct Slot {
    generation: Generation,
    state: SlotState,
}

enum SlotState {
    Ready(DecryptionAuthorization),
    Pending(watch::Receiver<Outcome>),
}

enum Lookup {
    Hit(DecryptionAuthorization),
    Wait(watch::Receiver<Outcome>),
    Prompt(watch::Sender<Outcome>, Option<Slot>),
}

pub struct AuthorizationCache {
    instances: Arc<InstanceManager>,
    clock: Arc<dyn Clock>,
    validity_secs: i64,
    safety_margin_secs: i64,
    slots: Mutex<HashMap<SlotKey, Slot>>,
}

impl AuthorizationCache {
    pub fn new(
        instances: Arc<InstanceManager>,
        clock: Arc<dyn Clock>,
        validity_secs: i64,
        safety_margin_secs: i64,
    ) -> Self {
        Self {
            instances,
            clock,
            validity_secs,
            safety_margin_secs,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a usable authorization for `(signer, contract)` under
    /// `binding`, prompting the signer at most once per miss.
    ///
    /// A rejected prompt yields `AuthorizationDenied` and leaves the cache
    /// as it was. An authorization granted after `binding` was superseded
    /// is dropped with `StaleInstance`.
    pub async fn get_authorization(
        &self,
        binding: &InstanceBinding,
        signer: Pubkey,
        contract: Pubkey,
    ) -> Result<DecryptionAuthorization> {
        let key = (signer, contract);

        loop {
            if !self.instances.is_current(binding.generation) {
                return Err(EngineError::StaleInstance);
            }
            match self.lookup(key, binding.generation) {
                Lookup::Hit(authorization) => {
                    debug!(%signer, %contract, "reusing cached decryption authorization");
                    return Ok(authorization);
                }
                Lookup::Wait(mut pending) => {
                    debug!(%signer, %contract, "awaiting in-flight authorization prompt");
                    let outcome = match pending.wait_for(Option::is_some).await {
                        Ok(outcome) => (*outcome).clone(),
                        // The prompting caller went away; try again.
                        Err(_) => None,
                    };
                    if let Some(result) = outcome {
                        return result;
                    }
                }
                Lookup::Prompt(done, previous) => {
                    let guard = PendingGuard {
                        cache: self,
                        key,
                        generation: binding.generation,
                        previous,
                        armed: true,
                    };
                    let result = self.prompt(binding, signer, contract).await;
                    let result = guard.complete(result);
                    done.send_replace(Some(result.clone()));
                    return result;
                }
            }
        }
    }

    /// Drops every cached and pending authorization
    pub fn clear(&self) {
        let mut slots = self.lock_slots();
        if !slots.is_empty() {
            debug!(entries = slots.len(), "clearing decryption authorizations");
        }
        slots.clear();
    }

    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: SlotKey, generation: Generation) -> Lookup {
        let now = self.clock.unix_timestamp();
        let mut slots = self.lock_slots();

        if let Some(slot) = slots.get(&key).filter(|slot| slot.generation == generation) {
            match &slot.state {
                SlotState::Ready(authorization)
                    if authorization.is_usable(now, self.safety_margin_secs) =>
                {
                    return Lookup::Hit(authorization.clone());
                }
                SlotState::Pending(pending) => return Lookup::Wait(pending.clone()),
                SlotState::Ready(authorization) => debug!(
                    signer = %key.0,
                    contract = %key.1,
                    expired = authorization.is_expired(now),
                    "cached decryption authorization due for renewal"
                ),
            }
        }

        // Entries from superseded bindings are never served again
        slots.retain(|_, slot| slot.generation == generation);

        let (done, pending) = watch::channel(None);
        let previous = slots.insert(
            key,
            Slot {
                generation,
                state: SlotState::Pending(pending),
            },
        );
        Lookup::Prompt(done, previous)
    }

    async fn prompt(
        &self,
        binding: &InstanceBinding,
        signer: Pubkey,
        contract: Pubkey,
    ) -> Result<DecryptionAuthorization> {
        let wallet = self.instances.wallet()?;
        let keypair = binding.instance.generate_keypair();
        let request = AuthorizationRequest::new(
            binding.chain_id,
            contract,
            keypair.public_key,
            self.clock.unix_timestamp(),
            self.validity_secs,
        );

        info!(
            %signer,
            %contract,
            chain_id = binding.chain_id,
            validity_secs = request.validity_duration,
            "requesting decryption authorization signature"
        );
        let signature = wallet.sign_typed(&signer, &request).await?;

        if !self.instances.is_current(binding.generation) {
            debug!(%signer, %contract, "discarding authorization for superseded binding");
            return Err(EngineError::StaleInstance);
        }

        Ok(DecryptionAuthorization {
            signer,
            contract,
            keypair,
            signature,
            validity_start: request.validity_start,
            validity_duration: request.validity_duration,
        })
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<SlotKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the pending slot of one prompt. Unless completed successfully it
/// puts back whatever the slot held before, so failures and cancellations
/// leave the cache unchanged.
struct PendingGuard<'a> {
    cache: &'a AuthorizationCache,
    key: SlotKey,
    generation: Generation,
    previous: Option<Slot>,
    armed: bool,
}

impl PendingGuard<'_> {
    fn complete(mut self, result: Result<DecryptionAuthorization>) -> Result<DecryptionAuthorization> {
        if let Ok(authorization) = &result {
            let mut slots = self.cache.lock_slots();
            if self.owns_slot(&slots) {
                slots.insert(
                    self.key,
                    Slot {
                        generation: self.generation,
                        state: SlotState::Ready(authorization.clone()),
                    },
                );
            }
            self.armed = false;
        }
        result
    }

    fn owns_slot(&self, slots: &HashMap<SlotKey, Slot>) -> bool {
        matches!(
            slots.get(&self.key),
            Some(Slot { generation, state: SlotState::Pending(_) }) if *generation == self.generation
        )
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slots = self.cache.lock_slots();
        if !self.owns_slot(&slots) {
            return;
        }
        match self.previous.take() {
            Some(previous) => {
                slots.insert(self.key, previous);
            }
            None => {
                slots.remove(&self.key);
            }
        }
    }
}
