//! Resolution of cipher handles into plaintext values.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anchor_lang::prelude::Pubkey;
use arcium_client::idl::arcium::types::{ArgumentList, ArgumentRef};
use arcium_client::pda::comp_def_offset;
use tracing::{debug, trace};

use crate::authorization::AuthorizationCache;
use crate::constants::{MAX_HANDLES_PER_REQUEST, USER_DECRYPT_COMP};
use crate::error::{EngineError, Result};
use crate::instance::{InstanceBinding, InstanceManager};
use crate::interfaces::DecryptRequest;
use crate::state::{CipherHandle, DecryptionAuthorization, Generation};

/// Encodes `handles` as relay arguments, one encrypted 32-bit counter per
/// handle, in order.
pub fn build_decrypt_args(handles: &[CipherHandle]) -> ArgumentList {
    let mut args = ArgumentList {
        args: Vec::new(),
        byte_arrays: Vec::new(),
        plaintext_numbers: Vec::new(),
        values_128_bit: Vec::new(),
        accounts: Vec::new(),
    };

    for handle in handles.iter().take(MAX_HANDLES_PER_REQUEST) {
        args.args
            .push(ArgumentRef::EncryptedU32(args.byte_arrays.len() as u8));
        args.byte_arrays.push(handle.0);
    }

    args
}

/// Handles referenced by relay arguments, in order
pub fn handles_from_args(args: &ArgumentList) -> Vec<CipherHandle> {
    args.byte_arrays.iter().copied().map(CipherHandle).collect()
}

pub struct HandleResolver {
    instances: Arc<InstanceManager>,
    authorizations: Arc<AuthorizationCache>,
    relay_timeout: Duration,
    cache_plaintexts: bool,
    plaintexts: Mutex<HashMap<(Pubkey, CipherHandle), (Generation, u64)>>,
}

impl HandleResolver {
    pub fn new(
        instances: Arc<InstanceManager>,
        authorizations: Arc<AuthorizationCache>,
        relay_timeout: Duration,
        cache_plaintexts: bool,
    ) -> Self {
        Self {
            instances,
            authorizations,
            relay_timeout,
            cache_plaintexts,
            plaintexts: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a single handle. The zero handle is 0 without any
    /// authorization or round trip.
    pub async fn resolve_one(&self, contract: Pubkey, handle: CipherHandle) -> Result<u64> {
        if handle.is_zero() {
            return Ok(0);
        }
        let values = self.resolve_batch(contract, &[handle]).await?;
        values
            .first()
            .copied()
            .ok_or_else(|| EngineError::DecryptionFailed("relay returned no value".to_string()))
    }

    /// Resolves `handles` in order.
    ///
    /// Zero handles resolve to 0 locally; every distinct non-zero handle is
    /// requested from the relay once, under one authorization. Either every
    /// value is returned or none is.
    pub async fn resolve_batch(&self, contract: Pubkey, handles: &[CipherHandle]) -> Result<Vec<u64>> {
        let mut seen = HashSet::new();
        let distinct: Vec<CipherHandle> = handles
            .iter()
            .copied()
            .filter(|handle| !handle.is_zero() && seen.insert(*handle))
            .collect();

        if distinct.is_empty() {
            return Ok(vec![0; handles.len()]);
        }

        let binding = self.instances.binding()?;
        let mut resolved = self.cached(&binding, contract, &distinct);
        let missing: Vec<CipherHandle> = distinct
            .iter()
            .copied()
            .filter(|handle| !resolved.contains_key(handle))
            .collect();

        debug!(
            %contract,
            requested = handles.len(),
            distinct = distinct.len(),
            cached = resolved.len(),
            "resolving handles"
        );

        if !missing.is_empty() {
            let fetched = self.fetch(&binding, contract, &missing).await?;
            self.remember(&binding, contract, &fetched);
            resolved.extend(fetched);
        }

        handles
            .iter()
            .map(|handle| {
                if handle.is_zero() {
                    Ok(0)
                } else {
                    resolved.get(handle).copied().ok_or_else(|| {
                        EngineError::DecryptionFailed(format!("no value for handle {}", handle))
                    })
                }
            })
            .collect()
    }

    /// Drops every remembered plaintext
    pub fn clear(&self) {
        self.lock_plaintexts().clear();
    }

    async fn fetch(
        &self,
        binding: &InstanceBinding,
        contract: Pubkey,
        handles: &[CipherHandle],
    ) -> Result<HashMap<CipherHandle, u64>> {
        let signer = self.instances.wallet()?.address().await?;
        let authorization = self
            .authorizations
            .get_authorization(binding, signer, contract)
            .await?;

        let mut fetched = HashMap::with_capacity(handles.len());
        for chunk in handles.chunks(MAX_HANDLES_PER_REQUEST) {
            let values = self.relay(binding, contract, &authorization, chunk).await?;
            fetched.extend(chunk.iter().copied().zip(values));
        }

        if !self.instances.is_current(binding.generation) {
            debug!(
                %contract,
                generation = %binding.generation,
                "discarding plaintexts from superseded binding"
            );
            return Err(EngineError::StaleInstance);
        }
        Ok(fetched)
    }

    async fn relay(
        &self,
        binding: &InstanceBinding,
        contract: Pubkey,
        authorization: &DecryptionAuthorization,
        handles: &[CipherHandle],
    ) -> Result<Vec<u64>> {
        let request = DecryptRequest {
            contract,
            authorization,
            handles,
            comp_def_offset: comp_def_offset(USER_DECRYPT_COMP),
            args: build_decrypt_args(handles),
        };

        trace!(%contract, handles = handles.len(), "sending decrypt request");
        let values = tokio::time::timeout(self.relay_timeout, binding.instance.user_decrypt(request))
            .await
            .map_err(|_| EngineError::DecryptionFailed("relay timed out".to_string()))??;

        if values.len() != handles.len() {
            return Err(EngineError::DecryptionFailed(format!(
                "relay returned {} values for {} handles",
                values.len(),
                handles.len()
            )));
        }
        Ok(values)
    }

    fn cached(
        &self,
        binding: &InstanceBinding,
        contract: Pubkey,
        handles: &[CipherHandle],
    ) -> HashMap<CipherHandle, u64> {
        if !self.cache_plaintexts {
            return HashMap::new();
        }
        let plaintexts = self.lock_plaintexts();
        handles
            .iter()
            .filter_map(|handle| match plaintexts.get(&(contract, *handle)) {
                Some((generation, value)) if *generation == binding.generation => {
                    Some((*handle, *value))
                }
                _ => None,
            })
            .collect()
    }

    fn remember(&self, binding: &InstanceBinding, contract: Pubkey, values: &HashMap<CipherHandle, u64>) {
        if !self.cache_plaintexts {
            return;
        }
        let mut plaintexts = self.lock_plaintexts();
        plaintexts.retain(|_, (generation, _)| *generation == binding.generation);
        plaintexts.extend(
            values
                .iter()
                .map(|(handle, value)| ((contract, *handle), (binding.generation, *value))),
        );
    }

    fn lock_plaintexts(&self) -> MutexGuard<'_, HashMap<(Pubkey, CipherHandle), (Generation, u64)>> {
        self.plaintexts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
