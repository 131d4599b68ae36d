//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::result::Result;

use anchor_lang::prelude::Pubkey;
use art_contest_engine::constants::{LOCALHOST_CHAIN_ID, SEPOLIA_CHAIN_ID};
use art_contest_engine::resolver::handles_from_args;
use art_contest_engine::*;
use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

pub const START_TIME: i64 = 1_700_000_000;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic non-zero handle
pub fn handle(n: u64) -> CipherHandle {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_le_bytes());
    bytes[31] = 0xff;
    CipherHandle::new(bytes)
}

// =============================================================================
// CLOCK
// =============================================================================

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }

    pub fn advance(&self, secs: i64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn unix_timestamp(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// WALLET
// =============================================================================

pub struct MockWallet {
    pub address: Pubkey,
    chain_id: AtomicU64,
    chain_changes: broadcast::Sender<u64>,
    prompts: AtomicUsize,
    reject: AtomicBool,
    requests: Mutex<Vec<AuthorizationRequest>>,
}

impl MockWallet {
    pub fn new(chain_id: u64) -> Self {
        let (chain_changes, _) = broadcast::channel(16);
        Self {
            address: Pubkey::new_unique(),
            chain_id: AtomicU64::new(chain_id),
            chain_changes,
            prompts: AtomicUsize::new(0),
            reject: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<AuthorizationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn switch_chain(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
        let _ = self.chain_changes.send(chain_id);
    }
}

#[async_trait]
impl Wallet for MockWallet {
    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.chain_id.load(Ordering::SeqCst))
    }

    async fn address(&self) -> Result<Pubkey, WalletError> {
        Ok(self.address)
    }

    async fn sign_typed(
        &self,
        signer: &Pubkey,
        request: &AuthorizationRequest,
    ) -> Result<Vec<u8>, WalletError> {
        assert_eq!(*signer, self.address);
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        // The user takes a moment to answer
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        if self.reject.load(Ordering::SeqCst) {
            return Err(WalletError::Rejected);
        }
        let mut signature = request.message_bytes();
        signature.resize(64, 0);
        Ok(signature)
    }

    fn subscribe_chain_changes(&self) -> broadcast::Receiver<u64> {
        self.chain_changes.subscribe()
    }
}

// =============================================================================
// COMPUTE BACKEND / RELAY
// =============================================================================

#[derive(Default)]
pub struct MockRelay {
    values: Mutex<HashMap<CipherHandle, u64>>,
    calls: AtomicUsize,
    requested: Mutex<Vec<Vec<CipherHandle>>>,
    chains: Mutex<Vec<u64>>,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockRelay {
    pub fn set_value(&self, handle: CipherHandle, value: u64) {
        self.values.lock().unwrap().insert(handle, value);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requested(&self) -> Vec<Vec<CipherHandle>> {
        self.requested.lock().unwrap().clone()
    }

    /// Chain of the instance that served each request
    pub fn chains(&self) -> Vec<u64> {
        self.chains.lock().unwrap().clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Holds every request until the returned gate is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn release(&self) {
        *self.gate.lock().unwrap() = None;
    }

    async fn decrypt(&self, chain_id: u64, request: DecryptRequest<'_>) -> Result<Vec<u64>, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let handles = handles_from_args(&request.args);
        assert_eq!(handles, request.handles);
        self.requested.lock().unwrap().push(handles.clone());
        self.chains.lock().unwrap().push(chain_id);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("relay unavailable".to_string()));
        }
        if request.authorization.contract != request.contract {
            return Err(RelayError::Rejected("mismatched authorization".to_string()));
        }

        let values = self.values.lock().unwrap();
        handles
            .iter()
            .map(|handle| {
                values
                    .get(handle)
                    .copied()
                    .ok_or_else(|| RelayError::Rejected(format!("unknown handle {}", handle)))
            })
            .collect()
    }
}

pub struct MockInstance {
    chain_id: u64,
    relay: Arc<MockRelay>,
    keys: AtomicU8,
}

#[async_trait]
impl ComputeInstance for MockInstance {
    fn generate_keypair(&self) -> EphemeralKeypair {
        let n = self.keys.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        EphemeralKeypair {
            public_key: [n; 32],
            private_key: [n.wrapping_add(128); 32],
        }
    }

    async fn user_decrypt(&self, request: DecryptRequest<'_>) -> Result<Vec<u64>, RelayError> {
        self.relay.decrypt(self.chain_id, request).await
    }
}

pub struct MockBackend {
    pub relay: Arc<MockRelay>,
    created: AtomicUsize,
    fail: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockBackend {
    pub fn new(relay: Arc<MockRelay>) -> Self {
        Self {
            relay,
            created: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }

    pub fn instances_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Holds every instance creation until the returned gate is notified
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl ComputeBackend for MockBackend {
    async fn create_instance(&self, chain_id: u64) -> Result<Arc<dyn ComputeInstance>, RelayError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("gateway unreachable".to_string()));
        }

        Ok(Arc::new(MockInstance {
            chain_id,
            relay: self.relay.clone(),
            keys: AtomicU8::new(0),
        }))
    }
}

// =============================================================================
// CONTEST CONTRACT
// =============================================================================

#[derive(Default)]
pub struct MockContest {
    entries: Mutex<BTreeMap<u64, EntryRecord>>,
    votes: Mutex<HashMap<(u64, String), CipherHandle>>,
    submissions: Mutex<Vec<EntrySubmission>>,
    scored: Mutex<Vec<u64>>,
    voted: Mutex<Vec<(u64, String)>>,
}

impl MockContest {
    pub fn add_entry(&self, entry: EntryRecord) {
        self.entries.lock().unwrap().insert(entry.id, entry);
    }

    pub fn set_votes(&self, entry_id: u64, category: &str, handle: CipherHandle) {
        self.votes
            .lock()
            .unwrap()
            .insert((entry_id, category.to_string()), handle);
    }

    pub fn submissions(&self) -> Vec<EntrySubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn scored(&self) -> Vec<u64> {
        self.scored.lock().unwrap().clone()
    }

    pub fn voted(&self) -> Vec<(u64, String)> {
        self.voted.lock().unwrap().clone()
    }

    fn require_entry(&self, entry_id: u64) -> Result<(), ContractError> {
        if self.entries.lock().unwrap().contains_key(&entry_id) {
            Ok(())
        } else {
            Err(ContractError::NotFound(entry_id))
        }
    }
}

#[async_trait]
impl ContestContract for MockContest {
    async fn submit_entry(
        &self,
        _contract: &Pubkey,
        submission: &EntrySubmission,
    ) -> Result<String, ContractError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(submission.clone());
        Ok(format!("submit-{}", submissions.len()))
    }

    async fn score_entry(&self, _contract: &Pubkey, entry_id: u64) -> Result<String, ContractError> {
        self.require_entry(entry_id)?;
        self.scored.lock().unwrap().push(entry_id);
        Ok(format!("score-{}", entry_id))
    }

    async fn vote_entry(
        &self,
        _contract: &Pubkey,
        entry_id: u64,
        category: &str,
    ) -> Result<String, ContractError> {
        self.require_entry(entry_id)?;
        self.voted
            .lock()
            .unwrap()
            .push((entry_id, category.to_string()));
        Ok(format!("vote-{}-{}", entry_id, category))
    }

    async fn get_all_entries(&self, _contract: &Pubkey) -> Result<Vec<u64>, ContractError> {
        Ok(self.entries.lock().unwrap().keys().copied().collect())
    }

    async fn get_entry(&self, _contract: &Pubkey, entry_id: u64) -> Result<EntryRecord, ContractError> {
        self.entries
            .lock()
            .unwrap()
            .get(&entry_id)
            .cloned()
            .ok_or(ContractError::NotFound(entry_id))
    }

    async fn get_category_votes(
        &self,
        _contract: &Pubkey,
        entry_id: u64,
        category: &str,
    ) -> Result<CipherHandle, ContractError> {
        self.require_entry(entry_id)?;
        Ok(self
            .votes
            .lock()
            .unwrap()
            .get(&(entry_id, category.to_string()))
            .copied()
            .unwrap_or(CipherHandle::ZERO))
    }
}

pub fn entry(id: u64, contestant: Pubkey, categories: &[&str], score_handle: CipherHandle) -> EntryRecord {
    EntryRecord {
        id,
        contestant,
        title: format!("Entry {}", id),
        description_hash: format!("Qm-description-{}", id),
        file_hash: format!("Qm-file-{}", id),
        tags: vec!["test".to_string()],
        categories: categories.iter().map(|c| c.to_string()).collect(),
        timestamp: START_TIME,
        score_handle,
    }
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

/// Engine wired to in-memory collaborators
pub struct TestContext {
    pub engine: ArtContestEngine,
    pub wallet: Arc<MockWallet>,
    pub backend: Arc<MockBackend>,
    pub relay: Arc<MockRelay>,
    pub contest: Arc<MockContest>,
    pub clock: Arc<ManualClock>,
    pub contract: Pubkey,
    pub sepolia_contract: Pubkey,
}

impl TestContext {
    /// Engine initialized for the local chain
    pub async fn new() -> Self {
        let ctx = Self::uninitialized(EngineConfig::default());
        ctx.engine.initialize(LOCALHOST_CHAIN_ID).await.unwrap();
        ctx
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let ctx = Self::uninitialized(config);
        ctx.engine.initialize(LOCALHOST_CHAIN_ID).await.unwrap();
        ctx
    }

    pub fn uninitialized(config: EngineConfig) -> Self {
        init_logging();

        let contract = Pubkey::new_unique();
        let sepolia_contract = Pubkey::new_unique();
        let config = config
            .with_deployment(LOCALHOST_CHAIN_ID, contract)
            .with_deployment(SEPOLIA_CHAIN_ID, sepolia_contract);

        let wallet = Arc::new(MockWallet::new(LOCALHOST_CHAIN_ID));
        let relay = Arc::new(MockRelay::default());
        let backend = Arc::new(MockBackend::new(relay.clone()));
        let contest = Arc::new(MockContest::default());
        let clock = Arc::new(ManualClock::new(START_TIME));

        let engine = ArtContestEngine::with_clock(
            config,
            Some(wallet.clone() as Arc<dyn Wallet>),
            backend.clone(),
            contest.clone(),
            clock.clone(),
        )
        .unwrap();

        Self {
            engine,
            wallet,
            backend,
            relay,
            contest,
            clock,
            contract,
            sepolia_contract,
        }
    }
}
