//! Surface exposed to the surrounding application.
//!
//! Every operation is bound to the contest deployment of the chain the
//! engine is currently initialized for.

use std::collections::BTreeMap;
use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::authorization::AuthorizationCache;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::instance::{InstanceBinding, InstanceManager, InstanceState};
use crate::interfaces::{Clock, ComputeBackend, ContestContract, SystemClock, Wallet};
use crate::ranking::RankingAggregator;
use crate::resolver::HandleResolver;
use crate::state::{
    CategoryTally, CategoryVotes, CipherHandle, DecryptedEntry, EntryRecord, EntrySubmission,
    RankedEntry,
};

pub struct ArtContestEngine {
    instances: Arc<InstanceManager>,
    authorizations: Arc<AuthorizationCache>,
    resolver: Arc<HandleResolver>,
    ranking: RankingAggregator,
    contest: Arc<dyn ContestContract>,
}

impl ArtContestEngine {
    pub fn new(
        config: EngineConfig,
        wallet: Option<Arc<dyn Wallet>>,
        backend: Arc<dyn ComputeBackend>,
        contest: Arc<dyn ContestContract>,
    ) -> Result<Self> {
        Self::with_clock(config, wallet, backend, contest, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: EngineConfig,
        wallet: Option<Arc<dyn Wallet>>,
        backend: Arc<dyn ComputeBackend>,
        contest: Arc<dyn ContestContract>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let instances = Arc::new(InstanceManager::new(config.clone(), wallet, backend));
        let authorizations = Arc::new(AuthorizationCache::new(
            instances.clone(),
            clock,
            config.authorization_validity_secs,
            config.authorization_safety_margin_secs,
        ));
        let resolver = Arc::new(HandleResolver::new(
            instances.clone(),
            authorizations.clone(),
            config.relay_timeout,
            config.cache_plaintexts,
        ));
        let ranking = RankingAggregator::new(contest.clone(), resolver.clone());

        Ok(Self {
            instances,
            authorizations,
            resolver,
            ranking,
            contest,
        })
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    pub fn authorizations(&self) -> &Arc<AuthorizationCache> {
        &self.authorizations
    }

    pub fn resolver(&self) -> &Arc<HandleResolver> {
        &self.resolver
    }

    pub fn ranking(&self) -> &RankingAggregator {
        &self.ranking
    }

    // ==================== LIFECYCLE ====================

    pub async fn initialize(&self, chain_id: u64) -> Result<Arc<InstanceBinding>> {
        self.instances.initialize(chain_id).await
    }

    pub async fn connect(&self) -> Result<Arc<InstanceBinding>> {
        self.instances.connect().await
    }

    /// Retires the current binding together with every authorization and
    /// plaintext obtained under it.
    pub fn reset(&self) {
        self.instances.reset();
        self.authorizations.clear();
        self.resolver.clear();
    }

    pub fn watch_chain_changes(&self) -> Result<()> {
        self.instances.watch_chain_changes()
    }

    pub fn state(&self) -> InstanceState {
        self.instances.state()
    }

    pub fn contract_address(&self) -> Result<Pubkey> {
        Ok(self.instances.binding()?.contract)
    }

    // ==================== DECRYPTION ====================

    pub async fn resolve_one(&self, handle: CipherHandle) -> Result<u64> {
        if handle.is_zero() {
            return Ok(0);
        }
        let contract = self.contract_address()?;
        self.resolver.resolve_one(contract, handle).await
    }

    pub async fn resolve_batch(&self, handles: &[CipherHandle]) -> Result<Vec<u64>> {
        if handles.iter().all(CipherHandle::is_zero) {
            return Ok(vec![0; handles.len()]);
        }
        let contract = self.contract_address()?;
        self.resolver.resolve_batch(contract, handles).await
    }

    pub async fn rank_category(
        &self,
        entries: &[EntryRecord],
        category: &str,
    ) -> Result<Vec<RankedEntry>> {
        let contract = self.contract_address()?;
        self.ranking.rank_category(contract, entries, category).await
    }

    pub async fn rank_categories(
        &self,
        entries: &[EntryRecord],
        categories: &[String],
    ) -> Result<BTreeMap<String, Vec<RankedEntry>>> {
        let contract = self.contract_address()?;
        self.ranking.rank_categories(contract, entries, categories).await
    }

    /// Decrypts the score of every entry in one batch, preserving order
    pub async fn decrypt_scores(&self, entries: &[EntryRecord]) -> Result<Vec<DecryptedEntry>> {
        let handles: Vec<CipherHandle> = entries.iter().map(|entry| entry.score_handle).collect();
        let scores = self.resolve_batch(&handles).await?;

        Ok(entries
            .iter()
            .cloned()
            .zip(scores)
            .map(|(entry, score)| DecryptedEntry { entry, score })
            .collect())
    }

    /// Vote handles and decrypted counts of one entry across `categories`
    pub async fn category_votes(&self, entry_id: u64, categories: &[String]) -> Result<CategoryVotes> {
        let contract = self.contract_address()?;
        let handles: Vec<CipherHandle> = try_join_all(
            categories
                .iter()
                .map(|category| self.contest.get_category_votes(&contract, entry_id, category)),
        )
        .await
        .map_err(EngineError::from)?;

        let votes = self.resolver.resolve_batch(contract, &handles).await?;

        Ok(categories
            .iter()
            .cloned()
            .zip(handles.into_iter().zip(votes))
            .map(|(category, (handle, votes))| (category, CategoryTally { handle, votes }))
            .collect())
    }

    // ==================== CONTRACT ====================

    pub async fn submit_entry(&self, submission: &EntrySubmission) -> Result<String> {
        submission.validate()?;
        let contract = self.contract_address()?;
        let signature = self.contest.submit_entry(&contract, submission).await?;
        info!(%contract, title = %submission.title, %signature, "entry submitted");
        Ok(signature)
    }

    pub async fn score_entry(&self, entry_id: u64) -> Result<String> {
        let contract = self.contract_address()?;
        let signature = self.contest.score_entry(&contract, entry_id).await?;
        info!(%contract, entry_id, %signature, "entry scored");
        Ok(signature)
    }

    pub async fn vote_entry(&self, entry_id: u64, category: &str) -> Result<String> {
        let contract = self.contract_address()?;
        let signature = self.contest.vote_entry(&contract, entry_id, category).await?;
        info!(%contract, entry_id, category, %signature, "vote cast");
        Ok(signature)
    }

    pub async fn entry_ids(&self) -> Result<Vec<u64>> {
        let contract = self.contract_address()?;
        Ok(self.contest.get_all_entries(&contract).await?)
    }

    pub async fn get_entry(&self, entry_id: u64) -> Result<EntryRecord> {
        let contract = self.contract_address()?;
        Ok(self.contest.get_entry(&contract, entry_id).await?)
    }

    pub async fn get_category_votes(&self, entry_id: u64, category: &str) -> Result<CipherHandle> {
        let contract = self.contract_address()?;
        Ok(self
            .contest
            .get_category_votes(&contract, entry_id, category)
            .await?)
    }

    /// Every entry record, in the contract's id order
    pub async fn load_entries(&self) -> Result<Vec<EntryRecord>> {
        let contract = self.contract_address()?;
        let ids = self.contest.get_all_entries(&contract).await?;
        let entries = try_join_all(ids.iter().map(|id| self.contest.get_entry(&contract, *id))).await?;
        debug!(%contract, entries = entries.len(), "entries loaded");
        Ok(entries)
    }
}

/// Entries submitted by `contestant`
pub fn entries_by_contestant(entries: &[EntryRecord], contestant: &Pubkey) -> Vec<EntryRecord> {
    entries
        .iter()
        .filter(|entry| entry.contestant == *contestant)
        .cloned()
        .collect()
}
