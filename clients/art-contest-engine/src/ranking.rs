//! Per-category leaderboards from encrypted vote counts.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anchor_lang::prelude::Pubkey;
use futures::future::try_join_all;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::interfaces::ContestContract;
use crate::resolver::HandleResolver;
use crate::state::{CipherHandle, EntryRecord, RankedEntry};

/// Leaderboard order: most votes first, ties by ascending entry id.
pub fn rank_order(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    b.votes
        .cmp(&a.votes)
        .then_with(|| a.entry_id.cmp(&b.entry_id))
}

pub struct RankingAggregator {
    contest: Arc<dyn ContestContract>,
    resolver: Arc<HandleResolver>,
}

impl RankingAggregator {
    pub fn new(contest: Arc<dyn ContestContract>, resolver: Arc<HandleResolver>) -> Self {
        Self { contest, resolver }
    }

    /// Ranks the entries competing in `category` by their decrypted vote
    /// counts. All counts are resolved in one batch.
    pub async fn rank_category(
        &self,
        contract: Pubkey,
        entries: &[EntryRecord],
        category: &str,
    ) -> Result<Vec<RankedEntry>> {
        let mut boards = self
            .rank_categories(contract, entries, &[category.to_string()])
            .await?;
        Ok(boards.remove(category).unwrap_or_default())
    }

    /// Leaderboards for several categories, resolved through a single batch.
    pub async fn rank_categories(
        &self,
        contract: Pubkey,
        entries: &[EntryRecord],
        categories: &[String],
    ) -> Result<BTreeMap<String, Vec<RankedEntry>>> {
        let categories: BTreeSet<&str> = categories.iter().map(String::as_str).collect();
        let competing: Vec<(&str, u64)> = categories
            .iter()
            .copied()
            .flat_map(|category| {
                entries
                    .iter()
                    .filter(move |entry| entry.has_category(category))
                    .map(move |entry| (category, entry.id))
            })
            .collect();

        let handles: Vec<CipherHandle> = try_join_all(
            competing
                .iter()
                .map(|(category, entry_id)| self.contest.get_category_votes(&contract, *entry_id, category)),
        )
        .await
        .map_err(EngineError::from)?;

        let votes = self.resolver.resolve_batch(contract, &handles).await?;

        let mut boards: BTreeMap<String, Vec<RankedEntry>> = categories
            .iter()
            .map(|category| (category.to_string(), Vec::new()))
            .collect();
        for ((category, entry_id), votes) in competing.into_iter().zip(votes) {
            if let Some(board) = boards.get_mut(category) {
                board.push(RankedEntry { entry_id, votes });
            }
        }
        for board in boards.values_mut() {
            board.sort_by(rank_order);
        }

        debug!(
            %contract,
            categories = categories.len(),
            ranked = handles.len(),
            "category rankings computed"
        );
        Ok(boards)
    }
}
