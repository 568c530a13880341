use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::Episode;

use super::assembler::EpisodeAssembler;
use super::window::WindowSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "articles", rename_all = "snake_case")]
pub enum BackfillOutcome {
    Linked(usize),
    NoEligibleArticles,
    /// The episode disappeared between enumeration and processing.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeBackfill {
    pub episode_id: i64,
    pub user_id: i64,
    pub outcome: BackfillOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub episodes: Vec<EpisodeBackfill>,
}

impl BackfillReport {
    pub fn repaired(&self) -> usize {
        self.episodes
            .iter()
            .filter(|e| matches!(e.outcome, BackfillOutcome::Linked(n) if n > 0))
            .count()
    }

    pub fn links_created(&self) -> usize {
        self.episodes
            .iter()
            .map(|e| match e.outcome {
                BackfillOutcome::Linked(n) => n,
                _ => 0,
            })
            .sum()
    }
}

/// Repairs episodes that ended up with no linked articles.
///
/// Reuses the normal selection and assembly path, so running it again only
/// touches episodes that are still empty.
#[derive(Clone)]
pub struct BackfillReconciler {
    repository: Repository,
    selector: WindowSelector,
    assembler: EpisodeAssembler,
    concurrency: usize,
}

impl BackfillReconciler {
    pub fn new(
        repository: Repository,
        selector: WindowSelector,
        assembler: EpisodeAssembler,
        concurrency: usize,
    ) -> Self {
        Self {
            repository,
            selector,
            assembler,
            concurrency: concurrency.max(1),
        }
    }

    /// Users are reconciled concurrently; each user's episodes run in order.
    pub async fn run(&self) -> Result<BackfillReport> {
        let episodes = self.repository.get_unlinked_episodes().await?;
        tracing::info!("Backfill found {} episodes without articles", episodes.len());

        let mut by_user: BTreeMap<i64, Vec<Episode>> = BTreeMap::new();
        for episode in episodes {
            by_user.entry(episode.user_id).or_default().push(episode);
        }

        let results: Vec<Result<Vec<EpisodeBackfill>>> = stream::iter(by_user.into_values())
            .map(|episodes| async move { self.reconcile_user(episodes).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = BackfillReport::default();
        for result in results {
            report.episodes.extend(result?);
        }
        report.episodes.sort_by_key(|e| e.episode_id);

        tracing::info!(
            processed = report.episodes.len(),
            repaired = report.repaired(),
            links = report.links_created(),
            "Backfill finished"
        );
        Ok(report)
    }

    async fn reconcile_user(&self, episodes: Vec<Episode>) -> Result<Vec<EpisodeBackfill>> {
        let mut results = Vec::with_capacity(episodes.len());
        for episode in episodes {
            let outcome = self.reconcile_episode(&episode).await?;
            results.push(EpisodeBackfill {
                episode_id: episode.id,
                user_id: episode.user_id,
                outcome,
            });
        }
        Ok(results)
    }

    pub async fn reconcile_episode(&self, episode: &Episode) -> Result<BackfillOutcome> {
        let candidates = match self.selector.select_for(episode).await {
            Ok(candidates) => candidates,
            Err(AppError::NotFound(what)) => {
                tracing::info!("Episode {}: skipped, {} vanished", episode.id, what);
                return Ok(BackfillOutcome::Skipped);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!("Episode {}: skipped, {}", episode.id, e);
                return Ok(BackfillOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        if candidates.is_empty() {
            // The selection alone does not prove the episode is still there.
            if self.repository.get_episode(episode.id).await?.is_none() {
                tracing::info!("Episode {}: skipped, episode vanished", episode.id);
                return Ok(BackfillOutcome::Skipped);
            }
            tracing::info!("Episode {}: no eligible articles found", episode.id);
            return Ok(BackfillOutcome::NoEligibleArticles);
        }

        let ids: Vec<i64> = candidates.iter().map(|a| a.id).collect();
        match self.assembler.assemble(episode.id, &ids).await {
            Ok(report) => {
                tracing::info!("Episode {}: linked {} articles", episode.id, report.linked);
                Ok(BackfillOutcome::Linked(report.linked))
            }
            Err(AppError::NotFound(what)) => {
                tracing::info!("Episode {}: skipped, {} vanished", episode.id, what);
                Ok(BackfillOutcome::Skipped)
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!("Episode {}: skipped, {}", episode.id, e);
                Ok(BackfillOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}
