use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::db::{LinkOutcome, Repository};
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssemblyReport {
    pub episode_id: i64,
    /// Distinct article ids handed in.
    pub requested: usize,
    /// Links created by this call; already-present links are not counted.
    pub linked: usize,
}

/// One async lock per episode so two assemblies of the same episode never interleave.
#[derive(Clone, Default)]
struct EpisodeLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl EpisodeLocks {
    fn handle(&self, episode_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries nobody holds any more
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(episode_id).or_default())
    }
}

/// Persists the link between an episode and its selected articles.
#[derive(Clone)]
pub struct EpisodeAssembler {
    repository: Repository,
    cap: usize,
    locks: EpisodeLocks,
}

impl EpisodeAssembler {
    pub fn new(repository: Repository, cap: usize) -> Self {
        Self {
            repository,
            cap,
            locks: EpisodeLocks::default(),
        }
    }

    /// Links `article_ids` to the episode in a single transaction.
    ///
    /// Re-running with the same input creates nothing new. An empty input
    /// writes nothing and reports zero links. The cap bounds the episode's
    /// total links, including those made by earlier calls.
    pub async fn assemble(&self, episode_id: i64, article_ids: &[i64]) -> Result<AssemblyReport> {
        let mut seen = HashSet::new();
        let ids: Vec<i64> = article_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        if ids.len() > self.cap {
            return Err(AppError::Validation(format!(
                "{} articles exceed the episode cap of {}",
                ids.len(),
                self.cap
            )));
        }

        if ids.is_empty() {
            if self.repository.get_episode(episode_id).await?.is_none() {
                return Err(AppError::not_found("episode", episode_id));
            }
            tracing::debug!(episode_id, "Nothing to link");
            return Ok(AssemblyReport {
                episode_id,
                requested: 0,
                linked: 0,
            });
        }

        let requested = ids.len();
        let lock = self.locks.handle(episode_id);
        let _guard = lock.lock().await;

        match self.repository.link_articles(episode_id, ids, self.cap).await? {
            LinkOutcome::Linked(linked) => {
                tracing::info!(episode_id, requested, linked, "Assembled episode");
                Ok(AssemblyReport {
                    episode_id,
                    requested,
                    linked,
                })
            }
            LinkOutcome::MissingEpisode => Err(AppError::not_found("episode", episode_id)),
            LinkOutcome::MissingArticle(article_id) => Err(AppError::NotFound(format!(
                "article {} for episode {}",
                article_id, episode_id
            ))),
            LinkOutcome::OverCap { existing, total } => Err(AppError::Validation(format!(
                "episode {} already has {} articles; {} would exceed the cap of {}",
                episode_id, existing, total, self.cap
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::db::fixtures::{make_article, make_episode, seed_user};

    async fn setup(article_count: usize) -> (Repository, i64, Vec<i64>) {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let (user_id, feed_id) = seed_user(&repository, "host").await;
        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..article_count {
            let id = repository
                .insert_article(make_article(
                    feed_id,
                    &format!("story {}", i),
                    Some("s"),
                    now - Duration::hours(i as i64),
                ))
                .await
                .unwrap();
            ids.push(id);
        }
        let episode_id = repository
            .insert_episode(make_episode(user_id, now))
            .await
            .unwrap();
        (repository, episode_id, ids)
    }

    #[tokio::test]
    async fn assembling_twice_creates_links_once() {
        let (repository, episode_id, ids) = setup(3).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 10);

        let first = assert_ok!(assembler.assemble(episode_id, &ids).await);
        let second = assert_ok!(assembler.assemble(episode_id, &ids).await);

        assert_eq!(first.linked, 3);
        assert_eq!(second.linked, 0);
        assert_eq!(second.requested, 3);
        assert_eq!(repository.get_episode_article_ids(episode_id).await.unwrap(), ids);
    }

    #[tokio::test]
    async fn empty_input_links_nothing() {
        let (repository, episode_id, _) = setup(2).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 10);

        let report = assert_ok!(assembler.assemble(episode_id, &[]).await);

        assert_eq!(report.linked, 0);
        assert_eq!(report.requested, 0);
        assert!(repository.get_episode_article_ids(episode_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_ids_in_input_are_collapsed() {
        let (repository, episode_id, ids) = setup(2).await;
        let assembler = EpisodeAssembler::new(repository, 2);

        let report = assert_ok!(
            assembler
                .assemble(episode_id, &[ids[0], ids[1], ids[0], ids[1]])
                .await
        );

        assert_eq!(report.requested, 2);
        assert_eq!(report.linked, 2);
    }

    #[tokio::test]
    async fn input_over_cap_is_rejected_before_writing() {
        let (repository, episode_id, ids) = setup(4).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 3);

        let result = assembler.assemble(episode_id, &ids).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(repository.get_episode_article_ids(episode_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cap_holds_across_separate_calls() {
        let (repository, episode_id, ids) = setup(6).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 3);

        let first = assert_ok!(assembler.assemble(episode_id, &ids[..3]).await);
        let err = assert_err!(assembler.assemble(episode_id, &ids[3..]).await);
        let overlapping = assembler.assemble(episode_id, &[ids[0], ids[4]]).await;
        let repeat = assert_ok!(assembler.assemble(episode_id, &ids[..3]).await);

        assert_eq!(first.linked, 3);
        assert!(matches!(err, AppError::Validation(_)));
        assert!(matches!(overlapping, Err(AppError::Validation(_))));
        assert_eq!(repeat.linked, 0);
        assert_eq!(
            repository.get_episode_article_ids(episode_id).await.unwrap(),
            ids[..3].to_vec()
        );
    }

    #[tokio::test]
    async fn missing_article_leaves_no_partial_links() {
        let (repository, episode_id, ids) = setup(2).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 10);

        let result = assembler.assemble(episode_id, &[ids[0], 9999, ids[1]]).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert!(repository.get_episode_article_ids(episode_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_episode_is_not_found() {
        let (repository, _, ids) = setup(1).await;
        let assembler = EpisodeAssembler::new(repository, 10);

        let err = assert_err!(assembler.assemble(555, &ids).await);
        assert!(matches!(err, AppError::NotFound(_)));
        let err = assert_err!(assembler.assemble(555, &[]).await);
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_assembly_of_one_episode_links_each_article_once() {
        let (repository, episode_id, ids) = setup(5).await;
        let assembler = EpisodeAssembler::new(repository.clone(), 10);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let assembler = assembler.clone();
                let ids = ids.clone();
                tokio::spawn(async move { assembler.assemble(episode_id, &ids).await })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().unwrap().linked;
        }

        assert_eq!(total, 5);
        assert_eq!(repository.get_episode_article_ids(episode_id).await.unwrap().len(), 5);
    }

    #[test]
    fn lock_entries_are_dropped_once_released() {
        let locks = EpisodeLocks::default();
        let held = locks.handle(1);
        drop(locks.handle(2));
        let again = locks.handle(1);

        assert!(Arc::ptr_eq(&held, &again));
        assert_eq!(locks.inner.lock().unwrap().len(), 1);
    }
}
