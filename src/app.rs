use chrono::NaiveDate;

use crate::config::Config;
use crate::curation::{
    AssemblyReport, BackfillReconciler, BackfillReport, EpisodeAssembler, FilterOutcome,
    RelevanceFilter, StatisticsRecorder, WindowSelector,
};
use crate::db::Repository;
use crate::error::Result;
use crate::models::{DailyStatistics, DateRange, StatisticsSummary};

/// Wires the curation components over one repository.
pub struct App {
    pub repository: Repository,
    pub filter: RelevanceFilter,
    pub recorder: StatisticsRecorder,
    pub selector: WindowSelector,
    pub assembler: EpisodeAssembler,
    pub reconciler: BackfillReconciler,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        // Initialize database
        let repository = Repository::new(&config.db_path).await?;
        Self::with_repository(repository, config)
    }

    pub fn with_repository(repository: Repository, config: &Config) -> Result<Self> {
        config.validate()?;
        let params = config.window_params()?;

        // Every component shares the one connection
        let recorder = StatisticsRecorder::new(repository.clone());
        let filter = RelevanceFilter::new(repository.clone(), recorder.clone());
        let selector = WindowSelector::new(repository.clone(), params);
        let assembler = EpisodeAssembler::new(repository.clone(), params.cap());
        // Recovery path reuses the same selector and assembler
        let reconciler = BackfillReconciler::new(
            repository.clone(),
            selector.clone(),
            assembler.clone(),
            config.backfill_concurrency,
        );

        Ok(Self {
            repository,
            filter,
            recorder,
            selector,
            assembler,
            reconciler,
        })
    }

    /// Normal path after the generation service has created an episode.
    pub async fn curate_episode(&self, episode_id: i64) -> Result<AssemblyReport> {
        let articles = self.selector.select_for_episode(episode_id).await?;

        // Selection order is kept; the assembler only dedupes
        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        self.assembler.assemble(episode_id, &ids).await
    }

    pub async fn filter_ingested_on(&self, user_id: i64, date: NaiveDate) -> Result<FilterOutcome> {
        self.filter.filter_ingested_on(user_id, date).await
    }

    pub async fn statistics(&self, user_id: i64, range: DateRange) -> Result<StatisticsSummary> {
        self.recorder.aggregate(user_id, range).await
    }

    pub async fn daily_statistics(
        &self,
        user_id: i64,
        range: DateRange,
    ) -> Result<Vec<DailyStatistics>> {
        self.recorder.daily(user_id, range).await
    }

    pub async fn backfill(&self) -> Result<BackfillReport> {
        self.reconciler.run().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::db::fixtures::{make_article, make_episode, seed_user};
    use crate::models::RelevancePreferences;

    fn test_config(cap: usize) -> Config {
        Config {
            db_path: ":memory:".to_string(),
            window_hours: 48,
            episode_article_cap: cap,
            backfill_concurrency: 2,
        }
    }

    #[tokio::test]
    async fn ingest_filter_curate_and_report() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let app = App::with_repository(repository.clone(), &test_config(10)).unwrap();
        let (user_id, feed_id) = seed_user(&repository, "commuter").await;
        repository
            .update_preferences(
                user_id,
                RelevancePreferences {
                    topics: BTreeSet::from(["space".to_string()]),
                    keywords: vec![],
                    threshold: 40,
                },
            )
            .await
            .unwrap();

        let t = Utc.with_ymd_and_hms(2026, 8, 3, 7, 0, 0).unwrap();
        let ingested = t - Duration::hours(3);
        for (title, summary) in [
            ("Space launch delayed", Some("weather")),
            ("Local bake sale", Some("cakes")),
            ("Space station draft", None),
        ] {
            repository
                .insert_article(make_article(feed_id, title, summary, ingested))
                .await
                .unwrap();
        }

        let outcome = app
            .filter_ingested_on(user_id, ingested.date_naive())
            .await
            .unwrap();
        let episode_id = repository.insert_episode(make_episode(user_id, t)).await.unwrap();
        let assembled = app.curate_episode(episode_id).await.unwrap();
        let stats = app
            .statistics(user_id, DateRange::single(ingested.date_naive()))
            .await
            .unwrap();

        assert_eq!(outcome.included, 1);
        assert_eq!(outcome.filtered_out, 1);
        assert_eq!(outcome.skipped, 0);
        // Episodes draw on every processed article in the window.
        assert_eq!(assembled.linked, 2);
        assert_eq!(stats.inclusion_percentage, 50.0);
        assert!(app.backfill().await.unwrap().episodes.is_empty());
    }

    #[tokio::test]
    async fn curate_episode_respects_configured_cap() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let app = App::with_repository(repository.clone(), &test_config(3)).unwrap();
        let (user_id, feed_id) = seed_user(&repository, "capped").await;
        let t = Utc::now();
        for i in 0..6 {
            repository
                .insert_article(make_article(
                    feed_id,
                    &format!("n{}", i),
                    Some("s"),
                    t - Duration::hours(i),
                ))
                .await
                .unwrap();
        }
        let episode_id = repository.insert_episode(make_episode(user_id, t)).await.unwrap();

        let first = app.curate_episode(episode_id).await.unwrap();
        let again = app.curate_episode(episode_id).await.unwrap();

        assert_eq!(first.linked, 3);
        assert_eq!(again.linked, 0);
        assert_eq!(repository.get_episode_article_ids(episode_id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let mut config = test_config(10);
        config.window_hours = 0;

        assert!(App::with_repository(repository, &config).is_err());
    }
}
