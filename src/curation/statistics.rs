use chrono::NaiveDate;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{DailyStatistics, DateRange, StatisticsSummary};

/// Append-only record of filtering outcomes.
///
/// Every call to [`record`](Self::record) adds a row; rows for the same day are
/// never merged, and reads sum across all of them.
#[derive(Clone)]
pub struct StatisticsRecorder {
    repository: Repository,
}

impl StatisticsRecorder {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    pub async fn record(
        &self,
        user_id: i64,
        date: NaiveDate,
        included: u32,
        filtered_out: u32,
    ) -> Result<i64> {
        self.ensure_user(user_id).await?;
        let id = self
            .repository
            .insert_statistics(user_id, date, i64::from(included), i64::from(filtered_out))
            .await?;
        tracing::debug!(
            user_id,
            %date,
            included,
            filtered_out,
            "Recorded filtering statistics"
        );
        Ok(id)
    }

    pub async fn aggregate(&self, user_id: i64, range: DateRange) -> Result<StatisticsSummary> {
        self.ensure_user(user_id).await?;
        let (included, filtered_out) = self
            .repository
            .get_statistics_totals(user_id, range.start, range.end)
            .await?;
        Ok(StatisticsSummary::from_counts(included, filtered_out))
    }

    pub async fn daily(&self, user_id: i64, range: DateRange) -> Result<Vec<DailyStatistics>> {
        self.ensure_user(user_id).await?;
        self.repository
            .get_daily_statistics(user_id, range.start, range.end)
            .await
    }

    async fn ensure_user(&self, user_id: i64) -> Result<()> {
        if !self.repository.user_exists(user_id).await? {
            return Err(AppError::not_found("user", user_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::seed_user;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[tokio::test]
    async fn repeated_records_are_summed_not_merged() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let (user_id, _) = seed_user(&repository, "stats").await;
        let recorder = StatisticsRecorder::new(repository.clone());

        recorder.record(user_id, day(5), 5, 2).await.expect("first record");
        recorder.record(user_id, day(5), 5, 2).await.expect("second record");
        let summary = recorder
            .aggregate(user_id, DateRange::single(day(5)))
            .await
            .expect("aggregate must succeed");

        assert_eq!(summary.included_articles, 10);
        assert_eq!(summary.filtered_out_articles, 4);
        assert_eq!(summary.total_articles, 14);
        assert_eq!(summary.inclusion_percentage, 71.4);
        assert_eq!(repository.get_statistics_rows(user_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn aggregate_without_rows_reports_zero_percent() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let (user_id, _) = seed_user(&repository, "quiet").await;
        let recorder = StatisticsRecorder::new(repository);

        let summary = recorder
            .aggregate(user_id, DateRange::single(day(1)))
            .await
            .expect("aggregate must succeed");

        assert_eq!(summary, StatisticsSummary::from_counts(0, 0));
        assert_eq!(summary.inclusion_percentage, 0.0);
    }

    #[tokio::test]
    async fn aggregate_only_counts_dates_in_range() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let (user_id, _) = seed_user(&repository, "ranged").await;
        let (other_user, _) = seed_user(&repository, "other").await;
        let recorder = StatisticsRecorder::new(repository);

        recorder.record(user_id, day(1), 1, 1).await.unwrap();
        recorder.record(user_id, day(2), 3, 0).await.unwrap();
        recorder.record(user_id, day(4), 7, 7).await.unwrap();
        recorder.record(other_user, day(2), 100, 0).await.unwrap();

        let range = DateRange::new(day(1), day(3)).unwrap();
        let summary = recorder.aggregate(user_id, range).await.unwrap();
        let daily = recorder.daily(user_id, range).await.unwrap();

        assert_eq!(summary.included_articles, 4);
        assert_eq!(summary.filtered_out_articles, 1);
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].date, day(1));
        assert_eq!(daily[1].included_articles, 3);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let repository = Repository::in_memory().await.expect("open must succeed");
        let recorder = StatisticsRecorder::new(repository);

        let recorded = recorder.record(77, day(1), 1, 0).await;
        let aggregated = recorder.aggregate(77, DateRange::single(day(1))).await;

        assert!(matches!(recorded, Err(AppError::NotFound(_))));
        assert!(matches!(aggregated, Err(AppError::NotFound(_))));
    }
}
