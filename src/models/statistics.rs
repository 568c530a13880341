use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// One recording event. Several rows may exist for the same user and date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteringStatistics {
    pub id: i64,
    pub user_id: i64,
    pub date: NaiveDate,
    pub included_articles: i64,
    pub filtered_out_articles: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AppError::Validation(format!(
                "date range starts after it ends ({} > {})",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSummary {
    pub total_articles: i64,
    pub included_articles: i64,
    pub filtered_out_articles: i64,
    pub inclusion_percentage: f64,
}

impl StatisticsSummary {
    pub fn from_counts(included: i64, filtered_out: i64) -> Self {
        let total = included + filtered_out;
        let inclusion_percentage = if total == 0 {
            0.0
        } else {
            let raw = included as f64 / total as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };

        Self {
            total_articles: total,
            included_articles: included,
            filtered_out_articles: filtered_out,
            inclusion_percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatistics {
    pub date: NaiveDate,
    pub included_articles: i64,
    pub filtered_out_articles: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counts_give_zero_percent() {
        let summary = StatisticsSummary::from_counts(0, 0);
        assert_eq!(summary.total_articles, 0);
        assert_eq!(summary.inclusion_percentage, 0.0);
        assert!(!summary.inclusion_percentage.is_nan());
    }

    #[test]
    fn percentage_is_rounded_to_one_decimal() {
        let summary = StatisticsSummary::from_counts(10, 4);
        assert_eq!(summary.total_articles, 14);
        assert_eq!(summary.inclusion_percentage, 71.4);

        assert_eq!(StatisticsSummary::from_counts(2, 1).inclusion_percentage, 66.7);
        assert_eq!(StatisticsSummary::from_counts(3, 0).inclusion_percentage, 100.0);
    }

    #[test]
    fn inverted_range_is_rejected() {
        let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(matches!(DateRange::new(start, end), Err(AppError::Validation(_))));
        assert!(DateRange::new(end, start).is_ok());
    }
}
