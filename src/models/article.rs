use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    /// Topic identifiers attached by ingestion, if any.
    pub topics: BTreeSet<String>,
    /// Ingestion time.
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// Only articles carrying a summary take part in filtering and episodes.
    pub fn is_processed(&self) -> bool {
        self.summary.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub feed_id: i64,
    pub title: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub topics: BTreeSet<String>,
    /// Defaults to now when not given.
    pub created_at: Option<DateTime<Utc>>,
}
