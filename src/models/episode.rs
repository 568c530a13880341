use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub user_id: i64,
    pub script: String,
    pub audio_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub user_id: i64,
    pub script: String,
    pub audio_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}
