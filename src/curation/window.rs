use chrono::{DateTime, Duration, Utc};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Article, Episode};

pub const DEFAULT_WINDOW_HOURS: i64 = 48;
pub const DEFAULT_EPISODE_CAP: usize = 10;

/// Trailing window length and per-episode article cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    window: Duration,
    cap: usize,
}

impl WindowParams {
    pub fn new(window: Duration, cap: usize) -> Result<Self> {
        if window <= Duration::zero() {
            return Err(AppError::Validation(format!(
                "window length must be positive, got {}s",
                window.num_seconds()
            )));
        }
        if cap == 0 {
            return Err(AppError::Validation(
                "episode article cap must be at least 1".to_string(),
            ));
        }
        Ok(Self { window, cap })
    }

    pub fn from_hours(hours: i64, cap: usize) -> Result<Self> {
        let window = Duration::try_hours(hours).ok_or_else(|| {
            AppError::Validation(format!("window of {} hours is out of range", hours))
        })?;
        Self::new(window, cap)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            window: Duration::hours(DEFAULT_WINDOW_HOURS),
            cap: DEFAULT_EPISODE_CAP,
        }
    }
}

/// Picks the candidate articles for an episode from the trailing window
/// before its creation time.
#[derive(Clone)]
pub struct WindowSelector {
    repository: Repository,
    params: WindowParams,
}

impl WindowSelector {
    pub fn new(repository: Repository, params: WindowParams) -> Self {
        Self { repository, params }
    }

    pub fn params(&self) -> WindowParams {
        self.params
    }

    /// Processed articles of `user_id` ingested within `[created_at - window, created_at]`.
    ///
    /// An empty result is a normal outcome.
    pub async fn select(&self, user_id: i64, created_at: DateTime<Utc>) -> Result<Vec<Article>> {
        let from = created_at
            .checked_sub_signed(self.params.window)
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "window of {}h before {} is out of range",
                    self.params.window.num_hours(),
                    created_at
                ))
            })?;

        if !self.repository.user_exists(user_id).await? {
            return Err(AppError::not_found("user", user_id));
        }

        let articles = self
            .repository
            .get_window_candidates(user_id, from, created_at, self.params.cap)
            .await?;

        tracing::debug!(
            user_id,
            %created_at,
            candidates = articles.len(),
            "Selected window candidates"
        );
        Ok(articles)
    }

    pub async fn select_for(&self, episode: &Episode) -> Result<Vec<Article>> {
        self.select(episode.user_id, episode.created_at).await
    }

    pub async fn select_for_episode(&self, episode_id: i64) -> Result<Vec<Article>> {
        let episode = self
            .repository
            .get_episode(episode_id)
            .await?
            .ok_or_else(|| AppError::not_found("episode", episode_id))?;
        self.select_for(&episode).await
    }
}
