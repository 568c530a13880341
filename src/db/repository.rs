use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    Article, DailyStatistics, Episode, Feed, FilteringStatistics, NewArticle, NewEpisode,
    NewFeed, NewUser, RelevancePreferences, SubscriptionTier, User,
};

use super::schema::SCHEMA;

const ARTICLE_COLUMNS: &str =
    "a.id, a.feed_id, a.title, a.url, a.published_at, a.summary, a.topics, a.created_at";

const EPISODE_COLUMNS: &str = "e.id, e.user_id, e.script, e.audio_url, e.duration_seconds, e.created_at";

/// Result of an atomic link batch. Nothing is written unless it is `Linked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(usize),
    MissingEpisode,
    /// The article does not exist or belongs to a different user.
    MissingArticle(i64),
    /// Linking would leave the episode with more articles than allowed.
    OverCap { existing: usize, total: usize },
}

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // User operations

    pub async fn insert_user(&self, user: NewUser) -> Result<i64> {
        user.preferences.validate()?;
        let topics = serde_json::to_string(&user.preferences.topics)?;
        let keywords = serde_json::to_string(&user.preferences.keywords)?;
        let created_at = format_timestamp(&Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO users (email, tier, topics, keywords, relevance_threshold, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                    params![
                        user.email,
                        user.tier.as_str(),
                        topics,
                        keywords,
                        user.preferences.threshold,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        let user = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, email, tier, topics, keywords, relevance_threshold, created_at FROM users WHERE id = ?1",
                )?;
                let user = stmt.query_row(params![id], user_from_row).optional()?;
                Ok(user)
            })
            .await?;
        Ok(user)
    }

    pub async fn user_exists(&self, id: i64) -> Result<bool> {
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM users WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Returns false when no such user exists.
    pub async fn update_preferences(&self, id: i64, preferences: RelevancePreferences) -> Result<bool> {
        preferences.validate()?;
        let topics = serde_json::to_string(&preferences.topics)?;
        let keywords = serde_json::to_string(&preferences.keywords)?;
        let updated = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE users SET topics = ?1, keywords = ?2, relevance_threshold = ?3 WHERE id = ?4",
                    params![topics, keywords, preferences.threshold, id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(updated)
    }

    /// Cascades to feeds, articles, episodes, links and statistics.
    pub async fn delete_user(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Feed operations

    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let created_at = format_timestamp(&Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (user_id, title, url, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![feed.user_id, feed.title, feed.url, created_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, title, url, created_at FROM feeds WHERE user_id = ?1 ORDER BY title",
                )?;
                let feeds = stmt
                    .query_map(params![user_id], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    // Article operations

    pub async fn insert_article(&self, article: NewArticle) -> Result<i64> {
        let topics = serde_json::to_string(&article.topics)?;
        let created_at = format_timestamp(&article.created_at.unwrap_or_else(Utc::now));
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles (feed_id, title, url, published_at, summary, topics, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
                    params![
                        article.feed_id,
                        article.title,
                        article.url,
                        article.published_at.as_ref().map(format_timestamp),
                        article.summary,
                        topics,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// The only mutation an article ever sees.
    pub async fn attach_summary(&self, article_id: i64, summary: String) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE articles SET summary = ?1 WHERE id = ?2",
                    params![summary, article_id],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(updated)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM articles a WHERE a.id = ?1", ARTICLE_COLUMNS);
                let article = conn
                    .query_row(&sql, params![id], article_from_row)
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    /// Processed articles of a user ingested in `[from, to)`, oldest first.
    pub async fn get_processed_articles_ingested_between(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        let from = format_timestamp(&from);
        let to = format_timestamp(&to);
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {}
                       FROM articles a
                       JOIN feeds f ON a.feed_id = f.id
                       WHERE f.user_id = ?1
                         AND a.summary IS NOT NULL
                         AND a.created_at >= ?2 AND a.created_at < ?3
                       ORDER BY a.created_at, a.id"#,
                    ARTICLE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![user_id, from, to], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Eligible articles for an episode window, in selection order.
    ///
    /// Both window ends are inclusive. Ordering is published time descending with
    /// undated articles last, then ingestion time descending, then id descending.
    pub async fn get_window_candidates(
        &self,
        user_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let from = format_timestamp(&from);
        let to = format_timestamp(&to);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {}
                       FROM articles a
                       JOIN feeds f ON a.feed_id = f.id
                       WHERE f.user_id = ?1
                         AND a.summary IS NOT NULL
                         AND a.created_at >= ?2 AND a.created_at <= ?3
                       ORDER BY a.published_at DESC NULLS LAST, a.created_at DESC, a.id DESC
                       LIMIT ?4"#,
                    ARTICLE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![user_id, from, to, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    // Episode operations

    pub async fn insert_episode(&self, episode: NewEpisode) -> Result<i64> {
        let created_at = format_timestamp(&episode.created_at.unwrap_or_else(Utc::now));
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO episodes (user_id, script, audio_url, duration_seconds, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        episode.user_id,
                        episode.script,
                        episode.audio_url,
                        episode.duration_seconds,
                        created_at,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_episode(&self, id: i64) -> Result<Option<Episode>> {
        let episode = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {} FROM episodes e WHERE e.id = ?1", EPISODE_COLUMNS);
                let episode = conn
                    .query_row(&sql, params![id], episode_from_row)
                    .optional()?;
                Ok(episode)
            })
            .await?;
        Ok(episode)
    }

    /// Cascades to the episode's links.
    pub async fn delete_episode(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM episodes WHERE id = ?1", params![id])?;
                Ok(changed > 0)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn get_episodes_for_user(&self, user_id: i64) -> Result<Vec<Episode>> {
        let episodes = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT {} FROM episodes e WHERE e.user_id = ?1 ORDER BY e.created_at DESC, e.id DESC",
                    EPISODE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let episodes = stmt
                    .query_map(params![user_id], episode_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(episodes)
            })
            .await?;
        Ok(episodes)
    }

    /// Episodes with no linked article, grouped by user and oldest first.
    pub async fn get_unlinked_episodes(&self) -> Result<Vec<Episode>> {
        let episodes = self
            .conn
            .call(|conn| {
                let sql = format!(
                    r#"SELECT {}
                       FROM episodes e
                       WHERE NOT EXISTS (
                           SELECT 1 FROM episode_articles ea WHERE ea.episode_id = e.id
                       )
                       ORDER BY e.user_id, e.created_at, e.id"#,
                    EPISODE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let episodes = stmt
                    .query_map([], episode_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(episodes)
            })
            .await?;
        Ok(episodes)
    }

    /// Linked article ids in link order.
    pub async fn get_episode_article_ids(&self, episode_id: i64) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT article_id FROM episode_articles WHERE episode_id = ?1 ORDER BY id",
                )?;
                let ids = stmt
                    .query_map(params![episode_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// Links articles to an episode in one transaction.
    ///
    /// Pairs that already exist are skipped. If the episode or any article is
    /// missing, an article belongs to another user, or the episode would end
    /// up with more than `cap` articles, the transaction is rolled back and
    /// nothing is written.
    pub async fn link_articles(
        &self,
        episode_id: i64,
        article_ids: Vec<i64>,
        cap: usize,
    ) -> Result<LinkOutcome> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let owner: Option<i64> = tx
                    .query_row(
                        "SELECT user_id FROM episodes WHERE id = ?1",
                        params![episode_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(user_id) = owner else {
                    return Ok(LinkOutcome::MissingEpisode);
                };

                let existing: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM episode_articles WHERE episode_id = ?1",
                    params![episode_id],
                    |row| row.get(0),
                )?;
                let existing = existing as usize;

                let mut linked = 0;
                {
                    let mut owned = tx.prepare(
                        "SELECT 1 FROM articles a JOIN feeds f ON a.feed_id = f.id WHERE a.id = ?1 AND f.user_id = ?2",
                    )?;
                    let mut insert = tx.prepare(
                        "INSERT OR IGNORE INTO episode_articles (episode_id, article_id) VALUES (?1, ?2)",
                    )?;
                    for &article_id in &article_ids {
                        if !owned.exists(params![article_id, user_id])? {
                            return Ok(LinkOutcome::MissingArticle(article_id));
                        }
                        linked += insert.execute(params![episode_id, article_id])?;
                    }
                }

                let total = existing + linked;
                if total > cap {
                    // Dropping the transaction rolls back the inserts above.
                    return Ok(LinkOutcome::OverCap { existing, total });
                }

                tx.commit()?;
                Ok(LinkOutcome::Linked(linked))
            })
            .await?;
        Ok(outcome)
    }

    // Statistics operations

    pub async fn insert_statistics(
        &self,
        user_id: i64,
        date: NaiveDate,
        included: i64,
        filtered_out: i64,
    ) -> Result<i64> {
        let date = format_date(&date);
        let recorded_at = format_timestamp(&Utc::now());
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO filtering_statistics (user_id, date, included_articles, filtered_out_articles, recorded_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![user_id, date, included, filtered_out, recorded_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Sums of (included, filtered out) over every row dated within `[start, end]`.
    pub async fn get_statistics_totals(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<(i64, i64)> {
        let start = format_date(&start);
        let end = format_date(&end);
        let totals = self
            .conn
            .call(move |conn| {
                let totals = conn.query_row(
                    r#"SELECT COALESCE(SUM(included_articles), 0), COALESCE(SUM(filtered_out_articles), 0)
                       FROM filtering_statistics
                       WHERE user_id = ?1 AND date >= ?2 AND date <= ?3"#,
                    params![user_id, start, end],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                Ok(totals)
            })
            .await?;
        Ok(totals)
    }

    pub async fn get_daily_statistics(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyStatistics>> {
        let start = format_date(&start);
        let end = format_date(&end);
        let days = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT date, SUM(included_articles), SUM(filtered_out_articles)
                       FROM filtering_statistics
                       WHERE user_id = ?1 AND date >= ?2 AND date <= ?3
                       GROUP BY date
                       ORDER BY date"#,
                )?;
                let days = stmt
                    .query_map(params![user_id, start, end], |row| {
                        Ok(DailyStatistics {
                            date: date_column(row, 0)?,
                            included_articles: row.get(1)?,
                            filtered_out_articles: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(days)
            })
            .await?;
        Ok(days)
    }

    pub async fn get_statistics_rows(&self, user_id: i64) -> Result<Vec<FilteringStatistics>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, user_id, date, included_articles, filtered_out_articles, recorded_at
                       FROM filtering_statistics
                       WHERE user_id = ?1
                       ORDER BY date, id"#,
                )?;
                let rows = stmt
                    .query_map(params![user_id], |row| {
                        Ok(FilteringStatistics {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            date: date_column(row, 2)?,
                            included_articles: row.get(3)?,
                            filtered_out_articles: row.get(4)?,
                            recorded_at: timestamp_column(row, 5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }
}

/// Fixed-width UTC form so that text comparison in SQL follows time order.
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn format_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Every timestamp column is written by `format_timestamp`.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{}'", raw)))
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => parse_datetime(&raw)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("invalid timestamp '{}'", raw))),
        None => Ok(None),
    }
}

fn date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("invalid date '{}': {}", raw, e)))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let tier: String = row.get(2)?;
    let threshold: i64 = row.get(5)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        tier: tier
            .parse::<SubscriptionTier>()
            .map_err(|e| conversion_error(2, e.to_string()))?,
        preferences: RelevancePreferences {
            topics: json_column::<BTreeSet<String>>(row, 3)?,
            keywords: json_column::<Vec<String>>(row, 4)?,
            threshold: u8::try_from(threshold)
                .map_err(|e| conversion_error(5, e.to_string()))?,
        },
        created_at: timestamp_column(row, 6)?,
    })
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        created_at: timestamp_column(row, 4)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        published_at: optional_timestamp_column(row, 4)?,
        summary: row.get(5)?,
        topics: json_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
    })
}

fn episode_from_row(row: &Row) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        script: row.get(2)?,
        audio_url: row.get(3)?,
        duration_seconds: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}
