use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{Article, RelevancePreferences};

use super::statistics::StatisticsRecorder;

/// Scores how relevant an article is to a user, from 0 to 100.
///
/// The filter only asks for a number; swapping the rule-based scorer for a
/// model-backed one does not touch the filter's control flow.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, article: &Article, preferences: &RelevancePreferences) -> u8;

    /// Scores with the term matches the filter already computed for this
    /// article. Scorers that do not look at matches keep the default.
    fn score_matches(
        &self,
        article: &Article,
        preferences: &RelevancePreferences,
        _matches: &[TermMatch],
    ) -> u8 {
        self.score(article, preferences)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TermKind {
    Topic,
    Keyword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermMatch {
    pub term: String,
    pub kind: TermKind,
    /// Ingestion tagged the article with this topic.
    pub tagged: bool,
    pub in_title: bool,
    pub in_summary: bool,
}

struct Term {
    label: String,
    kind: TermKind,
    pattern: Regex,
}

/// Case-insensitive matcher compiled once from a user's topics and keywords.
pub struct PreferenceMatcher {
    terms: Vec<Term>,
}

impl PreferenceMatcher {
    pub fn new(preferences: &RelevancePreferences) -> Result<Self> {
        let mut terms: Vec<Term> = Vec::new();

        let topics = preferences.topics.iter().map(|t| (t, TermKind::Topic));
        let keywords = preferences.keywords.iter().map(|k| (k, TermKind::Keyword));

        for (raw, kind) in topics.chain(keywords) {
            let label = raw.trim();
            if label.is_empty() {
                continue;
            }
            let lowered = label.to_lowercase();
            if terms.iter().any(|t| t.label.to_lowercase() == lowered) {
                continue;
            }
            let pattern = RegexBuilder::new(&regex::escape(label))
                .case_insensitive(true)
                .build()
                .map_err(|e| AppError::Validation(format!("bad preference term '{}': {}", label, e)))?;
            terms.push(Term {
                label: label.to_string(),
                kind,
                pattern,
            });
        }

        Ok(Self { terms })
    }

    pub fn matches(&self, article: &Article) -> Vec<TermMatch> {
        self.terms
            .iter()
            .filter_map(|term| {
                let tagged = term.kind == TermKind::Topic
                    && article
                        .topics
                        .iter()
                        .any(|t| t.trim().to_lowercase() == term.label.to_lowercase());
                let in_title = term.pattern.is_match(&article.title);
                let in_summary = article
                    .summary
                    .as_deref()
                    .is_some_and(|s| term.pattern.is_match(s));

                (tagged || in_title || in_summary).then(|| TermMatch {
                    term: term.label.clone(),
                    kind: term.kind,
                    tagged,
                    in_title,
                    in_summary,
                })
            })
            .collect()
    }
}

/// Rule-based scorer: 40 points for each term found in the title or topic
/// tags, 25 for each term found only in the summary, capped at 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScorer;

const STRONG_MATCH_POINTS: u32 = 40;
const WEAK_MATCH_POINTS: u32 = 25;

impl RelevanceScorer for KeywordScorer {
    fn score(&self, article: &Article, preferences: &RelevancePreferences) -> u8 {
        let matcher = match PreferenceMatcher::new(preferences) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::warn!("Cannot score article {}: {}", article.id, e);
                return 0;
            }
        };

        self.score_matches(article, preferences, &matcher.matches(article))
    }

    fn score_matches(
        &self,
        _article: &Article,
        _preferences: &RelevancePreferences,
        matches: &[TermMatch],
    ) -> u8 {
        let points: u32 = matches
            .iter()
            .map(|m| {
                if m.tagged || m.in_title {
                    STRONG_MATCH_POINTS
                } else {
                    WEAK_MATCH_POINTS
                }
            })
            .sum();

        points.min(100) as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// No topics or keywords configured; everything is let through.
    NoPreferences,
    NoMatch,
    BelowThreshold,
    Relevant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterDecision {
    pub article_id: i64,
    pub included: bool,
    pub reason: DecisionReason,
    pub score: Option<u8>,
    pub matched_terms: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOutcome {
    pub decisions: Vec<FilterDecision>,
    pub included: u32,
    pub filtered_out: u32,
    /// Articles without a summary; not counted in either bucket.
    pub skipped: u32,
}

impl FilterOutcome {
    pub fn processed(&self) -> u32 {
        self.included + self.filtered_out
    }
}

#[derive(Clone)]
pub struct RelevanceFilter {
    repository: Repository,
    recorder: StatisticsRecorder,
    scorer: Arc<dyn RelevanceScorer>,
}

impl RelevanceFilter {
    pub fn new(repository: Repository, recorder: StatisticsRecorder) -> Self {
        Self::with_scorer(repository, recorder, Arc::new(KeywordScorer))
    }

    pub fn with_scorer(
        repository: Repository,
        recorder: StatisticsRecorder,
        scorer: Arc<dyn RelevanceScorer>,
    ) -> Self {
        Self {
            repository,
            recorder,
            scorer,
        }
    }

    /// Decides a single article without touching storage.
    ///
    /// Returns `None` for articles that have no summary yet.
    pub fn evaluate(
        &self,
        article: &Article,
        preferences: &RelevancePreferences,
    ) -> Result<Option<FilterDecision>> {
        let matcher = PreferenceMatcher::new(preferences)?;
        Ok(self.decide(article, preferences, &matcher))
    }

    fn decide(
        &self,
        article: &Article,
        preferences: &RelevancePreferences,
        matcher: &PreferenceMatcher,
    ) -> Option<FilterDecision> {
        if !article.is_processed() {
            return None;
        }

        if !preferences.is_configured() {
            return Some(FilterDecision {
                article_id: article.id,
                included: true,
                reason: DecisionReason::NoPreferences,
                score: None,
                matched_terms: Vec::new(),
            });
        }

        let matches = matcher.matches(article);
        if matches.is_empty() {
            return Some(FilterDecision {
                article_id: article.id,
                included: false,
                reason: DecisionReason::NoMatch,
                score: None,
                matched_terms: Vec::new(),
            });
        }

        let score = self
            .scorer
            .score_matches(article, preferences, &matches)
            .min(100);
        let matched_terms = matches.into_iter().map(|m| m.term).collect();
        let included = score >= preferences.threshold;
        Some(FilterDecision {
            article_id: article.id,
            included,
            reason: if included {
                DecisionReason::Relevant
            } else {
                DecisionReason::BelowThreshold
            },
            score: Some(score),
            matched_terms,
        })
    }

    /// Filters a batch of a user's articles and records one statistics row for it.
    ///
    /// No row is recorded when the batch holds no processed article. An
    /// article from a feed the user does not own fails the whole batch with
    /// `NotFound` before anything is recorded.
    pub async fn filter_articles(
        &self,
        user_id: i64,
        articles: &[Article],
        date: NaiveDate,
    ) -> Result<FilterOutcome> {
        let user = self
            .repository
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user", user_id))?;
        let preferences = &user.preferences;
        preferences.validate()?;

        let owned_feeds: HashSet<i64> = self
            .repository
            .get_feeds_for_user(user_id)
            .await?
            .iter()
            .map(|feed| feed.id)
            .collect();
        if let Some(foreign) = articles.iter().find(|a| !owned_feeds.contains(&a.feed_id)) {
            return Err(AppError::NotFound(format!(
                "article {} for user {}",
                foreign.id, user_id
            )));
        }

        let matcher = PreferenceMatcher::new(preferences)?;

        let mut outcome = FilterOutcome::default();
        for article in articles {
            match self.decide(article, preferences, &matcher) {
                Some(decision) => {
                    if decision.included {
                        outcome.included += 1;
                    } else {
                        outcome.filtered_out += 1;
                    }
                    outcome.decisions.push(decision);
                }
                None => outcome.skipped += 1,
            }
        }

        if outcome.processed() > 0 {
            self.recorder
                .record(user_id, date, outcome.included, outcome.filtered_out)
                .await?;
        }

        tracing::info!(
            user_id,
            %date,
            included = outcome.included,
            filtered_out = outcome.filtered_out,
            skipped = outcome.skipped,
            "Filtered articles"
        );

        Ok(outcome)
    }

    /// Filters the user's processed articles ingested on `date` (UTC).
    pub async fn filter_ingested_on(&self, user_id: i64, date: NaiveDate) -> Result<FilterOutcome> {
        let from = date.and_time(NaiveTime::MIN).and_utc();
        let to = from + Duration::days(1);
        let articles = self
            .repository
            .get_processed_articles_ingested_between(user_id, from, to)
            .await?;
        self.filter_articles(user_id, &articles, date).await
    }
}
