use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            other => Err(AppError::Validation(format!(
                "unknown subscription tier '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevancePreferences {
    #[serde(default)]
    pub topics: BTreeSet<String>,
    /// Kept in the order the user entered them.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: u8,
}

fn default_threshold() -> u8 {
    50
}

impl Default for RelevancePreferences {
    fn default() -> Self {
        Self {
            topics: BTreeSet::new(),
            keywords: Vec::new(),
            threshold: default_threshold(),
        }
    }
}

impl RelevancePreferences {
    /// A user without any topic or keyword gets every processed article.
    pub fn is_configured(&self) -> bool {
        self.topics.iter().any(|t| !t.trim().is_empty())
            || self.keywords.iter().any(|k| !k.trim().is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold > 100 {
            return Err(AppError::Validation(format!(
                "relevance threshold {} is outside 0..=100",
                self.threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub tier: SubscriptionTier,
    pub preferences: RelevancePreferences,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub tier: SubscriptionTier,
    pub preferences: RelevancePreferences,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_preferences_are_not_configured() {
        let prefs = RelevancePreferences {
            topics: BTreeSet::from(["  ".to_string()]),
            keywords: vec![String::new()],
            threshold: 80,
        };
        assert!(!prefs.is_configured());
        assert!(!RelevancePreferences::default().is_configured());
    }

    #[test]
    fn keyword_alone_counts_as_configured() {
        let prefs = RelevancePreferences {
            keywords: vec!["rust".to_string()],
            ..Default::default()
        };
        assert!(prefs.is_configured());
    }

    #[test]
    fn threshold_above_hundred_is_rejected() {
        let prefs = RelevancePreferences {
            threshold: 101,
            ..Default::default()
        };
        assert!(matches!(prefs.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn tier_parses_from_storage_form() {
        assert_eq!("premium".parse::<SubscriptionTier>().unwrap(), SubscriptionTier::Premium);
        assert!("gold".parse::<SubscriptionTier>().is_err());
    }
}
