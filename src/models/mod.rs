mod article;
mod episode;
mod feed;
mod statistics;
mod user;

pub use article::{Article, NewArticle};
pub use episode::{Episode, NewEpisode};
pub use feed::{Feed, NewFeed};
pub use statistics::{DailyStatistics, DateRange, FilteringStatistics, StatisticsSummary};
pub use user::{NewUser, RelevancePreferences, SubscriptionTier, User};
