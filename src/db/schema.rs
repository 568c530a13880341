pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    tier TEXT NOT NULL DEFAULT 'free',
    topics TEXT NOT NULL DEFAULT '[]',
    keywords TEXT NOT NULL DEFAULT '[]',
    relevance_threshold INTEGER NOT NULL DEFAULT 50
        CHECK (relevance_threshold BETWEEN 0 AND 100),
    created_at TEXT NOT NULL
);

-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, url)
);

CREATE INDEX IF NOT EXISTS idx_feeds_user_id ON feeds(user_id);

-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    url TEXT,
    published_at TEXT,
    summary TEXT,
    topics TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_created ON articles(feed_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);

-- episodes table
CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    script TEXT NOT NULL DEFAULT '',
    audio_url TEXT,
    duration_seconds INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_episodes_user_id ON episodes(user_id, created_at);

-- episode_articles table (an article is linked to an episode at most once)
CREATE TABLE IF NOT EXISTS episode_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    episode_id INTEGER NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    UNIQUE(episode_id, article_id)
);

CREATE INDEX IF NOT EXISTS idx_episode_articles_article_id ON episode_articles(article_id);

-- filtering_statistics table (append-only, summed at read time)
CREATE TABLE IF NOT EXISTS filtering_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    included_articles INTEGER NOT NULL CHECK (included_articles >= 0),
    filtered_out_articles INTEGER NOT NULL CHECK (filtered_out_articles >= 0),
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_filtering_statistics_user_date ON filtering_statistics(user_id, date);
"#;
