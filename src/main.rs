use chrono::{NaiveDate, Utc};

use news_curator::app::App;
use news_curator::config::Config;
use news_curator::error::Result;
use news_curator::models::DateRange;

const USAGE: &str = "usage: news-curator --backfill
       news-curator --curate-episode <episode_id>
       news-curator --filter <user_id> [YYYY-MM-DD]
       news-curator --stats <user_id> <from YYYY-MM-DD> <to YYYY-MM-DD>";

#[tokio::main]
async fn main() -> Result<()> {
    // Batch runs log their outcomes at info level unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);

    // Load configuration
    let config = Config::load()?;

    // Open the store and wire the pipeline
    let app = App::new(&config).await?;

    // Headless commands
    match command {
        Some("--backfill") => {
            let report = app.backfill().await?;
            println!(
                "Backfilled {} episodes, repaired {}, created {} links",
                report.episodes.len(),
                report.repaired(),
                report.links_created()
            );
        }

        Some("--curate-episode") => {
            let episode_id = parse_id(args.get(2), "episode_id")?;
            let report = app.curate_episode(episode_id).await?;
            println!(
                "Episode {}: linked {} of {} selected articles",
                report.episode_id, report.linked, report.requested
            );
        }

        Some("--filter") => {
            let user_id = parse_id(args.get(2), "user_id")?;
            // Default to today's ingestion batch
            let date = match args.get(3) {
                Some(raw) => parse_date(raw)?,
                None => Utc::now().date_naive(),
            };
            let outcome = app.filter_ingested_on(user_id, date).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Some("--stats") => {
            let user_id = parse_id(args.get(2), "user_id")?;
            let (Some(from), Some(to)) = (args.get(3), args.get(4)) else {
                return Err(anyhow::anyhow!("{}", USAGE).into());
            };
            let range = DateRange::new(parse_date(from)?, parse_date(to)?)?;
            // Totals plus the per-day breakdown in one document
            let summary = app.statistics(user_id, range).await?;
            let daily = app.daily_statistics(user_id, range).await?;
            let body = serde_json::json!({ "summary": summary, "daily": daily });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }

        _ => return Err(anyhow::anyhow!("{}", USAGE).into()),
    }

    Ok(())
}

fn parse_id(raw: Option<&String>, name: &str) -> Result<i64> {
    let raw = raw.ok_or_else(|| anyhow::anyhow!("missing <{}>\n{}", name, USAGE))?;
    let id = raw
        .parse::<i64>()
        .map_err(|e| anyhow::anyhow!("invalid <{}> '{}': {}", name, raw, e))?;
    Ok(id)
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", raw, e))?;
    Ok(date)
}
