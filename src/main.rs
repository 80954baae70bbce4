use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveTime, TimeZone};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;

use podsync::config::Config;
use podsync::feed::{self, ImportFormat};
use podsync::storage::{
    Database, Episode, FeedQuery, FeedSort, FeedSummary, FeedUpdate, ItemQuery, ItemSort,
    SortOrder,
};
use podsync::sync::{self, SyncResult};
use podsync::util::{format_seconds, parse_since, time_relative_to, wrap_lines};

const DESCRIPTION_WIDTH: usize = 70;
const INDENT: &str = "         ";

/// Get the config directory path (~/.config/podsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("podsync"))
}

#[derive(Parser, Debug)]
#[command(name = "podsync", version, about = "Podcast subscription manager")]
struct Args {
    /// Config file (defaults to ~/.config/podsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed
    Add { url: String },

    /// Unsubscribe from a feed
    #[command(alias = "rm")]
    Remove {
        name: String,
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },

    /// Edit feed details
    Update {
        name: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        link: Option<String>,
        #[arg(long)]
        image: Option<String>,
    },

    /// Check for new episodes
    Sync { name: Option<String> },

    /// List feeds
    Feeds {
        #[arg(long, value_enum, default_value_t = FeedSort::Title)]
        sort: FeedSort,
        #[arg(long, value_enum)]
        order: Option<SortOrder>,
        /// Maximum number of feeds to show
        #[arg(short = 'n', long)]
        limit: Option<i64>,
        /// Only feeds whose title contains this
        #[arg(long)]
        title: Option<String>,
        /// Only feeds whose author contains this
        #[arg(long)]
        author: Option<String>,
        /// Show feed descriptions
        #[arg(short = 'd', long)]
        show_description: bool,
    },

    /// List episodes
    #[command(alias = "ls")]
    List {
        /// Only episodes of this feed
        name: Option<String>,
        #[arg(long, value_enum, default_value_t = ItemSort::Pubdate)]
        sort: ItemSort,
        #[arg(long, value_enum)]
        order: Option<SortOrder>,
        /// Maximum number of episodes to show
        #[arg(short = 'n', long)]
        limit: Option<i64>,
        /// Only episodes released on or after this date (today, 3d, 2m, 1y, mon, jan, ...)
        #[arg(short = 'T', long)]
        since: Option<String>,
        /// Only unplayed episodes
        #[arg(short = 'u', long)]
        unplayed: bool,
        /// Only episodes whose title contains this
        #[arg(long)]
        title: Option<String>,
        /// Show episode descriptions
        #[arg(short = 'd', long)]
        show_description: bool,
    },

    /// Mark episodes as played, by download URL
    Mark {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Mark episodes as unplayed, by download URL
    Unmark {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Subscribe to every feed in a file
    Import {
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = ImportFormat::List)]
        format: ImportFormat,
    },

    /// Write subscribed feed URLs to a file, one per line
    Export { file: PathBuf },

    /// Wipe all stored feeds and episodes
    Reset {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db_path = config.database_path(&config_dir);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory '{}'", parent.display())
            })?;
        }
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .context("Failed to open database")?;

    run(args.command, &db, &config).await
}

async fn run(command: Command, db: &Database, config: &Config) -> Result<()> {
    match command {
        Command::Add { url } => {
            let url = podsync::util::validate_feed_url(&url).context("Invalid feed URL")?;
            let client = feed::build_client(config.timeout())?;
            let synced = sync::subscribe(db, &client, &url)
                .await
                .context("Could not add feed")?;
            println!("Added {} - {} items", synced.title, synced.items);
        }

        Command::Remove { name, yes } => {
            let id = sync::resolve_feed(db, &name).await?;
            if !yes {
                anyhow::bail!("Refusing to remove feed {} without --yes", id);
            }
            let items = sync::remove_feed(db, id).await?;
            println!("Removed feed and {} items", items);
        }

        Command::Update {
            name,
            title,
            author,
            description,
            link,
            image,
        } => {
            let update = FeedUpdate {
                title: non_blank(title),
                author: non_blank(author),
                description: non_blank(description),
                link: non_blank(link),
                image: non_blank(image),
                url: None,
            };
            if update.is_empty() {
                anyhow::bail!("No values to update");
            }
            let id = sync::resolve_feed(db, &name).await?;
            db.update_feed(id, &update).await?;
            println!("Feed updated");
        }

        Command::Sync { name } => {
            let client = feed::build_client(config.timeout())?;
            match name {
                Some(name) => {
                    let id = sync::resolve_feed(db, &name).await?;
                    let synced = sync::sync_one(db, &client, id).await?;
                    println!("{}: {}", synced.title, count_label(synced.items, "new item"));
                }
                None => {
                    let (tx, handle) = progress_reporter("Syncing");
                    let results = sync::sync_all(db, &client, config.workers(), Some(tx)).await;
                    finish_progress(handle).await;
                    print_sync_results(&results?);
                }
            }
        }

        Command::Feeds {
            sort,
            order,
            limit,
            title,
            author,
            show_description,
        } => {
            let query = FeedQuery {
                title,
                author,
                sort,
                order,
                limit,
            };
            let feeds = db.list_feeds(&query).await?;
            print_feeds(&feeds, show_description, Local::now().date_naive());
        }

        Command::List {
            name,
            sort,
            order,
            limit,
            since,
            unplayed,
            title,
            show_description,
        } => {
            let today = Local::now().date_naive();
            let since = since
                .map(|s| parse_since(&s, today).map(start_of_day))
                .transpose()?;
            let feed_id = match name {
                Some(name) => Some(sync::resolve_feed(db, &name).await?),
                None => None,
            };

            let query = ItemQuery {
                title,
                feed_id,
                unplayed_only: unplayed,
                since,
                sort,
                order,
                limit,
            };
            let items = db.list_items(&query).await?;
            print_items(&items, feed_id.is_some(), show_description, today);
        }

        Command::Mark { urls } => {
            let changed = db.set_played(true, &urls).await?;
            println!("Marked {} as played", count_label(changed as usize, "item"));
        }

        Command::Unmark { urls } => {
            let changed = db.set_played(false, &urls).await?;
            println!("Marked {} as unplayed", count_label(changed as usize, "item"));
        }

        Command::Import { file, format } => {
            let urls = feed::read_subscriptions(&file, format)
                .await
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            if urls.is_empty() {
                println!("No feed URLs found in {}", file.display());
                return Ok(());
            }

            let client = feed::build_client(config.timeout())?;
            let (tx, handle) = progress_reporter("Fetching");
            let results = sync::subscribe_many(db, &client, &urls, config.workers(), Some(tx)).await;
            finish_progress(handle).await;
            print_import_results(&results);
        }

        Command::Export { file } => {
            let urls = db.feed_urls().await?;
            feed::export_to_file(&urls, &file)?;
            println!("Exported {} to {}", count_label(urls.len(), "feed"), file.display());
        }

        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("Refusing to wipe all data without --yes");
            }
            db.reset().await?;
            println!("All feeds and episodes removed");
        }
    }

    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn start_of_day(date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.timestamp())
        .unwrap_or_else(|| midnight.and_utc().timestamp())
}

fn local_date(timestamp: i64) -> Option<NaiveDate> {
    Local
        .timestamp_opt(timestamp, 0)
        .single()
        .map(|dt| dt.date_naive())
}

fn count_label(n: usize, noun: &str) -> String {
    match n {
        0 => format!("No {noun}s"),
        1 => format!("1 {noun}"),
        _ => format!("{n} {noun}s"),
    }
}

/// Print `(done, total)` updates on one carriage-returned line until the
/// sender is dropped.
fn progress_reporter(
    label: &'static str,
) -> (mpsc::Sender<(usize, usize)>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<(usize, usize)>(32);
    let handle = tokio::spawn(async move {
        let mut shown = false;
        while let Some((done, total)) = rx.recv().await {
            eprint!("\r{label} {done} of {total} feeds");
            shown = true;
        }
        if shown {
            eprintln!();
        }
    });
    (tx, handle)
}

/// Wait for the progress line to be flushed.
async fn finish_progress(handle: tokio::task::JoinHandle<()>) {
    if let Err(e) = handle.await {
        tracing::debug!(error = %e, "Progress reporter stopped abnormally");
    }
}

fn print_sync_results(results: &[SyncResult]) {
    let items: usize = results.iter().filter_map(|r| r.result.as_ref().ok()).sum();
    let errors: Vec<&SyncResult> = results.iter().filter(|r| !r.is_ok()).collect();

    let mut summary = count_label(items, "new item");
    match errors.len() {
        0 => {}
        1 => summary.push_str(", 1 error"),
        n => summary.push_str(&format!(", {n} errors")),
    }
    println!("{summary}");

    for (i, res) in errors.iter().enumerate() {
        if let Err(e) = &res.result {
            println!("{} {} {}", i + 1, res.label(), e);
        }
    }
}

fn print_import_results(results: &[SyncResult]) {
    let added = results.iter().filter(|r| r.is_ok()).count();
    println!(
        "Added {} of {} feeds, {} errors",
        added,
        results.len(),
        results.len() - added
    );

    for res in results {
        if let Err(e) = &res.result {
            println!("{}: {}", res.url, e);
        }
    }
}

fn print_feeds(feeds: &[FeedSummary], show_description: bool, today: NaiveDate) {
    if feeds.is_empty() {
        println!("No feeds found");
        return;
    }

    println!(
        "Showing {} feed{}:",
        feeds.len(),
        if feeds.len() == 1 { "" } else { "s" }
    );

    for (i, feed) in feeds.iter().enumerate() {
        println!();
        println!("{:>7}. {}", i + 1, feed.title);
        println!("{INDENT}{}", feed.author);
        if show_description {
            for line in wrap_lines(feed.description.as_deref().unwrap_or(""), DESCRIPTION_WIDTH) {
                println!("{INDENT}{line}");
            }
        }

        let mut stats = count_label(feed.item_count as usize, "item");
        if feed.unplayed_count > 0 {
            stats.push_str(&format!(", {} unplayed", feed.unplayed_count));
        }
        if let Some(date) = feed.last_pubdate.and_then(local_date) {
            stats.push_str(&format!(" (updated {})", time_relative_to(today, date)));
        }
        println!("{INDENT}{stats}");
    }
}

fn print_items(items: &[Episode], single_feed: bool, show_description: bool, today: NaiveDate) {
    if items.is_empty() {
        println!("No items found");
        return;
    }

    println!(
        "Showing {} item{}:",
        items.len(),
        if items.len() == 1 { "" } else { "s" }
    );

    for (i, item) in items.iter().enumerate() {
        println!();
        let marker = if item.unplayed {
            format!("* {}", i + 1)
        } else {
            (i + 1).to_string()
        };
        println!("{:>7}. {}", marker, item.title);

        let released = match item.pubdate.and_then(local_date) {
            Some(date) => time_relative_to(today, date),
            None => "Date unknown".to_string(),
        };
        if single_feed {
            println!("{INDENT}Released {released}");
        } else {
            println!("{INDENT}From {}, {released}", item.feed_title);
        }

        if show_description {
            for line in wrap_lines(item.description.as_deref().unwrap_or(""), DESCRIPTION_WIDTH) {
                println!("{INDENT}{line}");
            }
        }

        let duration = if item.duration > 0 {
            format_seconds(item.duration)
        } else {
            "Unknown".to_string()
        };
        println!("{INDENT}Duration: {duration}");
        println!("{INDENT}{}", item.url);
    }
}
