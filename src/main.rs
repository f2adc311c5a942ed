use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use vane::app::{App, FeedAction, Target};
use vane::config::Config;
use vane::drawer;
use vane::storage::{Database, DatabaseError};

/// Get the config directory path (~/.config/vane/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("vane"))
}

/// A mark-read target spelled on the command line: `all`, `feed:ID`,
/// `group:ID` or `entry:ID`.
fn parse_target(s: &str) -> Result<Target, String> {
    if s == "all" {
        return Ok(Target::All);
    }
    let (kind, id) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid target '{}': expected all, feed:ID, group:ID or entry:ID", s))?;
    let id: i64 = id
        .parse()
        .map_err(|_| format!("Invalid id in target '{}'", s))?;
    match kind {
        "feed" => Ok(Target::Feed(id)),
        "group" => Ok(Target::Group(id)),
        "entry" => Ok(Target::Entry(id)),
        _ => Err(format!("Unknown target kind '{}'", kind)),
    }
}

#[derive(Parser, Debug)]
#[command(name = "vane", about = "Feed-list manager with drawer projection and OPML interchange")]
struct Args {
    /// Database path (defaults to ~/.config/vane/vane.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Config file path (defaults to ~/.config/vane/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Import an OPML file into the feed list
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Export the feed list as OPML
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Print the drawer tree with unread counts
    #[arg(long)]
    list: bool,

    /// Mark entries as read: all, feed:ID, group:ID or entry:ID
    #[arg(long, value_name = "TARGET", value_parser = parse_target)]
    mark_read: Option<Target>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)?;

    let db_path = args.db.unwrap_or_else(|| config_dir.join("vane.db"));
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of vane appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let (app, mut status_rx) = App::new(db, config.clone()).await?;

    if let Some(target) = args.mark_read {
        app.dispatch(FeedAction::MarkRead(target)).await?;
    }

    if let Some(path) = &args.import {
        app.import_opml(path).await;
    }

    if let Some(path) = &args.export {
        app.export_opml(path).await;
    }

    // Relay whatever the operations reported
    while let Ok(message) = status_rx.try_recv() {
        println!("{}", message);
    }

    if args.list || (args.import.is_none() && args.export.is_none() && args.mark_read.is_none()) {
        // The import above already landed in the store, but the drawer pump
        // republishes asynchronously; project directly for a fresh snapshot.
        let feeds = app.database().feeds_with_counts().await?;
        let groups = drawer::project(&feeds, &config.all_entries_label);

        for group in groups.iter() {
            let parent = &group.feed_with_count;
            let marker = if parent.feed.fetch_error { " [!]" } else { "" };
            println!("{} ({}){}", parent.feed.title, parent.entry_count, marker);
            for sub in &group.sub_feeds {
                let marker = if sub.feed.fetch_error { " [!]" } else { "" };
                println!("  {} ({}){}", sub.feed.title, sub.entry_count, marker);
            }
        }
        if drawer::has_fetch_error(&groups) {
            eprintln!("Some feeds failed to refresh.");
        }
    }

    Ok(())
}
