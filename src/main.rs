//! Reprise - Spoiler-Safe Recap Generation
//!
//! This is the main entry point for the Reprise application, which turns
//! raw episode subtitles into narrative recaps at episode and season
//! granularity using a locally-hosted language model, with an optional
//! cloud-model polish pass for season recaps.

use anyhow::Result;
use clap::Parser;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use reprise::cli::{Args, Commands};
use reprise::config::Config;
use reprise::library::SqliteLibrary;
use reprise::pipeline::{EpisodeRequest, RecapPipeline, SeasonRequest};
use reprise::store::{EpisodeRecapKey, RecapStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            // Try to load config.toml from current directory first
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    // Open the database and prepare the recap store
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", config.database.path))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;

    let store = RecapStore::new(pool.clone());
    store.init_schema().await?;

    let library = SqliteLibrary::new(pool);
    let pipeline = RecapPipeline::from_config(&config, Box::new(library), store)?;

    // Execute command
    match args.command {
        Commands::Episode {
            show_id,
            season,
            episode,
            cutoff,
            force,
        } => {
            info!("Generating episode recap: {} S{:02}E{:02}", show_id, season, episode);

            let request = EpisodeRequest {
                show_id,
                season_number: season,
                episode_number: episode,
                spoiler_cutoff: cutoff,
                local_model: config.local_model.model.clone(),
                prompt_version: config.pipeline.prompt_version.clone(),
                force,
            };

            match pipeline.generate_episode_recap(&request).await {
                Ok(recap) => println!("{}", recap),
                Err(e) => {
                    eprintln!("Episode recap failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Season {
            show_id,
            season,
            cutoff,
            polish,
            importance,
            freshness,
            force,
        } => {
            info!("Generating season recap: {} season {}", show_id, season);

            let request = SeasonRequest {
                show_id,
                season_number: season,
                spoiler_cutoff: cutoff,
                local_model: config.local_model.model.clone(),
                prompt_version: config.pipeline.prompt_version.clone(),
                polish,
                force,
                user_importance: importance,
                freshness_risk: freshness,
            };

            match pipeline.generate_season_recap(&request).await {
                Ok(recap) => println!("{}", recap),
                Err(e) => {
                    eprintln!("Season recap failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Get {
            show_id,
            season,
            episode,
            cutoff,
        } => match episode {
            Some(episode) => {
                let key = EpisodeRecapKey {
                    show_id,
                    season_number: season,
                    episode_number: episode,
                    spoiler_cutoff: cutoff,
                    local_model: config.local_model.model.clone(),
                    prompt_version: config.pipeline.prompt_version.clone(),
                };
                match pipeline.get_episode_recap(&key).await? {
                    Some(record) => match record.summary_text {
                        Some(text) => println!("{}", text),
                        None => println!(
                            "No recap text cached (status: {:?}, error: {})",
                            record.status,
                            record.error_message.as_deref().unwrap_or("none")
                        ),
                    },
                    None => println!("No cached recap found."),
                }
            }
            None => {
                match pipeline
                    .get_season_recap(
                        &show_id,
                        season,
                        cutoff,
                        &config.local_model.model,
                        &config.pipeline.prompt_version,
                    )
                    .await?
                {
                    Some(record) => match record.display_text() {
                        Some(text) => println!("{}", text),
                        None => println!(
                            "No recap text cached (status: {:?}, error: {})",
                            record.status,
                            record.error_message.as_deref().unwrap_or("none")
                        ),
                    },
                    None => println!("No cached recap found."),
                }
            }
        },
        Commands::Status { show_id } => {
            let status = pipeline.pipeline_status(show_id.as_deref()).await?;

            println!("\nRecap Pipeline Status:");
            println!("{:<12} {:>8} {:>11} {:>10} {:>7}", "", "Pending", "Generating", "Completed", "Failed");
            println!("{}", "-".repeat(52));
            println!(
                "{:<12} {:>8} {:>11} {:>10} {:>7}",
                "Episodes",
                status.episodes.pending,
                status.episodes.generating,
                status.episodes.completed,
                status.episodes.failed
            );
            println!(
                "{:<12} {:>8} {:>11} {:>10} {:>7}",
                "Seasons",
                status.seasons.pending,
                status.seasons.generating,
                status.seasons.completed,
                status.seasons.failed
            );
        }
    }

    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let reprise_dir = std::env::current_dir()?.join(".reprise");
    let log_dir = reprise_dir.join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "reprise.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    // Determine log level
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Create console layer
    let console_layer = fmt::layer().with_target(false);

    // Create file layer
    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_ansi(false); // No ANSI colors in file

    // Setup layered subscriber
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer);

    // Initialize the subscriber
    subscriber
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
