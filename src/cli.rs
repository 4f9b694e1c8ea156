use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a recap for one episode
    Episode {
        /// Show identifier
        #[arg(short, long)]
        show_id: String,

        /// Season number
        #[arg(long)]
        season: u32,

        /// Episode number
        #[arg(short, long)]
        episode: u32,

        /// Highest episode the recap may reference (0 = no cutoff)
        #[arg(long, default_value = "0")]
        cutoff: u32,

        /// Regenerate even if a cached recap exists
        #[arg(short, long)]
        force: bool,
    },

    /// Generate a recap for a whole season
    Season {
        /// Show identifier
        #[arg(short, long)]
        show_id: String,

        /// Season number
        #[arg(long)]
        season: u32,

        /// Highest episode the recap may reference (0 = no cutoff)
        #[arg(long, default_value = "0")]
        cutoff: u32,

        /// Allow escalation to a cloud model for a prose polish pass
        #[arg(short, long)]
        polish: bool,

        /// User importance for the escalation rubric (0-3)
        #[arg(long, default_value = "0")]
        importance: u8,

        /// Freshness risk for the escalation rubric (0-2)
        #[arg(long, default_value = "0")]
        freshness: u8,

        /// Regenerate even if a cached recap exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a cached recap without generating anything
    Get {
        /// Show identifier
        #[arg(short, long)]
        show_id: String,

        /// Season number
        #[arg(long)]
        season: u32,

        /// Episode number; omit to fetch the season recap
        #[arg(short, long)]
        episode: Option<u32>,

        /// Spoiler cutoff the recap was generated under (0 = no cutoff)
        #[arg(long, default_value = "0")]
        cutoff: u32,
    },

    /// Show recap pipeline status counts
    Status {
        /// Limit counts to one show
        #[arg(short, long)]
        show_id: Option<String>,
    },
}
