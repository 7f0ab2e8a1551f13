use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::feedback::{MAX_RATING, MIN_RATING};
use crate::submission::SubmissionRequest;
use crate::task::TaskId;

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

/// Video to dub: exactly one of a local MP4 file or a YouTube URL
#[derive(ClapArgs, Debug, Clone)]
pub struct SourceArgs {
    /// Local MP4 file to upload
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// YouTube URL to process
    #[arg(short, long)]
    pub url: Option<String>,
}

impl From<SourceArgs> for SubmissionRequest {
    fn from(args: SourceArgs) -> Self {
        SubmissionRequest {
            file: args.file,
            url: args.url,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a video, follow it to completion, download the result
    Process {
        #[command(flatten)]
        source: SourceArgs,

        /// Directory for the dubbed video
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only print the download URL when done
        #[arg(long)]
        no_download: bool,

        /// Rate the result (1-5) once it is ready
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(MIN_RATING as i64..=MAX_RATING as i64))]
        rating: Option<u8>,

        /// Comment sent with the rating
        #[arg(long, requires = "rating")]
        comment: Option<String>,
    },

    /// Submit a video and print the task id
    Submit {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show the current status of a task
    Status {
        /// Task id returned on submission
        task_id: TaskId,
    },

    /// Follow an existing task until it finishes
    Watch {
        /// Task id returned on submission
        task_id: TaskId,

        /// Directory for the dubbed video
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Only print the download URL when done
        #[arg(long)]
        no_download: bool,
    },

    /// Download the dubbed video of a finished task
    Download {
        /// Task id returned on submission
        task_id: TaskId,

        /// Directory for the dubbed video
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Rate the result of a finished task
    Feedback {
        /// Task id returned on submission
        task_id: TaskId,

        /// Rating from 1 to 5
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(MIN_RATING as i64..=MAX_RATING as i64))]
        rating: u8,

        /// Optional free-text comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write a default configuration file
    Init {
        /// Where to write it
        #[arg(default_value = "onevoice.toml")]
        path: PathBuf,
    },
}
