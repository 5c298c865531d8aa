use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

mod handlers;

pub use handlers::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Metadata filters. Ranges are inclusive.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Taken (or uploaded, see --by-upload) on or after, YYYY-MM-DD
    #[clap(long)]
    pub from: Option<chrono::NaiveDate>,

    /// Taken (or uploaded) on or before, YYYY-MM-DD
    #[clap(long)]
    pub to: Option<chrono::NaiveDate>,

    /// Apply --from/--to to the upload date instead of the capture date
    #[clap(long, default_value = "false")]
    pub by_upload: bool,

    /// Camera make, case insensitive
    #[clap(long)]
    pub make: Option<String>,

    /// Camera model, case insensitive
    #[clap(long)]
    pub model: Option<String>,

    /// Match --make/--model as a prefix
    #[clap(long, default_value = "false")]
    pub prefix: bool,

    #[clap(long)]
    pub iso_min: Option<u32>,
    #[clap(long)]
    pub iso_max: Option<u32>,

    #[clap(long)]
    pub aperture_min: Option<f32>,
    #[clap(long)]
    pub aperture_max: Option<f32>,

    #[clap(long)]
    pub focal_min: Option<f32>,
    #[clap(long)]
    pub focal_max: Option<f32>,

    #[clap(long)]
    pub width_min: Option<u32>,
    #[clap(long)]
    pub width_max: Option<u32>,

    #[clap(long)]
    pub height_min: Option<u32>,
    #[clap(long)]
    pub height_max: Option<u32>,

    /// Comma separated formats, e.g. "jpeg,png"
    #[clap(long)]
    pub formats: Option<String>,

    /// Comma separated labels, all must be present
    #[clap(short = 'g', long, allow_hyphen_values = true)]
    pub labels: Option<String>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ScoringArgs {
    #[clap(long)]
    pub ai_weight: Option<f32>,

    #[clap(long)]
    pub manual_weight: Option<f32>,

    #[clap(long)]
    pub ocr_weight: Option<f32>,

    /// Minimum score a result needs, 0.0 - 1.0
    #[clap(short, long)]
    pub threshold: Option<f32>,

    /// Max number of results
    #[clap(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the http api.
    Daemon {},

    /// Add images
    Add {
        /// Image files
        #[clap(required = true)]
        files: Vec<PathBuf>,

        /// Comma separated labels for every image
        #[clap(short = 'g', long)]
        labels: Option<String>,
    },

    /// Search images by text and metadata
    Search {
        /// Free text query. Without it, filtered images are listed newest first
        query: Option<String>,

        #[clap(flatten)]
        filters: FilterArgs,

        #[clap(flatten)]
        scoring: ScoringArgs,

        /// Print the count
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },

    /// Show one image
    Show { id: u64 },

    /// List images, newest first
    List {
        #[clap(short = 'n', long)]
        limit: Option<usize>,

        #[clap(long, default_value = "0")]
        offset: usize,
    },

    /// Images with captions similar to this one
    Similar {
        id: u64,

        #[clap(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Change manual labels
    Label {
        id: u64,

        /// Replace labels
        #[clap(long)]
        set: Option<String>,

        /// Append labels
        #[clap(short = 'a', long)]
        append: Option<String>,

        /// Remove labels
        #[clap(short = 'r', long)]
        remove: Option<String>,
    },

    /// Re-run captioning, OCR and embedding
    Reprocess {
        #[clap(required = true)]
        ids: Vec<u64>,
    },

    /// Delete images and their files
    Delete {
        #[clap(required = true)]
        ids: Vec<u64>,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Collection statistics
    Stats {},

    /// Recently uploaded images
    Recent {
        #[clap(short, long, default_value = "7")]
        days: u32,
    },
}
