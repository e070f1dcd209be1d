use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::engine::FusionPolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the search service.
    Serve {
        /// Listen address, overrides `bind` from config.yaml
        #[clap(short, long)]
        bind: Option<String>,

        /// Fusion policy (none, sum, min, max, product, weighted),
        /// overrides `fusion` from config.yaml
        #[clap(short, long)]
        fusion: Option<FusionPolicy>,
    },

    /// Run a single search and print the ranked ids as JSON
    Search {
        /// Text query. With --temporal, two clauses separated by '>'
        #[clap(required_unless_present = "image")]
        query: Option<String>,

        /// Treat the query as "first > then"
        #[clap(short, long, default_value = "false")]
        temporal: bool,

        /// Search with a corpus item instead of text
        #[clap(short, long, conflicts_with_all = ["query", "temporal"])]
        image: Option<usize>,
    },

    /// Encode a directory of images into corpus vector files
    Encode {
        /// Directory with jpg/png/webp/bmp images
        images: PathBuf,

        /// Output directory, defaults to `corpus_dir` from config.yaml
        #[clap(short, long)]
        out: Option<PathBuf>,
    },

    /// Replay a text query log under every fusion policy
    Replay {
        /// Query log to replay (log.csv)
        log: PathBuf,

        /// Consecutive queries of one search that are fused
        #[clap(short, long, default_value = "2")]
        reform_count: usize,

        /// Output directory for the per-policy rank files
        #[clap(short, long, default_value = ".")]
        out: PathBuf,

        /// Also rank each second query over only the top 25/50/75% of the
        /// first query's order
        #[clap(short, long, default_value = "false")]
        limited: bool,
    },
}
