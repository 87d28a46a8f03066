use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "htpack")]
#[command(author, version, about = "Packs static files into a single blob served efficiently over HTTP")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a pack from a YAML manifest or a set of files/directories
    Pack {
        /// Output pack filename
        #[arg(short = 'O', long)]
        out: PathBuf,

        /// YAML manifest (if absent, inputs are packed directly)
        #[arg(short = 'm', long)]
        manifest: Option<PathBuf>,

        /// Change to this directory before resolving input files
        #[arg(short = 'C', long)]
        chdir: Option<PathBuf>,

        /// Files/directories to pack (when no manifest is given)
        inputs: Vec<PathBuf>,
    },

    /// Generate a YAML manifest from files/directories
    Manifest {
        /// Output manifest filename
        #[arg(short = 'O', long)]
        out: PathBuf,

        /// Change to this directory before resolving input files
        #[arg(short = 'C', long)]
        chdir: Option<PathBuf>,

        /// Files/directories to list
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// View the contents of pack files
    Inspect {
        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Pack files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Serve one or more packs over HTTP
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "0.0.0.0:8080")]
        bind: String,

        /// Name of index file (index.html or similar) to alias at
        /// directory paths
        #[arg(long)]
        index_file: Option<String>,

        /// Extra response header; repeatable, in the form Name=value
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// File with one Name=value header per line
        #[arg(long)]
        header_file: Option<PathBuf>,

        /// Client cache lifetime in seconds (0 disables caching)
        #[arg(long, default_value_t = 0)]
        expiry: u64,

        /// Packs to serve, as PACK or /prefix=PACK
        #[arg(required = true)]
        packs: Vec<String>,
    },
}
