use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start petmatch as a service.
    Daemon {},

    /// Register an animal. Its photo is embedded right away.
    Add {
        /// Animal name
        #[clap(short, long)]
        name: Option<String>,

        /// Species (dog, cat, ...)
        #[clap(short, long)]
        species: Option<String>,

        /// Photo file to upload
        #[clap(short, long, conflicts_with = "photo_ref")]
        photo: Option<PathBuf>,

        /// Reference to an already stored photo (download url or storage path)
        #[clap(long)]
        photo_ref: Option<String>,

        /// Extra field, as key=value. Values are parsed as JSON when possible.
        #[clap(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },

    /// Find animals that look like the given photo
    Search {
        /// Query photo
        image: PathBuf,

        /// Maximum number of matches
        #[clap(short, long)]
        limit: Option<usize>,
    },

    /// Generate the vector for one animal
    Ingest {
        /// Animal id
        id: String,
    },

    /// Generate vectors for every animal that does not have one yet
    Backfill {},
}
