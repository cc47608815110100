//! # Kiln CLI Module
//!
//! This module implements the CLI interface for Kiln.
//!
//! ## Available Commands
//!
//! - `seed` - Store a graph built from a TOML listing
//! - `status` - Show a stored graph (or list stored projects)
//! - `build` - Run one build pass and save the result
//! - `touch` - Add a source file
//! - `untag` - Drop a tag from a file
//! - `remove` - Delete a source file
//! - `set` - Change a product property
//! - `export` - Write a graph in the binary persistence format

mod commands;

use crate::config::KilnConfig;
use clap::{Parser, Subcommand};
use kiln_core::KilnError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Kiln - incremental rule re-evaluation engine
///
/// Keeps a persistent build graph per project and re-applies only the rules
/// whose inputs or configuration changed.
#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the configuration file [default: ./kiln.toml if present]
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the graph database (overrides `[storage] database`)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a graph from a listing and store it
    Seed {
        /// Path to the TOML listing
        #[arg(short, long)]
        file: PathBuf,

        /// Store under this name instead of the listed project name
        #[arg(short, long)]
        project: Option<String>,

        /// Replace an existing graph
        #[arg(long)]
        force: bool,
    },

    /// Show a stored graph, or list stored projects
    Status {
        /// Project name
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Run one build pass
    Build {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// Changed files as PRODUCT:PATH (repeatable)
        #[arg(long = "changed")]
        changed: Vec<String>,
    },

    /// Add a source file to a product
    Touch {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// File as PRODUCT:PATH
        file: String,

        /// Comma separated file tags
        #[arg(short, long, default_value = "")]
        tags: String,
    },

    /// Remove a tag from a file
    Untag {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// File as PRODUCT:PATH
        file: String,

        /// Tag to remove
        #[arg(short, long)]
        tag: String,
    },

    /// Delete a source file from a product
    Remove {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// File as PRODUCT:PATH
        file: String,
    },

    /// Set a product property
    Set {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// Product name
        #[arg(long)]
        product: String,

        /// Property as KEY=VALUE
        property: String,
    },

    /// Export a graph in the binary persistence format
    Export {
        /// Project name
        #[arg(short, long)]
        project: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli, config: &KilnConfig) -> Result<(), KilnError> {
    let database = cli
        .database
        .unwrap_or_else(|| config.storage.database.clone());
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Seed {
            file,
            project,
            force,
        }) => cmd_seed(&database, json_mode, &file, project.as_deref(), force),
        Some(Commands::Status { project }) => {
            cmd_status(&database, json_mode, project.as_deref())
        }
        Some(Commands::Build { project, changed }) => {
            cmd_build(&database, json_mode, &project, &changed)
        }
        Some(Commands::Touch {
            project,
            file,
            tags,
        }) => cmd_touch(&database, json_mode, &project, &file, &tags),
        Some(Commands::Untag { project, file, tag }) => {
            cmd_untag(&database, json_mode, &project, &file, &tag)
        }
        Some(Commands::Remove { project, file }) => {
            cmd_remove(&database, json_mode, &project, &file)
        }
        Some(Commands::Set {
            project,
            product,
            property,
        }) => cmd_set(&database, json_mode, &project, &product, &property),
        Some(Commands::Export { project, output }) => cmd_export(&database, &project, &output),
        None => {
            // No subcommand - list stored projects
            cmd_status(&database, json_mode, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_build_with_changed_files() {
        let cli = Cli::try_parse_from([
            "kiln", "--json-mode", "build", "-p", "demo", "--changed", "app:main.c", "--changed",
            "lib:lib.c",
        ])
        .expect("parse");

        assert!(cli.json_mode);
        match cli.command {
            Some(Commands::Build { project, changed }) => {
                assert_eq!(project, "demo");
                assert_eq!(changed, vec!["app:main.c", "lib:lib.c"]);
            }
            other => unreachable!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn database_flag_is_global() {
        let cli = Cli::try_parse_from(["kiln", "status", "-D", "/tmp/other.redb"]).expect("parse");
        assert_eq!(cli.database, Some(PathBuf::from("/tmp/other.redb")));
    }

    #[test]
    fn touch_requires_project() {
        assert!(Cli::try_parse_from(["kiln", "touch", "app:main.c"]).is_err());
    }
}
