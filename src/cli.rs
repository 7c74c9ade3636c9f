// src/cli.rs

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vulnhub", version, about = "Local NVD vulnerability database")]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
	/// Display stats on vulnerable products
	Stats {
		/// Top vendors by CPE entry count
		#[arg(long)]
		vendor: bool,
		/// Top products by CPE entry count
		#[arg(long)]
		product: bool,
	},
	/// Search the database by CPE URI, CVE identifier or year
	Search {
		/// Search by CPE URI
		#[arg(short, long)]
		cpe: bool,
		/// Search by CVE identifier
		#[arg(short = 'v', long)]
		cve: bool,
		/// Search by year
		#[arg(short, long)]
		year: bool,
		/// Emit results as JSON
		#[arg(short, long)]
		json: bool,
		/// Limit search results (default 5)
		#[arg(short, long)]
		limit: Option<usize>,
		/// Return all results without the default limit
		#[arg(long, conflicts_with = "limit")]
		no_limit: bool,
		search_term: String,
	},
	/// Populate the local copy of the NVD database
	Populate {
		/// Load the CPE dictionary (full replace)
		#[arg(short, long)]
		cpe: bool,
		/// Load the CVE feed (upsert)
		#[arg(short = 'v', long)]
		cve: bool,
		/// Load both dictionaries
		#[arg(short, long)]
		all: bool,
	},
	/// Merge recently modified records into the store
	Update {
		/// Update the CVE dictionary
		#[arg(short = 'v', long)]
		cve: bool,
	},
	/// Manage the on-disk configuration
	Config {
		/// Write a fresh default configuration
		#[arg(long)]
		generate: bool,
		/// Set the database driver name
		#[arg(long)]
		driver: Option<String>,
	},
	/// Initialize the database and create tables
	Dbinit {
		/// Drop tables without asking for confirmation
		#[arg(long)]
		no_confirm: bool,
		/// Reset only the CPE table
		#[arg(short, long)]
		cpe: bool,
		/// Reset only the CVE table
		#[arg(short = 'v', long)]
		cve: bool,
		/// Reset everything
		#[arg(short, long)]
		all: bool,
	},
}

impl Command {
	/// Effective search limit: explicit flag wins, `--no-limit` removes
	/// the cap, otherwise 5.
	pub fn effective_limit(limit: Option<usize>, no_limit: bool) -> Option<usize> {
		if no_limit {
			None
		} else {
			Some(limit.unwrap_or(5))
		}
	}
}
