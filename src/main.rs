// src/main.rs

mod cli;
mod config;
mod db;
mod error;
mod models;
mod repositories;
mod utils;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;

use cli::{Cli, Command};
use db::connection;
use db::schema;
use db::store::Store;
use models::cve::CveRecord;
use repositories::ingestion::IngestionPipeline;
use repositories::queries::QueryFacade;
use utils::nvd_api::NvdApiClient;

struct App {
	store: Store,
	pipeline: IngestionPipeline,
	facade: QueryFacade,
}

impl App {
	fn new() -> Result<Self> {
		let settings = config::load()?;
		let pool = Arc::new(
			connection::establish_pool(&settings)
				.context("Failed to establish database connection pool")?,
		);

		let conn = pool.get().context("Failed to get database connection")?;
		schema::create_tables(&conn).context("Failed to create database tables")?;
		drop(conn);

		let store = Store::new(pool);
		let pipeline = IngestionPipeline::new(store.clone());
		let facade = QueryFacade::new(&store);

		Ok(App {
			store,
			pipeline,
			facade,
		})
	}

	async fn run(&self, command: Command) -> Result<()> {
		match command {
			Command::Stats { vendor, product } => self.stats(vendor, product).await,
			Command::Search {
				cpe,
				cve,
				year,
				json,
				limit,
				no_limit,
				search_term,
			} => {
				let limit = Command::effective_limit(limit, no_limit);
				self.search(cpe, cve, year, json, limit, &search_term).await
			}
			Command::Populate { cpe, cve, all } => self.populate(cpe, cve, all).await,
			Command::Update { cve } => self.update(cve).await,
			Command::Dbinit {
				no_confirm,
				cpe,
				cve,
				all,
			} => self.dbinit(no_confirm, cpe, cve, all),
			// Config is handled before the database is opened
			Command::Config { .. } => Ok(()),
		}
	}

	async fn stats(&self, vendor: bool, product: bool) -> Result<()> {
		if !vendor && !product {
			bail!("pass --vendor or --product");
		}
		if vendor {
			let results = self.facade.vendor_frequency().await?;
			println!("{}", json!({ "Results": results }));
		}
		if product {
			let results = self.facade.product_frequency().await?;
			println!("{}", json!({ "Results": results }));
		}
		Ok(())
	}

	async fn search(
		&self,
		cpe: bool,
		cve: bool,
		year: bool,
		json: bool,
		limit: Option<usize>,
		term: &str,
	) -> Result<()> {
		let records = if cpe {
			self.facade.by_cpe(term, limit).await?
		} else if cve {
			self.facade.by_cve_id(term, limit).await?
		} else if year {
			self.facade.by_year(term, limit).await?
		} else {
			bail!("pass one of --cpe, --cve or --year");
		};

		if json {
			println!("{}", serde_json::to_string_pretty(&records)?);
		} else {
			if records.is_empty() {
				println!("No results for '{}'", term);
			}
			for record in &records {
				println!("{}", render_record(record));
			}
		}
		Ok(())
	}

	async fn populate(&self, cpe: bool, cve: bool, all: bool) -> Result<()> {
		if !cpe && !cve && !all {
			bail!("pass one of --cpe, --cve or --all");
		}
		let client = NvdApiClient::new(self.pipeline.clone())?;
		if cpe || all {
			info!("Populating CPE dictionary");
			let count = client.populate_cpes().await?;
			println!("Loaded {} CPE entries", count);
		}
		if cve || all {
			info!("Populating CVE dictionary");
			let count = client.populate_cves().await?;
			println!("Loaded {} CVE entries", count);
		}
		Ok(())
	}

	async fn update(&self, cve: bool) -> Result<()> {
		if !cve {
			bail!("pass --cve");
		}
		let client = NvdApiClient::new(self.pipeline.clone())?;
		let count = client.update_cves().await?;
		println!("Merged {} recently modified CVE entries", count);
		Ok(())
	}

	fn dbinit(&self, no_confirm: bool, cpe: bool, cve: bool, all: bool) -> Result<()> {
		if !cpe && !cve && !all {
			bail!("pass one of --cpe, --cve or --all");
		}
		if !no_confirm && !confirm("This will drop existing tables. Continue? [y/N] ")? {
			println!("Aborted");
			return Ok(());
		}

		let pool = self.store.pool();
		let conn = pool.get().context("Failed to get database connection")?;
		if cpe || all {
			schema::recreate_cpe_table(&conn)?;
			info!("CPE table reset");
		}
		if cve || all {
			schema::recreate_cve_table(&conn)?;
			info!("CVE table reset");
		}
		println!("Database initialized");
		Ok(())
	}
}

fn render_record(record: &CveRecord) -> String {
	let score = record
		.cvss
		.base_score
		.map_or_else(|| "-".to_string(), |s| format!("{:.1}", s));
	format!(
		"{}  score={}  {}",
		record.cve_id,
		score,
		record.summary.as_deref().unwrap_or("(no summary)")
	)
}

fn confirm(prompt: &str) -> Result<bool> {
	print!("{}", prompt);
	io::stdout().flush().context("Failed to flush stdout")?;
	let mut answer = String::new();
	io::stdin()
		.lock()
		.read_line(&mut answer)
		.context("Failed to read confirmation")?;
	Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

#[tokio::main]
async fn main() -> Result<()> {
	utils::logger::init();
	let cli = Cli::parse();

	// Config management must work before any database exists
	if let Command::Config { generate, driver } = &cli.command {
		if !generate && driver.is_none() {
			bail!("pass --generate or --driver <name>");
		}
		if *generate {
			let path = config::generate()?;
			println!("Wrote configuration to {:?}", path);
		}
		if let Some(driver) = driver {
			let path = config::set_driver(driver)?;
			println!("Set driver to '{}' in {:?}", driver, path);
		}
		return Ok(());
	}

	let app = App::new()?;
	app.run(cli.command).await
}
