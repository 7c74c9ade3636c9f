use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::PathBuf;
use anyhow::{Result, Context};
use log::info;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Establishes a connection pool with a custom database path
pub fn establish_pool_with_path(custom_path: PathBuf) -> Result<SqlitePool> {
	info!("SQLite database will be located at: {:?}", custom_path);

	if let Some(parent) = custom_path.parent() {
		std::fs::create_dir_all(parent).context("Failed to create database directory")?;
	}

	let manager = SqliteConnectionManager::file(custom_path);

	let pool = Pool::builder()
		.max_size(15)
		.build(manager)
		.context("Failed to create SQLite connection pool")?;

	info!("SQLite connection pool established successfully");
	Ok(pool)
}

/// Establishes a connection pool at the path named by the settings file
pub fn establish_pool(settings: &crate::config::Settings) -> Result<SqlitePool> {
	establish_pool_with_path(settings.database_path.clone())
}
