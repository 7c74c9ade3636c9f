// src/config.rs

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = ".vulnhub";
const CONFIG_FILE: &str = "dbconfig.json";
const DEFAULT_DB_FILE: &str = "vulnhub.db";

/// On-disk settings, kept at `~/.vulnhub/dbconfig.json`. A missing file
/// is not an error: defaults apply until the user generates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
	pub driver: String,
	pub database_path: PathBuf,
}

impl Default for Settings {
	fn default() -> Self {
		let mut database_path = home_dir();
		database_path.push(CONFIG_DIR);
		database_path.push(DEFAULT_DB_FILE);
		Settings {
			driver: "sqlite".to_string(),
			database_path,
		}
	}
}

fn home_dir() -> PathBuf {
	dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file_path() -> PathBuf {
	let mut path = home_dir();
	path.push(CONFIG_DIR);
	path.push(CONFIG_FILE);
	path
}

pub fn load() -> Result<Settings> {
	load_from(&config_file_path())
}

fn load_from(path: &Path) -> Result<Settings> {
	if !path.exists() {
		return Ok(Settings::default());
	}
	let raw = fs::read_to_string(path)
		.with_context(|| format!("Failed to read config file {:?}", path))?;
	serde_json::from_str(&raw).with_context(|| format!("Malformed config file {:?}", path))
}

/// Write a fresh default configuration, overwriting any existing one.
pub fn generate() -> Result<PathBuf> {
	let path = config_file_path();
	write_to(&path, &Settings::default())?;
	info!("Generated configuration at {:?}", path);
	Ok(path)
}

/// Update only the driver field, preserving the rest of the settings.
pub fn set_driver(driver: &str) -> Result<PathBuf> {
	let path = config_file_path();
	let mut settings = load_from(&path)?;
	settings.driver = driver.to_string();
	write_to(&path, &settings)?;
	Ok(path)
}

fn write_to(path: &Path, settings: &Settings) -> Result<()> {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent)
			.with_context(|| format!("Failed to create config directory {:?}", parent))?;
	}
	let raw = serde_json::to_string_pretty(settings).context("Failed to encode settings")?;
	fs::write(path, raw).with_context(|| format!("Failed to write config file {:?}", path))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn test_missing_file_yields_defaults() {
		let dir = tempdir().unwrap();
		let settings = load_from(&dir.path().join("absent.json")).unwrap();
		assert_eq!(settings.driver, "sqlite");
	}

	#[test]
	fn test_write_and_load_roundtrip() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("dbconfig.json");

		let settings = Settings {
			driver: "sqlite".to_string(),
			database_path: PathBuf::from("/tmp/custom.db"),
		};
		write_to(&path, &settings).unwrap();

		let loaded = load_from(&path).unwrap();
		assert_eq!(loaded.driver, "sqlite");
		assert_eq!(loaded.database_path, PathBuf::from("/tmp/custom.db"));
	}

	#[test]
	fn test_malformed_file_is_an_error() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("dbconfig.json");
		fs::write(&path, "{ not json").unwrap();
		assert!(load_from(&path).is_err());
	}
}
