// src/utils/nvd_api.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::error::IngestError;
use crate::models::cpe::{cpe22_from_cpe23, CpeRecord};
use crate::models::cve::{CveRecord, CvssMetrics};
use crate::repositories::ingestion::IngestionPipeline;

const CVE_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cves/2.0";
const CPE_API_URL: &str = "https://services.nvd.nist.gov/rest/json/cpes/2.0";
const PAGE_SIZE: usize = 2000;
const REQUEST_DELAY: Duration = Duration::from_millis(2000);
/// How far back `update` reaches for recently modified CVEs.
const UPDATE_WINDOW_DAYS: i64 = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCveResponse {
	total_results: usize,
	#[serde(default)]
	vulnerabilities: Vec<NvdVulnerability>,
}

#[derive(Debug, Deserialize)]
struct NvdVulnerability {
	cve: NvdCve,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCve {
	id: String,
	published: Option<String>,
	last_modified: Option<String>,
	#[serde(default)]
	descriptions: Vec<NvdLangString>,
	#[serde(default)]
	metrics: NvdMetrics,
	#[serde(default)]
	weaknesses: Vec<NvdWeakness>,
	#[serde(default)]
	references: Vec<NvdReference>,
	#[serde(default)]
	configurations: Vec<NvdConfiguration>,
}

#[derive(Debug, Deserialize)]
struct NvdLangString {
	lang: String,
	value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdMetrics {
	#[serde(default)]
	cvss_metric_v2: Vec<NvdCvssMetricV2>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssMetricV2 {
	source: Option<String>,
	cvss_data: NvdCvssDataV2,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCvssDataV2 {
	base_score: Option<f64>,
	access_vector: Option<String>,
	access_complexity: Option<String>,
	authentication: Option<String>,
	confidentiality_impact: Option<String>,
	integrity_impact: Option<String>,
	availability_impact: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdWeakness {
	#[serde(default)]
	description: Vec<NvdLangString>,
}

#[derive(Debug, Deserialize)]
struct NvdReference {
	url: String,
	source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NvdConfiguration {
	#[serde(default)]
	nodes: Vec<NvdNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdNode {
	#[serde(default)]
	cpe_match: Vec<NvdCpeMatch>,
}

#[derive(Debug, Deserialize)]
struct NvdCpeMatch {
	vulnerable: bool,
	criteria: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCpeResponse {
	total_results: usize,
	#[serde(default)]
	products: Vec<NvdProduct>,
}

#[derive(Debug, Deserialize)]
struct NvdProduct {
	cpe: NvdCpeEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NvdCpeEntry {
	cpe_name: String,
	#[serde(default)]
	titles: Vec<NvdTitle>,
	#[serde(default)]
	refs: Vec<NvdCpeRef>,
}

#[derive(Debug, Deserialize)]
struct NvdTitle {
	title: String,
	lang: String,
}

#[derive(Debug, Deserialize)]
struct NvdCpeRef {
	#[serde(rename = "ref")]
	href: String,
	#[serde(rename = "type")]
	ref_type: Option<String>,
}

/// Pages the NVD 2.0 APIs and feeds the records into the pipeline.
#[derive(Clone)]
pub struct NvdApiClient {
	client: reqwest::Client,
	pipeline: IngestionPipeline,
}

impl NvdApiClient {
	pub fn new(pipeline: IngestionPipeline) -> Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert(USER_AGENT, HeaderValue::from_static("vulnhub/0.1"));

		let client = reqwest::Client::builder()
			.default_headers(headers)
			.build()
			.context("Failed to create HTTP client")?;

		Ok(Self { client, pipeline })
	}

	/// Full CVE load: every page of the feed goes through the upsert
	/// path, so re-running after a partial failure picks up where the
	/// committed batches left off.
	pub async fn populate_cves(&self) -> Result<usize> {
		self.sync_cves(None).await
	}

	/// Incremental CVE load restricted to the recent last-modified
	/// window. Stored CVSS metrics survive since this reuses the merge
	/// path.
	pub async fn update_cves(&self) -> Result<usize> {
		let end = Utc::now();
		let start = end - ChronoDuration::days(UPDATE_WINDOW_DAYS);
		self.sync_cves(Some((start, end))).await
	}

	/// Full CPE dictionary load. All pages are collected first because
	/// the replace semantics require a single batch.
	pub async fn populate_cpes(&self) -> Result<usize> {
		let mut start_index = 0;
		let mut records = Vec::new();

		loop {
			let page = self.fetch_cpe_page(start_index).await?;
			if page.products.is_empty() {
				break;
			}
			start_index += page.products.len();

			for product in &page.products {
				match map_cpe(&product.cpe) {
					Some(record) => records.push(record),
					None => warn!("Skipping unparseable CPE name '{}'", product.cpe.cpe_name),
				}
			}
			info!("Fetched {}/{} CPE entries", start_index, page.total_results);

			if start_index >= page.total_results {
				break;
			}
		}

		let count = self.pipeline.ingest_cpe_batch(records).await?;
		Ok(count)
	}

	async fn sync_cves(
		&self,
		window: Option<(DateTime<Utc>, DateTime<Utc>)>,
	) -> Result<usize> {
		let mut start_index = 0;
		let mut ingested = 0;

		loop {
			let page = self.fetch_cve_page(start_index, &window).await?;
			if page.vulnerabilities.is_empty() {
				break;
			}
			start_index += page.vulnerabilities.len();

			let mut records = Vec::with_capacity(page.vulnerabilities.len());
			for item in &page.vulnerabilities {
				match map_cve(&item.cve) {
					Ok(record) => records.push(record),
					Err(e) => warn!("Skipping CVE entry '{}': {}", item.cve.id, e),
				}
			}

			if !records.is_empty() {
				ingested += self.pipeline.ingest_cve_batch(records).await?;
			}
			info!("Processed {}/{} CVE entries", start_index, page.total_results);

			if start_index >= page.total_results {
				break;
			}
		}

		Ok(ingested)
	}

	async fn fetch_cve_page(
		&self,
		start_index: usize,
		window: &Option<(DateTime<Utc>, DateTime<Utc>)>,
	) -> Result<NvdCveResponse> {
		let mut query = vec![
			("resultsPerPage".to_string(), PAGE_SIZE.to_string()),
			("startIndex".to_string(), start_index.to_string()),
		];
		if let Some((start, end)) = window {
			query.push(("lastModStartDate".to_string(), format_nvd_timestamp(start)));
			query.push(("lastModEndDate".to_string(), format_nvd_timestamp(end)));
		}
		debug!("Fetching CVE page at index {}", start_index);

		let response = self
			.client
			.get(CVE_API_URL)
			.query(&query)
			.send()
			.await
			.context("Failed to send request to NVD CVE API")?;

		if !response.status().is_success() {
			return Err(anyhow::anyhow!(
				"NVD CVE API request failed with status: {}",
				response.status()
			));
		}

		let data = response
			.json::<NvdCveResponse>()
			.await
			.context("Failed to parse NVD CVE API response")?;

		sleep(REQUEST_DELAY).await;
		Ok(data)
	}

	async fn fetch_cpe_page(&self, start_index: usize) -> Result<NvdCpeResponse> {
		debug!("Fetching CPE page at index {}", start_index);

		let response = self
			.client
			.get(CPE_API_URL)
			.query(&[
				("resultsPerPage", PAGE_SIZE.to_string()),
				("startIndex", start_index.to_string()),
			])
			.send()
			.await
			.context("Failed to send request to NVD CPE API")?;

		if !response.status().is_success() {
			return Err(anyhow::anyhow!(
				"NVD CPE API request failed with status: {}",
				response.status()
			));
		}

		let data = response
			.json::<NvdCpeResponse>()
			.await
			.context("Failed to parse NVD CPE API response")?;

		sleep(REQUEST_DELAY).await;
		Ok(data)
	}
}

fn map_cve(cve: &NvdCve) -> Result<CveRecord, IngestError> {
	let software_list = cve
		.configurations
		.iter()
		.flat_map(|c| &c.nodes)
		.flat_map(|n| &n.cpe_match)
		.filter(|m| m.vulnerable)
		.map(|m| m.criteria.clone())
		.collect();

	let mut record = CveRecord::new(cve.id.clone(), software_list)?;
	record.published_date = cve.published.as_deref().and_then(parse_nvd_datetime);
	record.modified_date = cve.last_modified.as_deref().and_then(parse_nvd_datetime);
	record.summary = english_value(&cve.descriptions);

	if let Some(metric) = cve.metrics.cvss_metric_v2.first() {
		record.cvss = CvssMetrics {
			base_score: metric.cvss_data.base_score,
			access_vector: metric.cvss_data.access_vector.clone(),
			access_complexity: metric.cvss_data.access_complexity.clone(),
			authentication: metric.cvss_data.authentication.clone(),
			confidentiality_impact: metric.cvss_data.confidentiality_impact.clone(),
			integrity_impact: metric.cvss_data.integrity_impact.clone(),
			availability_impact: metric.cvss_data.availability_impact.clone(),
			source: metric.source.clone(),
			base_generation_date: record.published_date,
		};
	}

	record.cwe_id = dedup_preserving_order(
		cve.weaknesses
			.iter()
			.flat_map(|w| &w.description)
			.filter(|d| d.lang == "en")
			.map(|d| d.value.clone()),
	);
	record.vulnerability_source = dedup_preserving_order(
		cve.references.iter().filter_map(|r| r.source.clone()),
	);
	record.vulnerability_source_reference =
		dedup_preserving_order(cve.references.iter().map(|r| r.url.clone()));

	Ok(record)
}

fn map_cpe(entry: &NvdCpeEntry) -> Option<CpeRecord> {
	let cpeid = cpe22_from_cpe23(&entry.cpe_name)?;
	let title = entry
		.titles
		.iter()
		.find(|t| t.lang == "en")
		.map(|t| t.title.clone());
	let product_ref = entry
		.refs
		.iter()
		.find(|r| r.ref_type.as_deref() == Some("Change Log"))
		.map(|r| r.href.clone());

	let mut record = CpeRecord::from_uri(cpeid, title, product_ref).ok()?;
	// Keep the dictionary's full 2.3 name rather than the derived one
	record.cpe_2_3 = entry.cpe_name.clone();
	Some(record)
}

fn english_value(descriptions: &[NvdLangString]) -> Option<String> {
	descriptions
		.iter()
		.find(|d| d.lang == "en")
		.map(|d| d.value.clone())
}

fn dedup_preserving_order(values: impl Iterator<Item = String>) -> Vec<String> {
	let mut seen = Vec::new();
	for value in values {
		if !seen.contains(&value) {
			seen.push(value);
		}
	}
	seen
}

fn parse_nvd_datetime(value: &str) -> Option<NaiveDateTime> {
	NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn format_nvd_timestamp(value: &DateTime<Utc>) -> String {
	value.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string()
}
