use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::JobPosting;

pub const DEFAULT_LOCATION: &str = "London";
pub const DEFAULT_LIMIT: usize = 10;

const REED_SEARCH_URL: &str = "https://www.reed.co.uk/api/1.0/search";
const ADZUNA_API_BASE: &str = "https://api.adzuna.com";

/// A job board that turns a keyword/location query into normalized postings.
///
/// Missing credentials and transport failures yield `Ok(vec![])` so one
/// board going down never aborts aggregation. An `Err` means the board
/// answered but a result lacked a mandatory field; that fails the whole batch.
pub trait JobSource: Send + Sync {
    fn name(&self) -> &str;
    fn search(&self, keywords: &str, location: &str, limit: usize) -> Result<Vec<JobPosting>>;
}

/// Sources in aggregation order.
pub fn default_sources(config: &Config) -> Vec<Box<dyn JobSource>> {
    let client = config.http_client();

    let mut reed = ReedClient::new(config.reed_api_key.clone(), client.clone());
    if let Some(url) = &config.reed_search_url {
        reed = reed.with_search_url(url);
    }

    let mut adzuna = AdzunaClient::new(
        config.adzuna_app_id.clone(),
        config.adzuna_app_key.clone(),
        config.adzuna_country.clone(),
        client,
    );
    if let Some(base) = &config.adzuna_api_base {
        adzuna = adzuna.with_api_base(base);
    }

    vec![Box::new(reed), Box::new(adzuna)]
}

// --- Reed ---

pub struct ReedClient {
    api_key: Option<String>,
    search_url: String,
    client: reqwest::blocking::Client,
}

impl ReedClient {
    pub fn new(api_key: Option<String>, client: reqwest::blocking::Client) -> Self {
        Self {
            api_key,
            search_url: REED_SEARCH_URL.to_string(),
            client,
        }
    }

    pub fn with_search_url(mut self, url: &str) -> Self {
        self.search_url = url.to_string();
        self
    }
}

impl JobSource for ReedClient {
    fn name(&self) -> &str {
        "Reed"
    }

    fn search(&self, keywords: &str, location: &str, limit: usize) -> Result<Vec<JobPosting>> {
        let Some(api_key) = &self.api_key else {
            warn!("Reed API key not found (set REED_API_KEY). Get one from https://www.reed.co.uk/developers");
            return Ok(vec![]);
        };

        let take = limit.to_string();
        let request = self
            .client
            .get(&self.search_url)
            .query(&[
                ("keywords", keywords),
                ("locationName", location),
                ("resultsToTake", take.as_str()),
                ("employerType", "direct"),
            ])
            .basic_auth(api_key, Some(""));

        let Some(body) = fetch_json(self.name(), request) else {
            return Ok(vec![]);
        };
        parse_reed_results(&body)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReedJob {
    job_id: Value,
    #[serde(deserialize_with = "null_as_empty")]
    job_title: String,
    #[serde(deserialize_with = "null_as_empty")]
    employer_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    location_name: String,
    #[serde(deserialize_with = "null_as_empty")]
    job_description: String,
    #[serde(default = "missing_salary")]
    minimum_salary: Option<Value>,
    #[serde(deserialize_with = "null_as_empty")]
    job_url: String,
    #[serde(deserialize_with = "null_as_empty")]
    date: String,
}

pub fn parse_reed_results(body: &Value) -> Result<Vec<JobPosting>> {
    let jobs: Vec<ReedJob> = results_of(body).context("Malformed Reed search result")?;

    Ok(jobs
        .into_iter()
        .map(|job| JobPosting {
            id: format!("reed_{}", native_id(&job.job_id)),
            title: job.job_title,
            company: job.employer_name,
            location: job.location_name,
            // Reed has no separate requirements field
            requirements: job.job_description.clone(),
            description: job.job_description,
            salary: salary_text(job.minimum_salary),
            url: job.job_url,
            date_posted: job.date,
            source: "Reed".to_string(),
            match_score: None,
        })
        .collect())
}

// --- Adzuna ---

pub struct AdzunaClient {
    app_id: Option<String>,
    app_key: Option<String>,
    country: String,
    api_base: String,
    client: reqwest::blocking::Client,
}

impl AdzunaClient {
    pub fn new(
        app_id: Option<String>,
        app_key: Option<String>,
        country: String,
        client: reqwest::blocking::Client,
    ) -> Self {
        Self {
            app_id,
            app_key,
            country,
            api_base: ADZUNA_API_BASE.to_string(),
            client,
        }
    }

    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self
    }

    fn search_url(&self) -> String {
        format!("{}/v1/api/jobs/{}/search/1", self.api_base, self.country)
    }
}

impl JobSource for AdzunaClient {
    fn name(&self) -> &str {
        "Adzuna"
    }

    fn search(&self, keywords: &str, location: &str, limit: usize) -> Result<Vec<JobPosting>> {
        let (Some(app_id), Some(app_key)) = (&self.app_id, &self.app_key) else {
            warn!("Adzuna API credentials not found (set ADZUNA_APP_ID and ADZUNA_APP_KEY). Get them from https://developer.adzuna.com/");
            return Ok(vec![]);
        };

        let per_page = limit.to_string();
        let request = self.client.get(self.search_url()).query(&[
            ("app_id", app_id.as_str()),
            ("app_key", app_key.as_str()),
            ("what", keywords),
            ("where", location),
            ("results_per_page", per_page.as_str()),
            ("content-type", "application/json"),
        ]);

        let Some(body) = fetch_json(self.name(), request) else {
            return Ok(vec![]);
        };
        parse_adzuna_results(&body)
    }
}

#[derive(Debug, Deserialize)]
struct AdzunaDisplayName {
    #[serde(deserialize_with = "null_as_empty")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct AdzunaJob {
    id: Value,
    #[serde(deserialize_with = "null_as_empty")]
    title: String,
    company: AdzunaDisplayName,
    location: AdzunaDisplayName,
    #[serde(deserialize_with = "null_as_empty")]
    description: String,
    #[serde(default = "missing_salary")]
    salary_min: Option<Value>,
    #[serde(deserialize_with = "null_as_empty")]
    redirect_url: String,
    #[serde(deserialize_with = "null_as_empty")]
    created: String,
}

pub fn parse_adzuna_results(body: &Value) -> Result<Vec<JobPosting>> {
    let jobs: Vec<AdzunaJob> = results_of(body).context("Malformed Adzuna search result")?;

    Ok(jobs
        .into_iter()
        .map(|job| JobPosting {
            id: format!("adzuna_{}", native_id(&job.id)),
            title: job.title,
            company: job.company.display_name,
            location: job.location.display_name,
            requirements: job.description.clone(),
            description: job.description,
            salary: salary_text(job.salary_min),
            url: job.redirect_url,
            date_posted: job.created,
            source: "Adzuna".to_string(),
            match_score: None,
        })
        .collect())
}

// --- Shared helpers ---

/// Send a GET and decode its JSON body. Any transport-level problem is
/// logged and reported as `None`.
fn fetch_json(source: &str, request: reqwest::blocking::RequestBuilder) -> Option<Value> {
    let response = match request.send().and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(e) => {
            warn!("Error fetching {} jobs: {}", source, e);
            return None;
        }
    };

    match response.json::<Value>() {
        Ok(body) => {
            debug!("{} responded", source);
            Some(body)
        }
        Err(e) => {
            warn!("Error decoding {} response: {}", source, e);
            None
        }
    }
}

/// Deserialize the `results` list; a body without one has no results.
fn results_of<T: serde::de::DeserializeOwned>(body: &Value) -> Result<Vec<T>> {
    match body.get("results") {
        Some(results) => Ok(serde_json::from_value(results.clone())?),
        None => Ok(vec![]),
    }
}

/// A mandatory field that is present but `null` reads as an empty string;
/// only an absent field fails the batch.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn missing_salary() -> Option<Value> {
    Some(Value::String(String::new()))
}

fn salary_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn native_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
