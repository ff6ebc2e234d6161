use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::db::Database;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_ADZUNA_COUNTRY: &str = "gb";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    OpenAI,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreFormat {
    FirstNumber, // first number anywhere in the answer
    Labelled,    // a "SCORE: <n>" line
}

/// Runtime settings, read from the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub reed_api_key: Option<String>,
    pub adzuna_app_id: Option<String>,
    pub adzuna_app_key: Option<String>,
    pub adzuna_country: String,
    pub db_path: PathBuf,
    pub model: String,
    pub embedder: EmbedderKind,
    pub score_format: ScoreFormat,
    /// Applies to every outbound call; `None` keeps reqwest's default.
    pub http_timeout: Option<Duration>,
    pub reed_search_url: Option<String>,
    pub adzuna_api_base: Option<String>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            reed_api_key: non_empty_var("REED_API_KEY"),
            adzuna_app_id: non_empty_var("ADZUNA_APP_ID"),
            adzuna_app_key: non_empty_var("ADZUNA_APP_KEY"),
            adzuna_country: non_empty_var("ADZUNA_COUNTRY")
                .unwrap_or_else(|| DEFAULT_ADZUNA_COUNTRY.to_string()),
            db_path: non_empty_var("JOBMATCH_DB")
                .map(PathBuf::from)
                .unwrap_or_else(Database::default_path),
            model: non_empty_var("JOBMATCH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embedder: match non_empty_var("JOBMATCH_EMBEDDER").as_deref() {
                Some("local") => EmbedderKind::Local,
                _ => EmbedderKind::OpenAI,
            },
            score_format: match non_empty_var("JOBMATCH_SCORE_PARSER").as_deref() {
                Some("labelled") => ScoreFormat::Labelled,
                _ => ScoreFormat::FirstNumber,
            },
            http_timeout: non_empty_var("JOBMATCH_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
            reed_search_url: non_empty_var("JOBMATCH_REED_URL"),
            adzuna_api_base: non_empty_var("JOBMATCH_ADZUNA_URL"),
        }
    }

    /// Blocking HTTP client shared by the job boards and model providers.
    pub fn http_client(&self) -> reqwest::blocking::Client {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = self.http_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::blocking::Client::new()
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_defaults_and_overrides() {
        unsafe {
            env::remove_var("ADZUNA_COUNTRY");
            env::set_var("JOBMATCH_EMBEDDER", "local");
            env::set_var("JOBMATCH_HTTP_TIMEOUT_SECS", "15");
            env::set_var("JOBMATCH_DB", "/tmp/jobmatch-test.db");
            env::set_var("JOBMATCH_SCORE_PARSER", "labelled");
            env::set_var("JOBMATCH_REED_URL", "http://127.0.0.1:8080/search");
            env::remove_var("JOBMATCH_ADZUNA_URL");
        }

        let config = Config::from_env();

        unsafe {
            env::remove_var("JOBMATCH_EMBEDDER");
            env::remove_var("JOBMATCH_HTTP_TIMEOUT_SECS");
            env::remove_var("JOBMATCH_DB");
            env::remove_var("JOBMATCH_SCORE_PARSER");
            env::remove_var("JOBMATCH_REED_URL");
        }

        assert_eq!(config.adzuna_country, "gb");
        assert_eq!(config.embedder, EmbedderKind::Local);
        assert_eq!(config.score_format, ScoreFormat::Labelled);
        assert_eq!(config.reed_search_url.as_deref(), Some("http://127.0.0.1:8080/search"));
        assert!(config.adzuna_api_base.is_none());
        assert_eq!(config.http_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.db_path, PathBuf::from("/tmp/jobmatch-test.db"));
    }

    #[test]
    fn test_non_empty_var_ignores_blank_values() {
        unsafe { env::set_var("JOBMATCH_BLANK_PROBE", "   "); }
        assert!(non_empty_var("JOBMATCH_BLANK_PROBE").is_none());
        unsafe { env::remove_var("JOBMATCH_BLANK_PROBE"); }
        assert!(non_empty_var("JOBMATCH_BLANK_PROBE").is_none());
    }
}
