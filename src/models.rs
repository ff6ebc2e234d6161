use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String, // "<source>_<native id>", e.g. "reed_123"
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub requirements: String,
    pub salary: Option<String>,
    pub url: String,
    pub date_posted: String, // provider format, not normalized
    pub source: String,      // "Reed", "Adzuna"
    pub match_score: Option<f64>,
}

impl JobPosting {
    /// Score used for ranking; unscored postings rank as 0.
    pub fn rank_score(&self) -> f64 {
        self.match_score.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: i64,
    pub job_id: String,
    pub cover_letter: String,
    pub application_date: String,
    pub status: String, // "draft", "sent", ...
    pub notes: Option<String>,
}

/// Outcome of generating application materials for a stored posting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Materials {
    Generated(ApplicationMaterials),
    NotFound { error: String },
}

impl Materials {
    pub fn not_found() -> Self {
        Materials::NotFound {
            error: "Job not found".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationMaterials {
    #[serde(rename = "job_title")]
    pub title: String,
    pub company: String,
    #[serde(rename = "cover_letter")]
    pub letter: String,
    #[serde(rename = "job_url")]
    pub url: String,
}

#[cfg(test)]
pub(crate) fn sample_posting(id: &str, score: Option<f64>) -> JobPosting {
    JobPosting {
        id: id.to_string(),
        title: "Rust Engineer".to_string(),
        company: "Ferrous Ltd".to_string(),
        location: "London".to_string(),
        description: "Build storage engines in Rust.".to_string(),
        requirements: "Build storage engines in Rust.".to_string(),
        salary: Some("60000".to_string()),
        url: format!("https://jobs.example.com/{}", id),
        date_posted: "01/10/2026".to_string(),
        source: "Reed".to_string(),
        match_score: score,
    }
}
