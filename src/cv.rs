//! CV ingestion and CV-to-posting match scoring.
//!
//! A CV is loaded once into a [`CvIndex`]: its text is split into
//! overlapping chunks and each chunk is embedded. Scoring a posting asks the
//! completion model a fixed question, with the CV chunks most similar to
//! that question stuffed into the prompt, and pulls a number out of the
//! free-text answer through a [`ScoreParser`].

use anyhow::{anyhow, Result};
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info};

use crate::ai::{AIProvider, Embedder};
use crate::models::JobPosting;

pub const CHUNK_SIZE: usize = 500;
pub const CHUNK_OVERLAP: usize = 50;
/// Chunks handed to the model per question.
pub const RETRIEVAL_K: usize = 4;

const SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];
const SCORING_TEMPERATURE: f32 = 0.3;
const SCORING_MAX_TOKENS: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum CvError {
    #[error("Failed to read CV {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to extract text from PDF {path:?}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("CV {0:?} contains no text")]
    Empty(PathBuf),
}

// --- Loading ---

/// Read a CV as text: `.pdf` files go through PDF text extraction,
/// anything else is read as UTF-8.
pub fn load_document(path: &Path) -> Result<String, CvError> {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    let text = if is_pdf {
        let bytes = std::fs::read(path).map_err(|source| CvError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        pdf_extract::extract_text_from_mem(&bytes).map_err(|e| CvError::Pdf {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    } else {
        std::fs::read_to_string(path).map_err(|source| CvError::Read {
            path: path.to_path_buf(),
            source,
        })?
    };

    if text.trim().is_empty() {
        return Err(CvError::Empty(path.to_path_buf()));
    }
    Ok(text)
}

// --- Chunking ---

/// Split text into chunks of at most `chunk_size` characters, preferring
/// paragraph, then line, then word boundaries, with up to `overlap`
/// characters carried over between neighbouring chunks.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    split_recursive(text, SEPARATORS, chunk_size, overlap)
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    overlap: usize,
) -> Vec<String> {
    let (idx, separator) = separators
        .iter()
        .enumerate()
        .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
        .map(|(i, sep)| (i, *sep))
        .unwrap_or((separators.len(), ""));
    let finer = separators.get(idx + 1..).unwrap_or(&[]);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut chunks = Vec::new();
    let mut pending: Vec<&str> = Vec::new();
    for split in splits {
        if char_len(split) < chunk_size {
            pending.push(split);
            continue;
        }
        if !pending.is_empty() {
            chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
            pending.clear();
        }
        if finer.is_empty() {
            chunks.push(split.to_string());
        } else {
            chunks.extend(split_recursive(split, finer, chunk_size, overlap));
        }
    }
    if !pending.is_empty() {
        chunks.extend(merge_splits(&pending, separator, chunk_size, overlap));
    }
    chunks
}

fn merge_splits(splits: &[&str], separator: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for split in splits {
        let len = char_len(split);
        let joiner = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { sep_len };

        if total + len + joiner(&window) > chunk_size && !window.is_empty() {
            push_joined(&mut chunks, &window, separator);
            // Keep a tail of the window as overlap for the next chunk
            while total > overlap || (total > 0 && total + len + joiner(&window) > chunk_size) {
                let Some(first) = window.pop_front() else { break };
                total = total.saturating_sub(char_len(first) + joiner(&window));
            }
        }

        window.push_back(split);
        total += len + if window.len() > 1 { sep_len } else { 0 };
    }
    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// --- Index ---

#[derive(Debug, Clone)]
struct IndexedChunk {
    text: String,
    embedding: Vec<f32>,
}

/// Embedded chunks of one CV. Built wholesale; never updated in place.
#[derive(Debug, Clone)]
pub struct CvIndex {
    chunks: Vec<IndexedChunk>,
}

impl CvIndex {
    pub fn build(text: &str, embedder: &dyn Embedder) -> Result<Self> {
        let texts = split_text(text, CHUNK_SIZE, CHUNK_OVERLAP);
        if texts.is_empty() {
            return Err(anyhow!("No text to index"));
        }

        let embeddings = embedder.embed(&texts)?;
        if embeddings.len() != texts.len() {
            return Err(anyhow!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                texts.len()
            ));
        }

        let chunks = texts
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| IndexedChunk { text, embedding })
            .collect();
        Ok(Self { chunks })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// The `k` chunks most similar to the query vector, best first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Vec<&str> {
        let mut ranked: Vec<(f32, &IndexedChunk)> = self
            .chunks
            .iter()
            .map(|chunk| (cosine_similarity(query, &chunk.embedding), chunk))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        ranked
            .into_iter()
            .take(k)
            .map(|(_, chunk)| chunk.text.as_str())
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// --- Score parsing ---

/// Pulls a 0-100 match score out of a model answer.
pub trait ScoreParser {
    fn parse_score(&self, answer: &str) -> f64;
}

static FIRST_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+(?:\.[0-9]+)?)").expect("valid number pattern"));

static SCORE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*score\s*:\s*([0-9]+(?:\.[0-9]+)?)").expect("valid score line pattern")
});

/// Takes the first number anywhere in the answer, whatever it refers to.
/// "I have 3 of the 5 skills, so 60" scores 3.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstNumberParser;

impl ScoreParser for FirstNumberParser {
    fn parse_score(&self, answer: &str) -> f64 {
        FIRST_NUMBER
            .captures(answer)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

/// Reads a `SCORE: <n>` line, for prompts that demand that format.
#[derive(Debug, Default, Clone, Copy)]
pub struct LabelledScoreParser;

impl ScoreParser for LabelledScoreParser {
    fn parse_score(&self, answer: &str) -> f64 {
        SCORE_LINE
            .captures(answer)
            .and_then(|caps| caps[1].parse::<f64>().ok())
            .unwrap_or(0.0)
    }
}

// --- Analyzer ---

pub struct CvAnalyzer {
    provider: Box<dyn AIProvider>,
    embedder: Box<dyn Embedder>,
    parser: Box<dyn ScoreParser>,
}

impl CvAnalyzer {
    pub fn new(provider: Box<dyn AIProvider>, embedder: Box<dyn Embedder>) -> Self {
        Self {
            provider,
            embedder,
            parser: Box::new(FirstNumberParser),
        }
    }

    pub fn with_parser(mut self, parser: Box<dyn ScoreParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Build a fresh index for the CV at `path`.
    pub fn load(&self, path: &Path) -> Result<CvIndex> {
        let text = load_document(path)?;
        let index = CvIndex::build(&text, self.embedder.as_ref())?;
        info!("Indexed CV {} into {} chunks", path.display(), index.len());
        Ok(index)
    }

    /// Answer a question about the CV using the chunks closest to it.
    pub fn ask(&self, cv: &CvIndex, question: &str) -> Result<String> {
        let query = self
            .embedder
            .embed(&[question.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Embedder returned no vector for the question"))?;

        let context = cv.nearest(&query, RETRIEVAL_K).join("\n\n");
        let prompt = format!(
            "Use the following pieces of context to answer the question at the end. \
            If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
            {}\n\n\
            Question: {}\n\
            Helpful Answer:",
            context, question
        );
        self.provider
            .complete(&prompt, SCORING_MAX_TOKENS, SCORING_TEMPERATURE)
    }

    /// Match score for a posting, 0.0 without a CV or when the model call fails.
    pub fn score(&self, cv: Option<&CvIndex>, job: &JobPosting) -> f64 {
        let Some(cv) = cv else {
            return 0.0;
        };

        match self.ask(cv, &match_question(job)) {
            Ok(answer) => {
                let score = self.parser.parse_score(&answer);
                debug!("Scored {} at {}", job.id, score);
                score
            }
            Err(e) => {
                error!("Error analyzing job match for {}: {:#}", job.id, e);
                0.0
            }
        }
    }
}

fn match_question(job: &JobPosting) -> String {
    format!(
        "Based on my CV, how well do I match this job posting?\n\n\
        Job Title: {}\n\
        Company: {}\n\
        Requirements: {}\n\n\
        Please provide a match score from 0-100 and explain the reasoning.",
        job.title, job.company, job.requirements
    )
}
