mod agent;
mod ai;
mod config;
mod cv;
mod db;
mod letter;
mod models;
mod sources;

use agent::JobSearchAgent;
use ai::{AIProvider, Embedder, Unavailable};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, ScoreFormat};
use cv::{CvAnalyzer, LabelledScoreParser};
use db::{Database, DEFAULT_LIST_LIMIT};
use letter::CoverLetterGenerator;
use models::{JobPosting, Materials};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jobmatch")]
#[command(about = "Aggregate job postings, score them against your CV, and draft cover letters")]
struct Cli {
    /// Database file (defaults to the user data directory)
    #[arg(long, global = true, env = "JOBMATCH_DB")]
    db: Option<PathBuf>,

    /// Model used for scoring and letters
    #[arg(short, long, global = true, env = "JOBMATCH_MODEL")]
    model: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Search all job boards, score against a CV, and save the results
    Search {
        /// Keywords, e.g. "AI Engineer"
        keywords: String,

        /// Location to search in
        #[arg(short, long, default_value = sources::DEFAULT_LOCATION)]
        location: String,

        /// Results to request from each board
        #[arg(short = 'n', long, default_value_t = sources::DEFAULT_LIMIT)]
        limit: usize,

        /// CV to score postings against (PDF or text)
        #[arg(long)]
        cv: Option<PathBuf>,

        /// How many of the best matches to print
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// List saved postings, most recent first
    List {
        #[arg(short = 'n', long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Show a saved posting
    Show {
        /// Posting ID, e.g. reed_12345
        id: String,
    },

    /// Show the best scored postings
    Recommend {
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
    },

    /// Generate a cover letter for a saved posting
    Letter {
        /// Posting ID, e.g. adzuna_4711
        job_id: String,

        /// Short candidate summary used in the letter
        #[arg(short, long, conflicts_with = "summary_file")]
        summary: Option<String>,

        /// Read the candidate summary from a file
        #[arg(long)]
        summary_file: Option<PathBuf>,

        /// Write the letter to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List generated applications
    Applications {
        /// Only applications for this posting
        #[arg(long)]
        job: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "jobmatch=debug" } else { "jobmatch=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    if let Some(path) = cli.db {
        config.db_path = path;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }

    match cli.command {
        Commands::Init => {
            let db = Database::open(&config.db_path)?;
            println!("Database initialized at {}", db.path().display());
        }

        Commands::Search {
            keywords,
            location,
            limit,
            cv,
            top,
        } => {
            let mut agent = build_agent(&config)?;
            match &cv {
                Some(path) => {
                    agent.setup_cv(path)?;
                    if let Some(index) = agent.cv() {
                        println!("CV indexed into {} chunks.", index.len());
                    }
                }
                None => println!("No CV given; postings will not be scored."),
            }

            let jobs = agent.search_and_analyze(&keywords, &location, limit)?;
            println!(
                "Found {} jobs for '{}' in {} (saved to {})",
                jobs.len(),
                keywords,
                location,
                agent.db().path().display()
            );
            if !jobs.is_empty() {
                println!("\nTop {} job matches:", top.min(jobs.len()));
                print_jobs(&jobs[..top.min(jobs.len())]);
            }
        }

        Commands::List { limit } => {
            let db = Database::open(&config.db_path)?;
            let jobs = db.list_jobs(limit)?;
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                print_table(&jobs);
            }
        }

        Commands::Show { id } => {
            let db = Database::open(&config.db_path)?;
            match db.get_job(&id)? {
                Some(job) => {
                    println!("{} ({})", job.id, job.source);
                    println!("Title: {}", job.title);
                    println!("Company: {}", job.company);
                    println!("Location: {}", job.location);
                    if let Some(salary) = job.salary.as_deref().filter(|s| !s.is_empty()) {
                        println!("Salary: {}", salary);
                    }
                    println!("Posted: {}", job.date_posted);
                    println!("Match Score: {}", format_score(job.match_score));
                    if db.is_applied(&job.id)? {
                        println!("Applied: yes");
                    }
                    println!("URL: {}", job.url);
                    println!("\n--- Description ---\n{}", textwrap::fill(&job.description, 80));
                }
                None => {
                    println!("Job {} not found.", id);
                }
            }
        }

        Commands::Recommend { limit } => {
            let db = Database::open(&config.db_path)?;
            let jobs = db.recommendations(limit)?;
            if jobs.is_empty() {
                println!("No scored jobs yet. Run 'jobmatch search --cv <file>' first.");
            } else {
                print_table(&jobs);
            }
        }

        Commands::Letter {
            job_id,
            summary,
            summary_file,
            output,
        } => {
            let cv_summary = match (summary, summary_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read summary file: {}", path.display()))?,
                (None, None) => return Err(anyhow!("Provide --summary or --summary-file")),
            };

            let agent = build_agent(&config)?;
            match agent.generate_materials(&job_id, cv_summary.trim())? {
                Materials::NotFound { error } => {
                    println!("{}: {}", job_id, error);
                }
                Materials::Generated(materials) => {
                    if materials.letter.is_empty() {
                        println!("Cover letter generation failed; see the log for details.");
                    } else if let Some(path) = output {
                        std::fs::write(&path, &materials.letter)
                            .with_context(|| format!("Failed to write to {}", path.display()))?;
                        println!("Cover letter saved to: {}", path.display());
                    } else {
                        println!(
                            "Generated application materials for {} at {}",
                            materials.title, materials.company
                        );
                        println!("{}", "=".repeat(50));
                        println!("{}", textwrap::fill(&materials.letter, 80));
                        println!("\nApply at: {}", materials.url);
                    }
                }
            }
        }

        Commands::Applications { job } => {
            let db = Database::open(&config.db_path)?;
            let apps = db.list_applications(job.as_deref())?;
            if apps.is_empty() {
                println!("No applications found.");
            } else {
                println!("{:<6} {:<20} {:<12} {:<10} {:<30}", "ID", "JOB", "DATE", "STATUS", "LETTER");
                println!("{}", "-".repeat(80));
                for app in apps {
                    println!(
                        "{:<6} {:<20} {:<12} {:<10} {:<30}",
                        app.id,
                        truncate(&app.job_id, 18),
                        app.application_date,
                        app.status,
                        truncate(&app.cover_letter.replace('\n', " "), 28)
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_agent(config: &Config) -> Result<JobSearchAgent> {
    let db = Database::open(&config.db_path)?;
    let spec = ai::resolve_model(&config.model)?;

    let client = config.http_client();

    let scorer = completion_backend(&spec, &client);
    let writer = completion_backend(&spec, &client);
    info!("Scoring and writing with {}", scorer.model_name());
    let embedder: Box<dyn Embedder> = match ai::create_embedder(config.embedder, client) {
        Ok(embedder) => embedder,
        Err(e) => {
            warn!("Embeddings unavailable, CV loading will fail: {:#}", e);
            Box::new(Unavailable::new(&e))
        }
    };

    let mut analyzer = CvAnalyzer::new(scorer, embedder);
    if config.score_format == ScoreFormat::Labelled {
        analyzer = analyzer.with_parser(Box::new(LabelledScoreParser));
    }

    Ok(JobSearchAgent::new(
        db,
        sources::default_sources(config),
        analyzer,
        CoverLetterGenerator::new(writer),
    ))
}

fn completion_backend(spec: &ai::ModelSpec, client: &reqwest::blocking::Client) -> Box<dyn AIProvider> {
    match ai::create_provider(spec, client.clone()) {
        Ok(provider) => provider,
        Err(e) => {
            warn!("Model {} unavailable: {:#}", spec.short_name, e);
            Box::new(Unavailable::new(&e))
        }
    }
}

fn print_jobs(jobs: &[JobPosting]) {
    for (i, job) in jobs.iter().enumerate() {
        println!("\n{}. {} at {}", i + 1, job.title, job.company);
        println!("   ID: {}", job.id);
        println!("   Location: {}", job.location);
        println!("   Match Score: {}", format_score(job.match_score));
        println!("   URL: {}", job.url);
    }
}

fn print_table(jobs: &[JobPosting]) {
    println!("{:<20} {:<8} {:<30} {:<20} {:>8}", "ID", "SOURCE", "TITLE", "COMPANY", "SCORE");
    println!("{}", "-".repeat(90));
    for job in jobs {
        let score = job
            .match_score
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<8} {:<30} {:<20} {:>8}",
            truncate(&job.id, 18),
            job.source,
            truncate(&job.title, 28),
            truncate(&job.company, 18),
            score
        );
    }
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{:.1}%", s),
        None => "Not calculated".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Senior Rust Engineer", 10), "Senior ...");
        assert_eq!(truncate("Zürich Müller GmbH", 8), "Züric...");
        assert_eq!(truncate("Müller GmbH", 9), "Müller...");
    }

    #[test]
    fn test_format_score() {
        assert_eq!(format_score(Some(81.0)), "81.0%");
        assert_eq!(format_score(None), "Not calculated");
    }

    #[test]
    fn test_cli_parses_search_defaults() {
        let cli = Cli::try_parse_from(["jobmatch", "search", "AI Engineer"]).unwrap();
        match cli.command {
            Commands::Search { keywords, location, limit, cv, top } => {
                assert_eq!(keywords, "AI Engineer");
                assert_eq!(location, "London");
                assert_eq!(limit, 10);
                assert!(cv.is_none());
                assert_eq!(top, 5);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_cli_letter_summary_flags_conflict() {
        let result = Cli::try_parse_from([
            "jobmatch", "letter", "reed_1", "--summary", "x", "--summary-file", "y.txt",
        ]);
        assert!(result.is_err());
    }
}
