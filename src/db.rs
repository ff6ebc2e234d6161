use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

use crate::models::{ApplicationRecord, JobPosting};

/// How many of the most recent postings are scanned when the caller doesn't
/// ask for a specific window.
pub const DEFAULT_LIST_LIMIT: usize = 50;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.init()?;
        Ok(db)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobmatch") {
            proj_dirs.data_dir().join("job_search.db")
        } else {
            PathBuf::from("job_search.db")
        }
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                title TEXT,
                company TEXT,
                location TEXT,
                description TEXT,
                requirements TEXT,
                salary TEXT,
                url TEXT,
                date_posted TEXT,
                source TEXT,
                match_score REAL,
                applied INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT REFERENCES jobs(id),
                cover_letter TEXT,
                application_date TEXT,
                status TEXT,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
            CREATE INDEX IF NOT EXISTS idx_applications_job ON applications(job_id);
            "#,
        )?;
        Ok(())
    }

    // --- Posting operations ---

    /// Insert or replace by id. The replaced row gets a fresh `created_at`,
    /// so a re-fetched posting moves to the front of `list_jobs`.
    pub fn save_job(&self, job: &JobPosting) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO jobs
                 (id, title, company, location, description, requirements, salary, url, date_posted, source, match_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    job.id,
                    job.title,
                    job.company,
                    job.location,
                    job.description,
                    job.requirements,
                    job.salary,
                    job.url,
                    job.date_posted,
                    job.source,
                    job.match_score,
                ],
            )
            .with_context(|| format!("Failed to save job {}", job.id))?;
        Ok(())
    }

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<JobPosting>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, company, location, description, requirements, salary, url, date_posted, source, match_score
             FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], Self::row_to_job)?;
        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list jobs")
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobPosting>> {
        let result = self.conn.query_row(
            "SELECT id, title, company, location, description, requirements, salary, url, date_posted, source, match_score
             FROM jobs WHERE id = ?1",
            [id],
            Self::row_to_job,
        );
        match result {
            Ok(job) => Ok(Some(job)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Scored postings among the most recent ones, best first.
    pub fn recommendations(&self, limit: usize) -> Result<Vec<JobPosting>> {
        let mut scored: Vec<JobPosting> = self
            .list_jobs(DEFAULT_LIST_LIMIT)?
            .into_iter()
            .filter(|job| job.match_score.is_some())
            .collect();

        scored.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn is_applied(&self, id: &str) -> Result<bool> {
        let applied: i64 = self.conn.query_row(
            "SELECT applied FROM jobs WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(applied != 0)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<JobPosting> {
        Ok(JobPosting {
            id: row.get(0)?,
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            company: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            location: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            requirements: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            salary: row.get(6)?,
            url: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            date_posted: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
            source: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            match_score: row.get(10)?,
        })
    }

    // --- Application operations ---

    pub fn record_application(
        &self,
        job_id: &str,
        cover_letter: &str,
        status: &str,
        notes: Option<&str>,
    ) -> Result<i64> {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        self.conn
            .execute(
                "INSERT INTO applications (job_id, cover_letter, application_date, status, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![job_id, cover_letter, today, status, notes],
            )
            .with_context(|| format!("Failed to record application for {}", job_id))?;
        let id = self.conn.last_insert_rowid();

        self.conn.execute(
            "UPDATE jobs SET applied = 1 WHERE id = ?1",
            [job_id],
        )?;
        Ok(id)
    }

    pub fn list_applications(&self, job_id: Option<&str>) -> Result<Vec<ApplicationRecord>> {
        let mut sql = String::from(
            "SELECT id, job_id, cover_letter, application_date, status, notes FROM applications",
        );
        if job_id.is_some() {
            sql.push_str(" WHERE job_id = ?1");
        }
        sql.push_str(" ORDER BY id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = if let Some(id) = job_id {
            stmt.query_map([id], Self::row_to_application)?
        } else {
            stmt.query_map([], Self::row_to_application)?
        };

        rows.collect::<Result<Vec<_>, _>>()
            .context("Failed to list applications")
    }

    fn row_to_application(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        Ok(ApplicationRecord {
            id: row.get(0)?,
            job_id: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            cover_letter: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            application_date: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            status: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            notes: row.get(5)?,
        })
    }

    #[cfg(test)]
    fn count_jobs(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?)
    }
}
