use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::cv::{CvAnalyzer, CvIndex};
use crate::db::{Database, DEFAULT_LIST_LIMIT};
use crate::letter::CoverLetterGenerator;
use crate::models::{ApplicationMaterials, JobPosting, Materials};
use crate::sources::JobSource;

/// Ties the job boards, CV scoring, storage and letter writing together.
pub struct JobSearchAgent {
    db: Database,
    sources: Vec<Box<dyn JobSource>>,
    analyzer: CvAnalyzer,
    letters: CoverLetterGenerator,
    cv: Option<CvIndex>,
}

impl JobSearchAgent {
    pub fn new(
        db: Database,
        sources: Vec<Box<dyn JobSource>>,
        analyzer: CvAnalyzer,
        letters: CoverLetterGenerator,
    ) -> Self {
        Self {
            db,
            sources,
            analyzer,
            letters,
            cv: None,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cv(&self) -> Option<&CvIndex> {
        self.cv.as_ref()
    }

    /// Load a CV, replacing the current one. On failure the current CV is kept.
    pub fn setup_cv(&mut self, path: &Path) -> Result<()> {
        let index = self
            .analyzer
            .load(path)
            .with_context(|| format!("Failed to load CV from {}", path.display()))?;
        self.cv = Some(index);
        info!("CV loaded and analyzed successfully");
        Ok(())
    }

    pub fn search_and_analyze(
        &self,
        keywords: &str,
        location: &str,
        limit: usize,
    ) -> Result<Vec<JobPosting>> {
        self.search_and_analyze_with(self.cv.as_ref(), keywords, location, limit)
    }

    /// Fetch from every source, score against `cv` when given, persist,
    /// and return the postings best match first.
    pub fn search_and_analyze_with(
        &self,
        cv: Option<&CvIndex>,
        keywords: &str,
        location: &str,
        limit: usize,
    ) -> Result<Vec<JobPosting>> {
        info!("Searching for '{}' jobs in {}", keywords, location);
        let mut jobs = self.fetch_all(keywords, location, limit)?;
        info!("Found {} jobs", jobs.len());

        for job in &mut jobs {
            if cv.is_some() {
                job.match_score = Some(self.analyzer.score(cv, job));
            }
            self.db.save_job(job)?;
        }

        rank_postings(&mut jobs);
        Ok(jobs)
    }

    /// Query all sources concurrently; results keep source order.
    fn fetch_all(&self, keywords: &str, location: &str, limit: usize) -> Result<Vec<JobPosting>> {
        let batches: Vec<Result<Vec<JobPosting>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .sources
                .iter()
                .map(|source| scope.spawn(move || source.search(keywords, location, limit)))
                .collect();

            handles
                .into_iter()
                .zip(&self.sources)
                .map(|(handle, source)| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("{} search panicked", source.name())))
                })
                .collect()
        });

        let mut all = Vec::new();
        for (source, batch) in self.sources.iter().zip(batches) {
            let jobs = batch.with_context(|| format!("{} search failed", source.name()))?;
            info!("{}: {} jobs", source.name(), jobs.len());
            all.extend(jobs);
        }
        Ok(all)
    }

    pub fn generate_materials(&self, job_id: &str, cv_summary: &str) -> Result<Materials> {
        let jobs = self.db.list_jobs(DEFAULT_LIST_LIMIT)?;
        let Some(job) = jobs.into_iter().find(|j| j.id == job_id) else {
            warn!("Job {} not found among the {} most recent", job_id, DEFAULT_LIST_LIMIT);
            return Ok(Materials::not_found());
        };

        let letter = self.letters.generate(&job, cv_summary);
        if !letter.is_empty() {
            self.db.record_application(&job.id, &letter, "draft", None)?;
        }

        Ok(Materials::Generated(ApplicationMaterials {
            title: job.title,
            company: job.company,
            letter,
            url: job.url,
        }))
    }
}

/// Stable sort, best score first; unscored postings count as 0.
pub fn rank_postings(jobs: &mut [JobPosting]) {
    jobs.sort_by(|a, b| b.rank_score().total_cmp(&a.rank_score()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::testing::ScriptedProvider;
    use crate::ai::{AIProvider, HashingEmbedder};
    use crate::models::sample_posting;
    use crate::sources::ReedClient;
    use std::io::Write;
    use std::rc::Rc;

    struct FixedSource {
        name: &'static str,
        result: std::result::Result<Vec<JobPosting>, String>,
    }

    impl JobSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        fn search(&self, _keywords: &str, _location: &str, limit: usize) -> Result<Vec<JobPosting>> {
            match &self.result {
                Ok(jobs) => Ok(jobs.iter().take(limit).cloned().collect()),
                Err(e) => Err(anyhow!(e.clone())),
            }
        }
    }

    /// Answers with the score listed for whichever title appears in the prompt.
    struct ScoreByTitle(Vec<(&'static str, &'static str)>);

    impl AIProvider for ScoreByTitle {
        fn complete(&self, prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            self.0
                .iter()
                .find(|(title, _)| prompt.contains(&format!("Job Title: {}\n", title)))
                .map(|(_, answer)| answer.to_string())
                .ok_or_else(|| anyhow!("unexpected prompt"))
        }

        fn model_name(&self) -> &str {
            "score-by-title"
        }
    }

    fn posting(id: &str, title: &str, source: &str) -> JobPosting {
        let mut job = sample_posting(id, None);
        job.title = title.to_string();
        job.source = source.to_string();
        job
    }

    fn fixed(name: &'static str, jobs: Vec<JobPosting>) -> Box<dyn JobSource> {
        Box::new(FixedSource { name, result: Ok(jobs) })
    }

    fn agent_with(
        sources: Vec<Box<dyn JobSource>>,
        scorer: Box<dyn AIProvider>,
        writer: Box<dyn AIProvider>,
    ) -> JobSearchAgent {
        JobSearchAgent::new(
            Database::open_in_memory().unwrap(),
            sources,
            CvAnalyzer::new(scorer, Box::new(HashingEmbedder::default())),
            CoverLetterGenerator::new(writer),
        )
    }

    fn write_cv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn two_sources() -> Vec<Box<dyn JobSource>> {
        vec![
            fixed(
                "Reed",
                vec![
                    posting("reed_1", "Data Engineer", "Reed"),
                    posting("reed_2", "Rust Engineer", "Reed"),
                ],
            ),
            fixed(
                "Adzuna",
                vec![
                    posting("adzuna_1", "Go Developer", "Adzuna"),
                    posting("adzuna_2", "Platform Engineer", "Adzuna"),
                ],
            ),
        ]
    }

    #[test]
    fn test_rank_postings_example_order() {
        let mut jobs = vec![
            posting("reed_1", "A", "Reed"),
            posting("reed_2", "B", "Reed"),
            posting("adzuna_1", "C", "Adzuna"),
        ];
        jobs[0].match_score = Some(40.0);
        jobs[1].match_score = Some(81.0);

        rank_postings(&mut jobs);
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["reed_2", "reed_1", "adzuna_1"]);
    }

    #[test]
    fn test_search_without_cv_persists_unscored_in_source_order() {
        let scorer = Rc::new(ScriptedProvider::replying("99"));
        let agent = agent_with(
            two_sources(),
            Box::new(scorer.clone()),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );

        let jobs = agent.search_and_analyze("engineer", "London", 10).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["reed_1", "reed_2", "adzuna_1", "adzuna_2"]);
        assert!(jobs.iter().all(|j| j.match_score.is_none()));
        assert_eq!(scorer.calls(), 0);

        assert_eq!(agent.db().list_jobs(DEFAULT_LIST_LIMIT).unwrap().len(), 4);
    }

    #[test]
    fn test_search_with_cv_sorts_by_score_keeping_ties_in_order() {
        let scorer = ScoreByTitle(vec![
            ("Data Engineer", "Match score 40 - some overlap."),
            ("Rust Engineer", "81. Very strong match."),
            ("Go Developer", "40, similar story."),
            ("Platform Engineer", "I can't tell from the CV."),
        ]);
        let mut agent = agent_with(
            two_sources(),
            Box::new(scorer),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );
        let cv = write_cv("Rust and Kubernetes engineer, eight years.");
        agent.setup_cv(cv.path()).unwrap();

        let jobs = agent.search_and_analyze("engineer", "London", 10).unwrap();
        let ranked: Vec<(&str, Option<f64>)> =
            jobs.iter().map(|j| (j.id.as_str(), j.match_score)).collect();
        assert_eq!(
            ranked,
            vec![
                ("reed_2", Some(81.0)),
                ("reed_1", Some(40.0)),
                ("adzuna_1", Some(40.0)),
                ("adzuna_2", Some(0.0)),
            ]
        );

        let stored = agent.db().get_job("reed_2").unwrap().unwrap();
        assert_eq!(stored.match_score, Some(81.0));
    }

    #[test]
    fn test_search_passes_limit_to_every_source() {
        let agent = agent_with(
            two_sources(),
            Box::new(Rc::new(ScriptedProvider::replying("1"))),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );
        let jobs = agent.search_and_analyze("engineer", "London", 1).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["reed_1", "adzuna_1"]);
    }

    #[test]
    fn test_source_without_credentials_leaves_others_intact() {
        let sources: Vec<Box<dyn JobSource>> = vec![
            Box::new(ReedClient::new(None, reqwest::blocking::Client::new())),
            fixed("Adzuna", vec![posting("adzuna_9", "SRE", "Adzuna")]),
        ];
        let agent = agent_with(
            sources,
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );

        let jobs = agent.search_and_analyze("sre", "Leeds", 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "adzuna_9");
    }

    #[test]
    fn test_malformed_source_batch_aborts_search() {
        let sources: Vec<Box<dyn JobSource>> = vec![
            fixed("Reed", vec![posting("reed_1", "Data Engineer", "Reed")]),
            Box::new(FixedSource {
                name: "Adzuna",
                result: Err("missing field `redirect_url`".to_string()),
            }),
        ];
        let agent = agent_with(
            sources,
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );

        let err = agent.search_and_analyze("data", "London", 10).unwrap_err();
        assert!(format!("{:#}", err).contains("redirect_url"));
    }

    #[test]
    fn test_setup_cv_missing_path_is_error_and_keeps_previous() {
        let mut agent = agent_with(
            vec![],
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );
        assert!(agent.setup_cv(Path::new("/nonexistent/cv.pdf")).is_err());
        assert!(agent.cv().is_none());

        let short = write_cv("Rust engineer.");
        agent.setup_cv(short.path()).unwrap();
        assert_eq!(agent.cv().unwrap().len(), 1);

        let long = write_cv(&"Distributed systems and storage engines. ".repeat(40));
        agent.setup_cv(long.path()).unwrap();
        assert!(agent.cv().unwrap().len() > 1);

        assert!(agent.setup_cv(Path::new("/nonexistent/cv.txt")).is_err());
        assert!(agent.cv().unwrap().len() > 1);
    }

    #[test]
    fn test_generate_materials_unknown_job_is_not_found() {
        let writer = Rc::new(ScriptedProvider::replying("Dear team"));
        let agent = agent_with(
            two_sources(),
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(writer.clone()),
        );

        let materials = agent.generate_materials("reed_404", "summary").unwrap();
        assert_eq!(materials, Materials::not_found());
        assert_eq!(writer.calls(), 0);
        assert!(agent.db().list_applications(None).unwrap().is_empty());
    }

    #[test]
    fn test_generate_materials_for_stored_job() {
        let writer = Rc::new(ScriptedProvider::replying("Dear Ferrous team, ..."));
        let agent = agent_with(
            two_sources(),
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(writer.clone()),
        );
        agent.search_and_analyze("engineer", "London", 10).unwrap();

        let materials = agent
            .generate_materials("reed_2", "Full-stack developer with SaaS background")
            .unwrap();
        let Materials::Generated(materials) = materials else {
            panic!("expected generated materials");
        };
        assert_eq!(materials.title, "Rust Engineer");
        assert_eq!(materials.company, "Ferrous Ltd");
        assert_eq!(materials.letter, "Dear Ferrous team, ...");
        assert_eq!(materials.url, "https://jobs.example.com/reed_2");
        assert!(writer.prompts.borrow()[0].contains("Full-stack developer with SaaS background"));

        let apps = agent.db().list_applications(Some("reed_2")).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].status, "draft");
        assert!(agent.db().is_applied("reed_2").unwrap());
    }

    #[test]
    fn test_generate_materials_with_failed_letter() {
        let agent = agent_with(
            two_sources(),
            Box::new(Rc::new(ScriptedProvider::replying("50"))),
            Box::new(Rc::new(ScriptedProvider::failing())),
        );
        agent.search_and_analyze("engineer", "London", 10).unwrap();

        let Materials::Generated(materials) = agent.generate_materials("adzuna_1", "summary").unwrap()
        else {
            panic!("expected generated materials");
        };
        assert_eq!(materials.letter, "");
        assert!(agent.db().list_applications(None).unwrap().is_empty());
    }
}
