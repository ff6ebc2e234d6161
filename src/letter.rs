use tracing::error;

use crate::ai::AIProvider;
use crate::models::JobPosting;

const LETTER_TEMPERATURE: f32 = 0.7;
const LETTER_MAX_TOKENS: u32 = 1024;

pub const COVER_LETTER_TEMPLATE: &str = "You are a professional cover letter writer. Create a compelling cover letter based on:

Job Details:
- Position: {job_title}
- Company: {company}
- Requirements: {requirements}

Candidate Background:
{cv_summary}

Key Instructions:
1. Make it specific to this role and company
2. Highlight relevant experience and skills
3. Show enthusiasm for the position
4. Keep it professional but personable
5. Maximum 300 words

Cover Letter:";

pub struct CoverLetterGenerator {
    provider: Box<dyn AIProvider>,
}

impl CoverLetterGenerator {
    pub fn new(provider: Box<dyn AIProvider>) -> Self {
        Self { provider }
    }

    /// Draft a letter for `job`. Returns an empty string if generation fails.
    pub fn generate(&self, job: &JobPosting, cv_summary: &str) -> String {
        let prompt = render_prompt(job, cv_summary);
        match self
            .provider
            .complete(&prompt, LETTER_MAX_TOKENS, LETTER_TEMPERATURE)
        {
            Ok(letter) => letter.trim().to_string(),
            Err(e) => {
                error!("Error generating cover letter for {}: {:#}", job.id, e);
                String::new()
            }
        }
    }
}

pub fn render_prompt(job: &JobPosting, cv_summary: &str) -> String {
    COVER_LETTER_TEMPLATE
        .replace("{job_title}", &job.title)
        .replace("{company}", &job.company)
        .replace("{requirements}", &job.requirements)
        .replace("{cv_summary}", cv_summary)
}
