// LLM prompt constants for the free critique and each premium product.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::catalog::ProductId;
use crate::llm_client::prompts::{fenced_document, GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};

const REVIEWER_ROLE: &str = "You are an experienced recruiter and professional resume reviewer.";

/// Free critique prompt. Replace `{grounding_instruction}` and `{resume}`.
const FREE_CRITIQUE_TEMPLATE: &str = r#"{grounding_instruction}

Give a short first-pass critique of the resume below.

Return a JSON object with this EXACT schema:
{
  "overall_score": 0-100 integer,
  "summary": "two or three sentences",
  "top_issues": ["the three most important problems"],
  "strengths": ["up to three genuine strengths"]
}

{resume}"#;

const RESUME_ANALYSIS_TEMPLATE: &str = r#"{grounding_instruction}

Perform a detailed, section-by-section analysis of the resume below.

Return a JSON object with this EXACT schema:
{
  "overall_score": 0-100 integer,
  "summary": "overall assessment",
  "categories": [
    {
      "name": "Impact & Metrics",
      "score": 0-100 integer,
      "issues": ["specific problem quoting the resume"],
      "improvements": ["concrete fix"]
    }
  ]
}

Cover at least these categories: Formatting, Impact & Metrics, Keywords & ATS, Clarity, Structure.

{resume}"#;

const JOB_FIT_TEMPLATE: &str = r#"{grounding_instruction}

Compare the resume with the job posting and judge how well the candidate fits.

Return a JSON object with this EXACT schema:
{
  "match_score": 0-100 integer,
  "summary": "overall fit assessment",
  "matched_skills": ["requirement the resume demonstrates"],
  "gaps": ["requirement the resume does not demonstrate"],
  "recommendations": ["how to close or address each gap"]
}

{resume}

{job_posting}"#;

const COVER_LETTER_TEMPLATE: &str = r#"{grounding_instruction}

Write a one-page cover letter for this candidate applying to the job posting.
Use a professional, specific tone and reference real experience from the resume.

Return a JSON object with this EXACT schema:
{
  "letter": "the full letter text with paragraphs separated by blank lines"
}

{resume}

{job_posting}"#;

const RESUME_REWRITE_TEMPLATE: &str = r#"{grounding_instruction}

Rewrite the resume below section by section: stronger verbs, quantified impact where
the resume already states numbers, consistent tense. Keep every fact unchanged.

Return a JSON object with this EXACT schema:
{
  "summary": "what changed and why",
  "sections": [
    {"title": "Experience", "rewritten": "the rewritten section text"}
  ]
}

{resume}

{job_posting}"#;

const MOCK_INTERVIEW_TEMPLATE: &str = r#"{grounding_instruction}

Prepare the candidate for an interview. Ask questions an interviewer would ask about
this resume (and the job posting, if one is given) and explain what a strong answer covers.

Return a JSON object with this EXACT schema:
{
  "categories": [
    {
      "name": "Behavioral",
      "questions": [
        {"question": "the question", "guidance": "what a strong answer covers"}
      ]
    }
  ]
}

Include Behavioral, Technical and Role-specific categories with at least three questions each.

{resume}

{job_posting}"#;

/// System prompt for every analysis call.
pub fn analysis_system() -> String {
    format!("{REVIEWER_ROLE} {JSON_ONLY_SYSTEM}")
}

pub fn free_critique_prompt(resume_text: &str) -> String {
    FREE_CRITIQUE_TEMPLATE
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{resume}", &fenced_document("resume", resume_text))
}

/// Builds the prompt for one premium product. Products that do not need a
/// job posting still receive it when present.
pub fn product_prompt(product: ProductId, resume_text: &str, job_posting: Option<&str>) -> String {
    let template = match product {
        ProductId::ResumeAnalysis => RESUME_ANALYSIS_TEMPLATE,
        ProductId::JobFitAnalysis => JOB_FIT_TEMPLATE,
        ProductId::CoverLetter => COVER_LETTER_TEMPLATE,
        ProductId::ResumeRewrite => RESUME_REWRITE_TEMPLATE,
        ProductId::MockInterview => MOCK_INTERVIEW_TEMPLATE,
    };
    let job_posting = job_posting
        .filter(|j| !j.trim().is_empty())
        .map(|j| fenced_document("job_posting", j))
        .unwrap_or_default();

    template
        .replace("{grounding_instruction}", GROUNDING_INSTRUCTION)
        .replace("{resume}", &fenced_document("resume", resume_text))
        .replace("{job_posting}", &job_posting)
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_product_prompt_fills_placeholders() {
        for product in ProductId::ALL {
            let prompt = product_prompt(product, "Jane Doe, Rust engineer", Some("Senior Rust role"));
            assert!(!prompt.contains("{resume}"), "{product}");
            assert!(!prompt.contains("{job_posting}"), "{product}");
            assert!(!prompt.contains("{grounding_instruction}"), "{product}");
            assert!(prompt.contains("Jane Doe, Rust engineer"));
        }
    }

    #[test]
    fn test_job_posting_is_included_when_given() {
        let prompt = product_prompt(ProductId::JobFitAnalysis, "resume", Some("We need Go"));
        assert!(prompt.contains("<job_posting>\nWe need Go\n</job_posting>"));
    }

    #[test]
    fn test_blank_job_posting_is_omitted() {
        let prompt = product_prompt(ProductId::ResumeRewrite, "resume", Some("   "));
        assert!(!prompt.contains("<job_posting>"));
    }

    #[test]
    fn test_free_prompt_asks_for_overall_score() {
        let prompt = free_critique_prompt("resume text");
        assert!(prompt.contains("overall_score"));
        assert!(prompt.contains("<resume>"));
    }
}
