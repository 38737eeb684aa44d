//! Structured analysis results and the parser that turns model answers into them.
//!
//! Every stored result is an `AnalysisOutcome`: either the parsed shape for its
//! product, or a tagged error carrying the raw model answer when there was one.
//! Scores come only from the model; a missing or out-of-range score makes the
//! answer malformed rather than being replaced by a constant.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

use crate::catalog::ProductId;
use crate::llm_client::strip_json_fences;

// ────────────────────────────────────────────────────────────────────────────
// Outcome envelope
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeErrorKind {
    /// The model call exceeded the per-product time bound.
    Timeout,
    /// The LLM API failed (HTTP error, 5xx after retries, empty content).
    Upstream,
    /// The model answered, but not in the expected shape.
    MalformedOutput,
    /// The product needs a job posting and none was supplied.
    MissingJobPosting,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisOutcome<T> {
    Ok {
        result: T,
    },
    Error {
        kind: OutcomeErrorKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw: Option<String>,
    },
}

impl<T> AnalysisOutcome<T> {
    pub fn failed(kind: OutcomeErrorKind, message: impl Into<String>) -> Self {
        AnalysisOutcome::Error {
            kind,
            message: message.into(),
            raw: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AnalysisOutcome::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<OutcomeErrorKind> {
        match self {
            AnalysisOutcome::Ok { .. } => None,
            AnalysisOutcome::Error { kind, .. } => Some(*kind),
        }
    }
}

pub type FreeOutcome = AnalysisOutcome<FreeCritique>;
pub type ProductOutcome = AnalysisOutcome<ProductResult>;

// ────────────────────────────────────────────────────────────────────────────
// Shapes
// ────────────────────────────────────────────────────────────────────────────

/// Free-tier critique shown right after upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeCritique {
    #[serde(deserialize_with = "deserialize_score")]
    pub overall_score: u8,
    pub summary: String,
    #[serde(default)]
    pub top_issues: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFeedback {
    pub name: String,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: u8,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeCritique {
    #[serde(deserialize_with = "deserialize_score")]
    pub overall_score: u8,
    pub summary: String,
    pub categories: Vec<CategoryFeedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFit {
    #[serde(deserialize_with = "deserialize_score")]
    pub match_score: u8,
    pub summary: String,
    #[serde(default)]
    pub matched_skills: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverLetter {
    pub letter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewrittenSection {
    pub title: String,
    pub rewritten: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeRewrite {
    #[serde(default)]
    pub summary: String,
    pub sections: Vec<RewrittenSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub question: String,
    #[serde(default)]
    pub guidance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionCategory {
    pub name: String,
    pub questions: Vec<InterviewQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewPrep {
    pub categories: Vec<QuestionCategory>,
}

/// A premium result, tagged with the product that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "product", content = "data", rename_all = "snake_case")]
pub enum ProductResult {
    ResumeAnalysis(ResumeCritique),
    JobFitAnalysis(JobFit),
    CoverLetter(CoverLetter),
    ResumeRewrite(ResumeRewrite),
    MockInterview(InterviewPrep),
}

impl ProductResult {
    pub fn product(&self) -> ProductId {
        match self {
            ProductResult::ResumeAnalysis(_) => ProductId::ResumeAnalysis,
            ProductResult::JobFitAnalysis(_) => ProductId::JobFitAnalysis,
            ProductResult::CoverLetter(_) => ProductId::CoverLetter,
            ProductResult::ResumeRewrite(_) => ProductId::ResumeRewrite,
            ProductResult::MockInterview(_) => ProductId::MockInterview,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validation
// ────────────────────────────────────────────────────────────────────────────

/// Checks that serde cannot express (non-empty lists, non-blank prose).
trait Validate {
    fn validate(&self) -> Result<(), String>;
}

impl Validate for FreeCritique {
    fn validate(&self) -> Result<(), String> {
        non_blank("summary", &self.summary)
    }
}

impl Validate for ResumeCritique {
    fn validate(&self) -> Result<(), String> {
        non_blank("summary", &self.summary)?;
        if self.categories.is_empty() {
            return Err("critique has no categories".to_string());
        }
        Ok(())
    }
}

impl Validate for JobFit {
    fn validate(&self) -> Result<(), String> {
        non_blank("summary", &self.summary)
    }
}

impl Validate for CoverLetter {
    fn validate(&self) -> Result<(), String> {
        non_blank("letter", &self.letter)
    }
}

impl Validate for ResumeRewrite {
    fn validate(&self) -> Result<(), String> {
        if self.sections.is_empty() {
            return Err("rewrite has no sections".to_string());
        }
        Ok(())
    }
}

impl Validate for InterviewPrep {
    fn validate(&self) -> Result<(), String> {
        if self.categories.iter().all(|c| c.questions.is_empty()) {
            return Err("interview prep has no questions".to_string());
        }
        Ok(())
    }
}

fn non_blank(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} is empty"))
    } else {
        Ok(())
    }
}

/// Accepts integer or float scores in 0..=100; anything else is a parse error.
fn deserialize_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if !(0.0..=100.0).contains(&value) {
        return Err(serde::de::Error::custom(format!(
            "score {value} is outside 0..=100"
        )));
    }
    Ok(value.round() as u8)
}

// ────────────────────────────────────────────────────────────────────────────
// Parsing model answers
// ────────────────────────────────────────────────────────────────────────────

fn parse_shape<T: DeserializeOwned + Validate>(json: &str) -> Result<T, String> {
    let value: T = serde_json::from_str(json).map_err(|e| e.to_string())?;
    value.validate()?;
    Ok(value)
}

fn malformed<T>(raw: &str, reason: String) -> AnalysisOutcome<T> {
    AnalysisOutcome::Error {
        kind: OutcomeErrorKind::MalformedOutput,
        message: format!("The AI answer could not be read: {reason}"),
        raw: Some(raw.to_string()),
    }
}

pub fn parse_free_answer(raw: &str) -> FreeOutcome {
    match parse_shape::<FreeCritique>(strip_json_fences(raw)) {
        Ok(result) => AnalysisOutcome::Ok { result },
        Err(reason) => malformed(raw, reason),
    }
}

/// Parses a premium answer into the shape for `product`.
/// A cover letter may come back as plain prose instead of JSON; that is accepted.
pub fn parse_product_answer(product: ProductId, raw: &str) -> ProductOutcome {
    let json = strip_json_fences(raw);
    let parsed = match product {
        ProductId::ResumeAnalysis => parse_shape(json).map(ProductResult::ResumeAnalysis),
        ProductId::JobFitAnalysis => parse_shape(json).map(ProductResult::JobFitAnalysis),
        ProductId::CoverLetter => parse_shape::<CoverLetter>(json)
            .or_else(|reason| {
                if json.starts_with('{') || json.starts_with('[') {
                    Err(reason)
                } else {
                    let letter = CoverLetter {
                        letter: json.to_string(),
                    };
                    letter.validate().map(|_| letter)
                }
            })
            .map(ProductResult::CoverLetter),
        ProductId::ResumeRewrite => parse_shape(json).map(ProductResult::ResumeRewrite),
        ProductId::MockInterview => parse_shape(json).map(ProductResult::MockInterview),
    };

    match parsed {
        Ok(result) => AnalysisOutcome::Ok { result },
        Err(reason) => malformed(raw, reason),
    }
}
