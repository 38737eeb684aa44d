//! Format-neutral view of an analysis' visible results.
//!
//! HTML, DOCX and PDF output all walk the same sections, so every format
//! shows the same content and the same failure notices.

use crate::analysis::results::{AnalysisOutcome, FreeCritique, ProductResult};
use crate::catalog::ProductId;
use crate::models::analysis::PremiumStatus;
use crate::payments::pipeline::ResultsView;

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading(String),
    Paragraph(String),
    Bullet(String),
    Score { label: String, value: u8 },
    /// Generation did not produce this part; a retry is possible.
    Failed(String),
    /// Still being generated.
    Pending(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    /// `None` for the free critique.
    pub product: Option<ProductId>,
    pub title: String,
    pub blocks: Vec<Block>,
}

impl Section {
    pub fn anchor(&self) -> &'static str {
        self.product.map_or("free_critique", ProductId::as_str)
    }
}

const FAILED_NOTICE: &str = "Generation failed. A retry is available.";

fn bullets(blocks: &mut Vec<Block>, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    blocks.push(Block::Heading(heading.to_string()));
    blocks.extend(items.iter().map(|i| Block::Bullet(i.clone())));
}

fn free_blocks(critique: &FreeCritique) -> Vec<Block> {
    let mut blocks = vec![
        Block::Score {
            label: "Overall score".to_string(),
            value: critique.overall_score,
        },
        Block::Paragraph(critique.summary.clone()),
    ];
    bullets(&mut blocks, "Top issues", &critique.top_issues);
    bullets(&mut blocks, "Strengths", &critique.strengths);
    blocks
}

fn product_blocks(result: &ProductResult) -> Vec<Block> {
    let mut blocks = Vec::new();
    match result {
        ProductResult::ResumeAnalysis(critique) => {
            blocks.push(Block::Score {
                label: "Overall score".to_string(),
                value: critique.overall_score,
            });
            blocks.push(Block::Paragraph(critique.summary.clone()));
            for category in &critique.categories {
                blocks.push(Block::Score {
                    label: category.name.clone(),
                    value: category.score,
                });
                blocks.extend(category.issues.iter().map(|i| Block::Bullet(i.clone())));
                bullets(&mut blocks, "Improvements", &category.improvements);
            }
        }
        ProductResult::JobFitAnalysis(fit) => {
            blocks.push(Block::Score {
                label: "Match score".to_string(),
                value: fit.match_score,
            });
            blocks.push(Block::Paragraph(fit.summary.clone()));
            bullets(&mut blocks, "Matched skills", &fit.matched_skills);
            bullets(&mut blocks, "Gaps", &fit.gaps);
            bullets(&mut blocks, "Recommendations", &fit.recommendations);
        }
        ProductResult::CoverLetter(letter) => {
            blocks.extend(
                letter
                    .letter
                    .split("\n\n")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Block::Paragraph(p.to_string())),
            );
        }
        ProductResult::ResumeRewrite(rewrite) => {
            if !rewrite.summary.is_empty() {
                blocks.push(Block::Paragraph(rewrite.summary.clone()));
            }
            for section in &rewrite.sections {
                blocks.push(Block::Heading(section.title.clone()));
                blocks.extend(
                    section
                        .rewritten
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(|l| Block::Paragraph(l.to_string())),
                );
            }
        }
        ProductResult::MockInterview(prep) => {
            for category in &prep.categories {
                blocks.push(Block::Heading(category.name.clone()));
                for q in &category.questions {
                    blocks.push(Block::Bullet(q.question.clone()));
                    if !q.guidance.is_empty() {
                        blocks.push(Block::Paragraph(q.guidance.clone()));
                    }
                }
            }
        }
    }
    blocks
}

/// Builds the sections in display order: free critique first, then each
/// visible premium product in catalog order.
pub fn build_sections(view: &ResultsView) -> Vec<Section> {
    let mut sections = Vec::new();

    let free = match &view.free_result {
        Some(AnalysisOutcome::Ok { result }) => free_blocks(result),
        Some(AnalysisOutcome::Error { .. }) => vec![Block::Failed(
            "The free critique could not be generated.".to_string(),
        )],
        None => vec![Block::Pending("The free critique is not available yet.".to_string())],
    };
    sections.push(Section {
        product: None,
        title: "Free Resume Critique".to_string(),
        blocks: free,
    });

    for result in &view.premium_results {
        let blocks = match (&result.status, &result.outcome) {
            (PremiumStatus::Ready, Some(AnalysisOutcome::Ok { result })) => product_blocks(result),
            (PremiumStatus::Pending, _) => vec![Block::Pending("Still generating.".to_string())],
            _ => vec![Block::Failed(FAILED_NOTICE.to_string())],
        };
        sections.push(Section {
            product: Some(result.product),
            title: result.product.display_name().to_string(),
            blocks,
        });
    }
    sections
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::analysis::results::{CoverLetter, OutcomeErrorKind};
    use crate::models::analysis::{GenerationStatus, PaymentStatus, PremiumResult};

    /// A paid view with a ready cover letter and a failed mock interview.
    pub(crate) fn sample_view() -> ResultsView {
        ResultsView {
            analysis_id: Uuid::nil(),
            file_name: "cv.pdf".to_string(),
            payment_status: PaymentStatus::Paid,
            generation_status: GenerationStatus::Partial,
            free_result: Some(AnalysisOutcome::Ok {
                result: FreeCritique {
                    overall_score: 58,
                    summary: "Needs <stronger> verbs & metrics".to_string(),
                    top_issues: vec!["Passive voice".to_string()],
                    strengths: Vec::new(),
                },
            }),
            requested_products: vec![ProductId::CoverLetter, ProductId::MockInterview],
            premium_results: vec![
                PremiumResult {
                    product: ProductId::CoverLetter,
                    status: PremiumStatus::Ready,
                    outcome: Some(AnalysisOutcome::Ok {
                        result: ProductResult::CoverLetter(CoverLetter {
                            letter: "Dear team,\n\nI build payment systems.".to_string(),
                        }),
                    }),
                    updated_at: Utc::now(),
                },
                PremiumResult {
                    product: ProductId::MockInterview,
                    status: PremiumStatus::Failed,
                    outcome: Some(AnalysisOutcome::failed(OutcomeErrorKind::Timeout, "slow")),
                    updated_at: Utc::now(),
                },
            ],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_sections_follow_results() {
        let sections = build_sections(&sample_view());
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].anchor(), "free_critique");
        assert_eq!(
            sections[1].blocks,
            vec![
                Block::Paragraph("Dear team,".to_string()),
                Block::Paragraph("I build payment systems.".to_string()),
            ]
        );
        assert_eq!(sections[2].blocks, vec![Block::Failed(FAILED_NOTICE.to_string())]);
    }

    #[test]
    fn test_scores_come_from_the_result() {
        let sections = build_sections(&sample_view());
        assert!(sections[0].blocks.contains(&Block::Score {
            label: "Overall score".to_string(),
            value: 58,
        }));
    }
}
