// Shared prompt fragments.
// Each service that needs LLM calls defines its own prompts.rs alongside it;
// this file holds the pieces every analysis prompt repeats.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Keeps every answer tied to what the candidate actually wrote.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Base every statement on the resume text provided. \
    Do NOT invent employers, dates, degrees, metrics or skills that are not in the resume. \
    When the resume lacks information, say so instead of filling the gap.";

/// Wraps untrusted document text so instructions inside it are not followed.
pub fn fenced_document(label: &str, text: &str) -> String {
    format!("<{label}>\n{}\n</{label}>", text.trim())
}
