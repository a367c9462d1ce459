// Shared prompt constants.
// Per-item-type blueprints live in generation/prompts.rs.

/// System prompt that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// System prompt for the out-of-band repair call.
pub const REPAIR_SYSTEM: &str = "You repair malformed JSON produced by another model. \
    Return the same content as one valid JSON object. \
    Keep every field and value; only fix syntax and the listed problem.";

/// Appended to every item prompt.
pub const FIDELITY_INSTRUCTION: &str = "\
    CRITICAL: Quote the passage exactly as given. Do NOT summarise, reorder or drop sentences \
    unless the item format requires a marked change. Every explanation and option reason \
    must be written in Korean.";
