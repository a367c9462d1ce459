// Item generation: prompts, retries with corrective directives, repair calls,
// the static fallback bank and the grammar baseline diff.
// All model calls go through llm_client::TextGenerator.

pub mod diff;
pub mod directives;
pub mod fallback;
pub mod manuals;
pub mod orchestrator;
pub mod parse;
pub mod prompts;
pub mod settings;
pub mod slots;

#[cfg(test)]
pub mod fake;
