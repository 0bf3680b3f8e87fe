/// Extraction engine: cost-routed text extraction, classification, field
/// extraction, and the template cache
pub mod classify;
pub mod fields;
pub mod llm;
pub mod pdf_text;
pub mod router;
pub mod template;

pub use llm::{HttpLlmClient, LlmClient, LlmGovernor};
pub use router::{ExtractorRouter, TextExtraction};
pub use template::{TemplateCache, TemplateKey, TemplateRecipe};
