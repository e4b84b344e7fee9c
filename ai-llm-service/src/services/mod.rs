//! Concrete provider services (enum-dispatched by the adapter).

pub mod anthropic_service;
pub mod gemini_service;
pub mod open_ai_service;

/// Structured-output rung used for one generation attempt. Each provider
/// maps these onto its own wire directives; `Freeform` always means "no
/// structured directive, parse best-effort".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredMode {
    /// Strict schema (OpenAI `json_schema`, Anthropic forced tool-use,
    /// Gemini `responseSchema`).
    JsonSchema,
    /// Loose "JSON object" directive without a schema.
    JsonObject,
    Freeform,
}
