//! Shared LLM service for the review pipeline.
//!
//! Multiplexes structured-JSON analysis calls over four provider families
//! (OpenAI, OpenAI-compatible, Anthropic, Gemini) with:
//!
//! - a schema → JSON-object → freeform fallback ladder per provider;
//! - response normalisation into the review schema (never throws on a
//!   well-formed model reply, however sloppy);
//! - an LRU cache of OpenAI-family clients keyed by credential digest;
//! - a process-wide concurrency limiter with drain-on-shutdown;
//! - resilient health probes suitable for a `/health?deep=1` endpoint.
//!
//! No async-trait and no heap trait objects; provider dispatch is enum-based.

pub mod adapter;
pub mod client_cache;
pub mod config;
pub mod error_handler;
pub mod health_service;
pub mod limiter;
pub mod schema;
pub mod services;
pub mod telemetry;

pub use adapter::ProviderAdapter;
pub use config::llm_model_config::LlmModelConfig;
pub use config::llm_provider::LlmProvider;
pub use error_handler::AiLlmError;
pub use health_service::HealthReport;
pub use limiter::AiLimiter;
pub use schema::{LineSide, ReviewIssue, ReviewResult, Severity};
