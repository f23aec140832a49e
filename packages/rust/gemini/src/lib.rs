//! Generative API boundary for PostScout.
//!
//! [`EnrichmentApi`] is the seam the live worker and batch manager call
//! through; [`GeminiClient`] implements it over the Gemini REST API.

mod api;
mod client;

pub use api::{BatchRequest, BatchResultLine, EnrichmentApi};
pub use client::{GeminiClient, parse_job_state, parse_results_file};
