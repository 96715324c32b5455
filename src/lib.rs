//! Campaign Query: natural-language intent extraction and filter resolution
//! for email-campaign reporting.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;

pub use config::QueryConfig;
pub use pipeline::{QueryProcessor, Strategy};
