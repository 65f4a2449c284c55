//! service-core: shared infrastructure for the LLM relay service.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
