//! Request and response models for the LLM service.

pub mod requests;
pub mod response;

pub use requests::{GenerationRequest, MaterialRequest};
pub use response::Response;
