pub mod client;
pub mod error;
pub mod schema;
pub mod types;

pub use client::{GenAiClient, GENERATOR_VERSION};
pub use error::{GenAiError, Result};
pub use schema::StructuredOutput;
pub use types::{MediaPart, VideoAnalysis};
