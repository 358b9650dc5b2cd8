pub mod canonical;
pub mod config;
pub mod error;
pub mod intent;
pub mod sections;
pub mod types;
pub mod validate;

pub use canonical::{canonicalize_url, normalize_idea, reel_hash, request_hash};
pub use config::{AnalysisMode, AppConfig, ImageProvider};
pub use error::{ServiceError, ServiceResult};
pub use intent::{IntentParser, IntentType, Intensity, ParsedIntent, Polarity};
pub use sections::ScriptSections;
pub use types::{
    AccessStatus, DatasetRecord, GenerationMode, JobPayload, JobRecord, JobStatus,
    ReelAnalysis, ReelAnalysisRecord, ScriptRecord, SessionContext, SessionState, ToneHint,
    UserRecord,
};
