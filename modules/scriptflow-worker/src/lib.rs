pub mod context;
pub mod copy_mode;
pub mod deadline;
pub mod fallback;
pub mod pipeline;
pub mod prompts;
pub mod traits;

pub use context::{partition_prior_scripts, PriorContext};
pub use copy_mode::transcript_to_sections;
pub use deadline::Deadline;
pub use fallback::{fallback_script, FALLBACK_MARKER};
pub use pipeline::{mint_public_id_with, random_public_id, PipelineWorker, WorkerConfig};
pub use traits::{
    CardRenderer, ImageHost, MediaAttachment, MediaPipeline, Messenger, NoopRenderer,
    ScriptGenerator, VideoSource,
};
