pub mod downloader;
pub mod error;
pub mod frames;
pub mod probe;
pub mod render;
pub mod upload;

pub use downloader::{sanitize_name, Downloader};
pub use error::{classify_downloader_stderr, MediaError, Result};
pub use frames::{planned_frame_count, sample_fps, Extractor, MAX_FRAMES};
pub use probe::Prober;
pub use render::{RenderClient, RenderRequest};
pub use upload::{ImageUploader, UploadTarget};
