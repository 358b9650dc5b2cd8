pub mod breaker;
pub mod gate;
pub mod queue;
pub mod session;
pub mod telemetry;
pub mod variation;

pub use breaker::{Breaker, BreakerConfig, BreakerEvent, BreakerRegistry, BreakerState};
pub use gate::{AccessGate, Admission, GateOutcome};
pub use queue::{
    EnqueueOutcome, JobProcessor, JobQueue, ProgressReporter, QueueConfig, QueueEvent,
};
pub use session::{IdeaNovelty, SessionManager};
pub use telemetry::Telemetry;
pub use variation::{VariationCounter, VariationTicket};
