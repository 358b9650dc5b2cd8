use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use scriptflow_cache::KvStore;
use scriptflow_common::AppConfig;
use scriptflow_runtime::{
    AccessGate, BreakerRegistry, JobQueue, SessionManager, Telemetry, VariationCounter,
};
use scriptflow_store::DocumentStore;
use scriptflow_worker::Messenger;

/// Singleton services, created at boot and wired explicitly. No globals.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub kv: Arc<dyn KvStore>,
    pub gate: AccessGate,
    pub sessions: Arc<SessionManager>,
    pub variations: VariationCounter,
    pub queue: Arc<JobQueue>,
    pub breakers: Arc<BreakerRegistry>,
    pub telemetry: Arc<Telemetry>,
    pub messenger: Arc<dyn Messenger>,
    pub ip_limiter: Mutex<HashMap<IpAddr, Vec<Instant>>>,
}
