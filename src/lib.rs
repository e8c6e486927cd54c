pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod translate;

pub use backend::{Backend, BackendReply, HttpBackend};
pub use config::BridgeConfig;
pub use error::{ProxyError, Result};
pub use logging::SharedLogger;
pub use server::{build_router, AppState};
pub use translate::{normalize_request, Dialect, EventSequencer};
