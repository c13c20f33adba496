pub mod auth;
pub mod bootstrap;
pub mod breaker;
pub mod cache;
pub mod engine;
pub mod error;
pub mod http_client;
pub mod ratelimit;
pub mod request;
pub mod resolver;
pub mod selector;
pub mod shape;
pub mod state;
pub mod stickiness;
pub mod wire;

pub use auth::{AdmissionContext, AuthStore};
pub use bootstrap::CliArgs;
pub use engine::{dispatch, DispatchBody, DispatchContext, DispatchOutcome};
pub use error::{ErrorKind, ProxyError};
pub use request::{ProxyRequest, RequiredCapabilities};
pub use state::AppState;
