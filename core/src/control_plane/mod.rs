pub mod audit;
pub mod http;
pub mod service;
pub mod stdio;

pub use http::{app, AppState};
pub use service::SandboxService;
