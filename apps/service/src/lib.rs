pub mod alerts;
pub mod config;
pub mod database;
pub mod engine;
pub mod ingress;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod runtime;

pub use config::Config;
pub use runtime::Services;
