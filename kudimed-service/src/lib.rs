pub mod config;
pub mod db;
pub mod models;
pub mod service;
pub mod telemetry;
pub mod triage;
pub mod workflow;

pub use config::ServiceConfig;
pub use db::{Database, StoreError};
pub use service::{AppState, build_router, create_app};
pub use workflow::create_flow_runner;
