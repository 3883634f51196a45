pub mod app;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod handlers;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod types;

pub use app::{create_router, AppState};
pub use config::Config;
pub use orchestrator::ListMessagesService;
