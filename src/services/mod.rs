pub mod config_gateway;
pub mod export;
pub mod host;
pub mod library;
pub mod params;
pub mod progress;
pub mod providers;
pub mod reconciler;
pub mod setup;
pub mod state;
pub mod workflow;
