pub mod agent_config;
pub mod artifact;
pub mod audit;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod signature;
pub mod stage;
pub mod ui;
pub mod util;
