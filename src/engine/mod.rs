//! Orchestration and position lifecycle.

pub mod agent_client;
pub mod executor;
pub mod monitor;
pub mod reverse;
pub mod risk;
pub mod scanner;
pub mod scheduler;
pub mod store;
pub mod trailing;
