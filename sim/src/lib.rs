pub mod config;
pub mod core;
pub mod parameters;
pub mod runner;
pub mod scenario;
