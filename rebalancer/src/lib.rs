pub mod bootstrap;
pub mod config;
pub mod pipeline;
pub mod services;
pub mod telemetry;
