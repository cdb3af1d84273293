pub mod backend;
pub mod config;
pub mod consts;
pub mod definition;
pub mod engine;
pub mod events;
pub mod metrics;
pub mod report;
pub mod spinner;
