pub mod agent;
pub mod aggregator;
pub mod config;
pub mod sink;
