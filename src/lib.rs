pub mod assistant;
pub mod broker;
pub mod capture;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod mqtt;
pub mod protocol;
pub mod registry;
pub mod translator;
pub mod types;
