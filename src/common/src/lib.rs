pub mod cli;
pub mod config;
pub mod model;
pub mod relabel;

pub use config::Configuration;
