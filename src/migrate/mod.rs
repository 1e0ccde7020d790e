pub mod audit;
pub mod config;
pub mod current;
pub mod journal;
pub mod legacy;
pub mod listing;
pub mod orchestrator;
pub mod paths;
pub mod properties;
pub mod session;
pub mod settings;
pub mod store;
pub mod util;
pub mod writer;
