pub mod broadcast;
pub mod config;
pub mod downstream;
pub mod logger;
pub mod registry;
pub mod state;
