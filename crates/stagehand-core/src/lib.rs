pub mod checks;
pub mod config;
pub mod driver;
pub mod executors;
pub mod migration;
pub mod models;
pub mod orchestration;
pub mod persistence;
pub mod service;
pub mod sqlite;
