pub mod adb;
pub mod backend;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod mass;
pub mod models;
pub mod operations;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
pub mod testing;
