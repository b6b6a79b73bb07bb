//! Library crate for port-scan-rs exposing the scan engine and its supporting modules.
pub mod clock;
pub mod config;
pub mod error;
pub mod netdetect;
pub mod observer;
pub mod ports;
pub mod probe;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod server;
pub mod session;
pub mod types;
