//! Headless host: runs one generation job against a live server and writes
//! the placed layers to disk.

pub mod config;
pub mod output;
