//! Usage agent: runs the refresh loop and serves health and metrics over HTTP

pub mod api;
pub mod config;
