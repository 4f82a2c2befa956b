//! Command-line front end for threadgraph
//!
//! Runs the prebuilt agents against a SQLite checkpoint store with an offline
//! model, so threads can be created, resumed, inspected and forked from a
//! terminal.

pub mod commands;
pub mod config;
pub mod demo;

pub use config::{ConfigError, ConfigLoader, ConfigOverrides, ThreadgraphConfig};
pub use demo::{build_engine, demo_tools, Agent, EchoModel};
