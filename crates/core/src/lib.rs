//! Core crate for the clipforge task engine.

pub mod config;
pub mod cut;
pub mod error;
pub mod idgen;
pub mod logging;
pub mod runtime;
pub mod service;
pub mod task;
pub mod tasks;
