//! mixbot-rs library crate
//!
//! This module exposes internal types for integration testing.
//! The main binary is in main.rs.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod cache;
pub mod config;
pub mod constants;
pub mod decode;
pub mod effects;
pub mod error;
pub mod event;
pub mod fetch;
pub mod mixer;
pub mod net;
pub mod queue;
pub mod session;
pub mod source;
pub mod stdin;
pub mod youtube;
