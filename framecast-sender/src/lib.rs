//! # framecast-sender: test-pattern sender service
//!
//! Drives a `framecast_core::FramePipeline` over the CPU software device
//! and streams the converted frames over UDP to a receiver.
//!
//! ## Modes
//!
//! - **Continuous** (default): non-blocking drains, one fence per tick.
//! - **Discrete** (`--discrete`): every tick is flushed before the next.

pub mod config;
pub mod pattern;
pub mod service;
