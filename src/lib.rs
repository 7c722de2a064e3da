//! # cgb-overseer
//!
//! A single-instance companion process for post-build steps. The first launch starts the
//! [`shell::Shell`], which tracks the invoking applications, deploys their assets and shows
//! a message list. Every later launch hands its command line to that Shell and exits.

pub mod config;
pub mod coordinator;
pub mod deploy;
pub mod instance;
pub mod invariant_ppt;
pub mod invocation;
pub mod message;
pub mod shell;
