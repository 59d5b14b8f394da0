//! cascade - a SASS build tool with a live-reloading dev server.
//!
//! A fixed task graph compiles `.scss` sources to vendor-prefixed CSS,
//! serves the project directory over HTTP, and pushes reload signals to
//! connected browsers when a source file changes.

pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod server;
pub mod tasks;
pub mod watch;
