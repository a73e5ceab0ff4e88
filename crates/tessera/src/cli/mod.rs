//! CLI module for Tessera
//!
//! Each command file parses its own arguments and talks to the engine
//! through an [`context::AppContext`].

pub mod error;
pub mod output;

// Configuration and context
pub mod config;
pub mod context;
pub mod manifest;

// Commands
pub mod entity;
pub mod lock;
pub mod publish;
pub mod schema;

pub use error::HelpfulError;
