//! Shared domain types for the webforge core: errors, conversation
//! messages, tool definitions, stream events, paths, and configuration.

pub mod cancel;
pub mod config;
pub mod error;
pub mod path;
pub mod stream;
pub mod tool;

pub use cancel::CancelToken;
pub use error::{Error, ErrorKind, Result};
