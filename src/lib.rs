#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod backup;
pub mod capability;
pub mod code;
pub mod config;
pub mod error;
pub mod identity;
pub mod image;
pub mod locate;
pub mod lock;
pub mod orchestrator;
pub mod patcher;
pub mod pattern;
pub mod scan;
pub mod system;
pub mod version;

pub use error::EngineError;
pub use orchestrator::{Orchestrator, Report, Request, Stage};
