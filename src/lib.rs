// Library surface for the binary, headless integration tests and reuse.
pub mod app;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod logging;
pub mod parameters;
pub mod peer;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod ui;

pub use error::{Error, Result};
