//! Configuration management for spindle.
//!
//! Runner defaults and spawn options are read from a TOML file and turned into
//! the types the engine takes.
//!
//! # Usage
//!
//! ```rust
//! use spindle_config::SpindleConfig;
//! use std::time::Duration;
//!
//! let config = SpindleConfig::from_toml(
//!     r#"
//!     [runner]
//!     timeout_secs = 2.5
//!
//!     [spawn]
//!     cwd = "/tmp"
//!     "#,
//! )
//! .unwrap();
//!
//! let runner = config.to_runner_config();
//! assert_eq!(runner.timeout, Some(Duration::from_millis(2500)));
//! ```

pub mod config;
pub mod error;
pub mod prelude;

pub use config::{RunnerSection, SpawnSection, SpindleConfig};
