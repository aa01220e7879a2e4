//! Configuration module for h2fetch
//!
//! This module holds the immutable run configuration, loads the optional
//! TOML defaults file and validates the merged result.
//!
//! # Example
//!
//! ```no_run
//! use h2fetch::config::{config_from_file, load_file_config, validate};
//! use std::path::Path;
//!
//! let file = load_file_config(Path::new("h2fetch.toml")).unwrap();
//! let config = config_from_file(&file).unwrap();
//! validate(&config).unwrap();
//! println!("Requests per URI: {}", config.multiply);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, ConnectionSection, DataSource, FileConfig, HeaderOverrides, OutputSection,
    RequestSection, TlsSection, TlsSettings, DEFAULT_OUTPUT_UPPER_THRESHOLD, MAX_WINDOW_BITS,
};

// Re-export parser functions
pub use parser::{config_from_file, load_file_config, parse_header};
pub use validation::validate;
