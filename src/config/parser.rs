use crate::config::types::{Config, DataSource, FileConfig, TlsSettings};
use crate::{ConfigError, ConfigResult};
use std::path::Path;
use std::time::Duration;

/// Loads and parses an optional defaults file
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(FileConfig)` - Successfully parsed file
/// * `Err(ConfigError)` - Failed to read or parse the file
pub fn load_file_config(path: &Path) -> ConfigResult<FileConfig> {
    let content = std::fs::read_to_string(path)?;
    let file: FileConfig = toml::from_str(&content)?;
    Ok(file)
}

/// Builds a runtime configuration from a parsed defaults file
///
/// Header entries are parsed with [`parse_header`]; validation is left to
/// the caller once command-line overrides have been applied.
pub fn config_from_file(file: &FileConfig) -> ConfigResult<Config> {
    let mut config = Config {
        null_out: file.output.null_out,
        get_assets: file.output.get_assets,
        stat: file.output.stat,
        timeout: file.connection.timeout.map(Duration::from_secs),
        window_bits: file.connection.window_bits,
        data: file.request.data.as_deref().map(DataSource::from_arg),
        tls: TlsSettings {
            cert_file: file.tls.cert.clone(),
            key_file: file.tls.key.clone(),
            disabled: file.tls.disabled,
        },
        ..Config::default()
    };

    if let Some(multiply) = file.request.multiply {
        config.multiply = multiply;
    }
    if let Some(limit) = file.connection.output_buffer_limit {
        config.output_upper_threshold = limit;
    }
    for raw in &file.request.headers {
        let (name, value) = parse_header(raw)?;
        config.headers.insert(name, value);
    }

    Ok(config)
}

/// Parses a `name: value` header override
///
/// The name is everything before the first colon and must be non-empty;
/// leading whitespace is stripped from the value, which must then be
/// non-empty too.
///
/// # Example
///
/// ```
/// use h2fetch::config::parse_header;
///
/// let (name, value) = parse_header("X-Trace:   on").unwrap();
/// assert_eq!(name, "X-Trace");
/// assert_eq!(value, "on");
/// ```
pub fn parse_header(raw: &str) -> ConfigResult<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader(raw.to_string()))?;

    if name.is_empty() {
        return Err(ConfigError::InvalidHeader(raw.to_string()));
    }

    let value = value.trim_start();
    if value.is_empty() {
        return Err(ConfigError::InvalidHeader(format!(
            "{} (value missing)",
            raw
        )));
    }

    Ok((name.to_string(), value.to_string()))
}
