use crate::config::types::{Config, HeaderOverrides, TlsSettings, MAX_WINDOW_BITS};
use crate::ConfigError;
use http::header::{HeaderName, HeaderValue};

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_request_settings(config)?;
    validate_connection_settings(config)?;
    validate_headers(&config.headers)?;
    validate_tls_settings(&config.tls)?;
    Ok(())
}

fn validate_request_settings(config: &Config) -> Result<(), ConfigError> {
    if config.multiply < 1 {
        return Err(ConfigError::Validation(format!(
            "multiply must be >= 1, got {}",
            config.multiply
        )));
    }
    Ok(())
}

fn validate_connection_settings(config: &Config) -> Result<(), ConfigError> {
    if let Some(bits) = config.window_bits {
        if bits > MAX_WINDOW_BITS {
            return Err(ConfigError::Validation(format!(
                "window bits must be in the range [0, {}], got {}",
                MAX_WINDOW_BITS, bits
            )));
        }
    }

    if config.output_upper_threshold == 0 {
        return Err(ConfigError::Validation(
            "output buffer limit must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Checks that every override can be put on the wire
fn validate_headers(headers: &HeaderOverrides) -> Result<(), ConfigError> {
    for (name, value) in headers.iter() {
        // :authority is mapped onto the pseudo-header, other pseudo names can't be sent
        if name != ":authority" {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(format!("invalid name '{}'", name)))?;
        }
        HeaderValue::from_str(value).map_err(|_| {
            ConfigError::InvalidHeader(format!("invalid value for '{}'", name))
        })?;
    }
    Ok(())
}

fn validate_tls_settings(tls: &TlsSettings) -> Result<(), ConfigError> {
    if tls.cert_file.is_some() != tls.key_file.is_some() {
        return Err(ConfigError::Validation(
            "client certificate and private key must be given together".to_string(),
        ));
    }
    Ok(())
}
