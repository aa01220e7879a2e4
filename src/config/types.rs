use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Default backpressure threshold: bytes buffered but not yet written to
/// the socket before outbound submission yields
pub const DEFAULT_OUTPUT_UPPER_THRESHOLD: usize = 1024 * 1024;

/// Largest accepted initial window exponent
pub const MAX_WINDOW_BITS: u8 = 30;

/// Immutable run configuration
///
/// Built once at startup and handed by reference to the driver, every
/// session and every crawl expander.
#[derive(Debug, Clone)]
pub struct Config {
    /// Discard response bodies instead of writing them to stdout
    pub null_out: bool,

    /// Save bodies under a name derived from the URI (accepted, not implemented)
    pub remote_name: bool,

    /// Follow same-origin assets linked from level-0 HTML pages
    pub get_assets: bool,

    /// Print the statistics block after each origin group
    pub stat: bool,

    /// Number of times each input URI is requested; anything above 1 disables dedup
    pub multiply: u32,

    /// Idle read/write window of the whole connection
    pub timeout: Option<Duration>,

    /// Initial stream window size as a power-of-two exponent
    pub window_bits: Option<u8>,

    /// Extra request headers
    pub headers: HeaderOverrides,

    /// Request body source; presence turns every input request into a POST
    pub data: Option<DataSource>,

    /// TLS material and switches
    pub tls: TlsSettings,

    /// Backpressure threshold in bytes
    pub output_upper_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            null_out: false,
            remote_name: false,
            get_assets: false,
            stat: false,
            multiply: 1,
            timeout: None,
            window_bits: None,
            headers: HeaderOverrides::default(),
            data: None,
            tls: TlsSettings::default(),
            output_upper_threshold: DEFAULT_OUTPUT_UPPER_THRESHOLD,
        }
    }
}

impl Config {
    /// Initial stream window size derived from `window_bits`
    pub fn initial_window_size(&self) -> Option<u32> {
        self.window_bits.map(|bits| 1u32 << bits)
    }

    /// Returns true unless multiply mode is active
    pub fn dedup_enabled(&self) -> bool {
        self.multiply <= 1
    }
}

/// TLS material paths and the disable switch
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// PEM client certificate chain
    pub cert_file: Option<PathBuf>,

    /// PEM client private key
    pub key_file: Option<PathBuf>,

    /// Use cleartext HTTP/2 even for `https` URIs
    pub disabled: bool,
}

/// Where a request body comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    Stdin,
    File(PathBuf),
}

impl DataSource {
    /// Interprets a command-line value; a literal `-` denotes standard input
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::File(PathBuf::from(arg))
        }
    }
}

/// User-supplied header overrides
///
/// Keys are exact (case-sensitive) names: setting the same name twice keeps
/// the last value at the position of the first occurrence. Names that only
/// differ in case are separate entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderOverrides {
    entries: Vec<(String, String)>,
}

impl HeaderOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing the value of an exact-name match
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Case-insensitive lookup of the last matching value
    pub fn get_ignore_case(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Optional TOML file supplying defaults for the command line
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub connection: ConnectionSection,
    pub tls: TlsSection,
    pub request: RequestSection,
    pub output: OutputSection,
}

/// `[connection]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConnectionSection {
    /// Idle timeout in seconds
    pub timeout: Option<u64>,

    /// Initial window exponent (0..=30)
    pub window_bits: Option<u8>,

    /// Backpressure threshold in bytes
    pub output_buffer_limit: Option<usize>,
}

/// `[tls]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub disabled: bool,
}

/// `[request]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestSection {
    pub multiply: Option<u32>,

    /// Body file, `-` for stdin
    pub data: Option<String>,

    /// Header overrides in `name: value` form
    pub headers: Vec<String>,
}

/// `[output]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputSection {
    pub null_out: bool,
    pub stat: bool,
    pub get_assets: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.multiply, 1);
        assert!(config.dedup_enabled());
        assert_eq!(config.output_upper_threshold, 1024 * 1024);
        assert_eq!(config.initial_window_size(), None);
    }

    #[test]
    fn test_initial_window_size() {
        let config = Config {
            window_bits: Some(16),
            ..Config::default()
        };
        assert_eq!(config.initial_window_size(), Some(65536));
    }

    #[test]
    fn test_multiply_disables_dedup() {
        let config = Config {
            multiply: 3,
            ..Config::default()
        };
        assert!(!config.dedup_enabled());
    }

    #[test]
    fn test_header_overrides_last_value_wins() {
        let mut headers = HeaderOverrides::new();
        headers.insert("x-a", "1");
        headers.insert("x-b", "2");
        headers.insert("x-a", "3");

        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(collected, vec![("x-a", "3"), ("x-b", "2")]);
    }

    #[test]
    fn test_header_overrides_case_variants_kept() {
        let mut headers = HeaderOverrides::new();
        headers.insert("X-Token", "a");
        headers.insert("x-token", "b");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get_ignore_case("X-TOKEN"), Some("b"));
    }

    #[test]
    fn test_data_source_from_arg() {
        assert_eq!(DataSource::from_arg("-"), DataSource::Stdin);
        assert_eq!(
            DataSource::from_arg("body.json"),
            DataSource::File(PathBuf::from("body.json"))
        );
    }
}
