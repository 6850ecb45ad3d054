//! Runtime Configuration
//!
//! Options a host passes when constructing a runtime. The struct
//! deserializes from a TOML table so embedders (and the `tarn` binary)
//! can keep engine settings in a config file:
//!
//! ```toml
//! heap_size = 2097152
//! load_stdlib = true
//! ```

use serde::Deserialize;

/// Construction options for a [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeOptions {
    /// Arena byte budget. Each semi-space is this large.
    pub heap_size: usize,
    /// Load the embedded standard library during construction.
    pub load_stdlib: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions { heap_size: 1024 * 1024, load_stdlib: true }
    }
}

impl RuntimeOptions {
    pub fn from_toml_str(src: &str) -> Result<RuntimeOptions, toml::de::Error> {
        toml::from_str(src)
    }

    pub fn from_toml_file(path: &std::path::Path) -> std::io::Result<RuntimeOptions> {
        let text = std::fs::read_to_string(path)?;
        RuntimeOptions::from_toml_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
