use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::converter::{ConfigSource, ConverterStore};
use crate::error::{Error, Result};

/// Prefix of flat options that map a type key to a converter name.
pub const CONVERTER_PREFIX: &str = "converter.";

/// Connection and registry options for a [`crate::Session`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// PostgreSQL URL (e.g., "postgres://localhost:5432/mydb")
    pub url: String,

    /// Upper bound on pooled connections
    pub max_connections: u32,

    /// Directory that resource names are resolved against
    pub template_root: Option<PathBuf>,

    /// Keep parsed templates for the life of the session
    pub cache_templates: bool,

    /// Converter overrides, applied in order after the built-in defaults
    pub converters: Vec<ConfigSource>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            template_root: None,
            cache_templates: false,
            converters: Vec::new(),
        }
    }
}

impl SessionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Parse session options from a hashmap
    ///
    /// `converter.<type>` entries become one extra converter source.
    pub fn from_map(options: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        // Required: URL
        config.url = options
            .get("url")
            .ok_or_else(|| Error::Config("missing 'url' option".to_string()))?
            .clone();

        if let Some(max) = options.get("max_connections") {
            config.max_connections = max
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid max_connections: {max}")))?;
        }

        if let Some(cache) = options.get("cache_templates") {
            config.cache_templates = cache
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid cache_templates: {cache}")))?;
        }

        config.template_root = options.get("template_root").map(PathBuf::from);

        let mut converters = ConfigSource::new();
        for (key, name) in options {
            if let Some(type_name) = key.strip_prefix(CONVERTER_PREFIX) {
                converters.insert(type_name, name.as_str());
            }
        }
        if !converters.is_empty() {
            config.converters.push(converters);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::Config("'url' must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("max_connections must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Builds the converter registry: built-in defaults, then each configured source.
    pub fn converter_store(&self) -> Result<ConverterStore> {
        ConverterStore::load(&self.converters)
    }
}
