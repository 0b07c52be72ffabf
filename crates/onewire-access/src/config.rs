//! Registry configuration and well-known property keys

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use tracing::warn;

use crate::properties::Properties;

/// Adapter type used by `get_default_adapter`
pub const DEFAULT_ADAPTER_KEY: &str = "onewire.adapter.default";
/// Port used by `get_default_adapter`
pub const DEFAULT_PORT_KEY: &str = "onewire.port.default";
/// Prefix of the numbered adapter registration keys
pub const REGISTER_KEY_PREFIX: &str = "onewire.register.adapter";
/// Number of registration slots (`adapter0` .. `adapter15`)
pub const REGISTER_SLOTS: usize = 16;

/// Adapter type chosen when nothing is configured
pub const SMART_DEFAULT_ADAPTER: &str = "SimulatedAdapter";
/// Port chosen when nothing is configured
pub const SMART_DEFAULT_PORT: &str = "sim0";

pub const PROPERTIES_FILE_NAME: &str = "onewire.properties";

/// Where the registry looks up properties
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    properties: HashMap<String, String>,
    use_env: bool,
    search_paths: Vec<PathBuf>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            properties: HashMap::new(),
            use_env: false,
            search_paths: default_search_paths(),
        }
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(".").join(PROPERTIES_FILE_NAME),
        PathBuf::from("/etc").join(PROPERTIES_FILE_NAME),
    ]
}

impl RegistryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a runtime property; these win over files and the environment
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.properties
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Also consult environment variables derived from the key
    pub fn with_env(mut self, use_env: bool) -> Self {
        self.use_env = use_env;
        self
    }

    /// Replace the properties files searched, in order
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Runtime properties, then the environment
    pub(crate) fn runtime_value(&self, key: &str) -> Option<String> {
        if let Some(value) = self.properties.get(key) {
            return Some(value.clone());
        }
        if !self.use_env {
            return None;
        }
        let var = env_var_name(key);
        match env::var(&var) {
            Ok(value) => Some(value),
            Err(env::VarError::NotPresent) => None,
            Err(e) => {
                warn!(var = %var, error = %e, "Ignoring unreadable environment variable");
                None
            }
        }
    }

    /// First properties file on the search path that defines `key`
    pub(crate) fn file_value(&self, key: &str) -> Option<String> {
        self.search_paths.iter().find_map(|path| match Properties::load(path) {
            Ok(Some(props)) => props.get(key).map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "ConfigUnreadable");
                None
            }
        })
    }
}

/// `onewire.port.default` becomes `ONEWIRE_PORT_DEFAULT`
pub fn env_var_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Smart default for the two well-known keys
pub(crate) fn smart_default(key: &str) -> Option<&'static str> {
    match key {
        DEFAULT_ADAPTER_KEY => Some(SMART_DEFAULT_ADAPTER),
        DEFAULT_PORT_KEY => Some(SMART_DEFAULT_PORT),
        _ => None,
    }
}

pub(crate) fn register_key(slot: usize) -> String {
    format!("{REGISTER_KEY_PREFIX}{slot}")
}
