//! Adapter registration, enumeration and default resolution

use onewire_adapter::Adapter;
use onewire_core::{Capabilities, OneWireError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{
    register_key, smart_default, RegistryConfig, DEFAULT_ADAPTER_KEY, DEFAULT_PORT_KEY,
    REGISTER_SLOTS,
};
use crate::simulator;

/// Read access to resolved properties, handed to adapter factories
pub trait PropertyLookup {
    fn property(&self, key: &str) -> Option<String>;
}

/// Builds a fresh adapter instance
pub type AdapterFactory =
    Arc<dyn Fn(&dyn PropertyLookup) -> Result<Adapter, OneWireError> + Send + Sync>;

/// One adapter type known to the registry
#[derive(Clone)]
pub struct AdapterDescriptor {
    name: String,
    port_type_description: String,
    capabilities: Capabilities,
    factory: AdapterFactory,
}

impl AdapterDescriptor {
    pub fn new<F>(
        name: impl Into<String>,
        port_type_description: impl Into<String>,
        capabilities: Capabilities,
        factory: F,
    ) -> Self
    where
        F: Fn(&dyn PropertyLookup) -> Result<Adapter, OneWireError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            port_type_description: port_type_description.into(),
            capabilities,
            factory: Arc::new(factory),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port_type_description(&self) -> &str {
        &self.port_type_description
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn instantiate(&self, properties: &dyn PropertyLookup) -> Result<Adapter, OneWireError> {
        (self.factory)(properties)
    }
}

impl fmt::Debug for AdapterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterDescriptor")
            .field("name", &self.name)
            .field("port_type_description", &self.port_type_description)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// How a descriptor entered the registration table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Always enumerated
    BuiltIn,
    /// Enumerated only when named by an `onewire.register.adapterN` key
    Named,
}

/// Why an adapter type was left out of an enumeration
#[derive(Debug)]
pub enum SkipReason {
    /// The factory failed
    Failed(OneWireError),
    /// Named by a registration key but absent from the table
    Unregistered,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "instantiation failed: {e}"),
            Self::Unregistered => f.write_str("registered in properties, but not known"),
        }
    }
}

#[derive(Debug)]
pub struct SkippedAdapter {
    pub name: String,
    pub reason: SkipReason,
}

/// Result of an enumeration together with what was left out
#[derive(Debug, Default)]
pub struct Enumeration {
    pub adapters: Vec<Arc<Adapter>>,
    pub skipped: Vec<SkippedAdapter>,
}

/// Registration table plus the optional override adapter
pub struct Registry {
    config: RegistryConfig,
    registrations: Vec<(AdapterDescriptor, Origin)>,
    override_adapter: Option<Arc<Adapter>>,
}

impl Registry {
    /// Registry with the simulated adapter built in
    pub fn new(config: RegistryConfig) -> Self {
        let mut registry = Self::without_builtins(config);
        registry.register_builtin(simulator::descriptor());
        registry
    }

    /// Registry with an empty registration table
    pub fn without_builtins(config: RegistryConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
            override_adapter: None,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add an adapter type that is enumerated unconditionally
    pub fn register_builtin(&mut self, descriptor: AdapterDescriptor) {
        debug!(adapter = %descriptor.name(), "Registered built-in adapter type");
        self.registrations.push((descriptor, Origin::BuiltIn));
    }

    /// Add an adapter type that registration keys can name
    pub fn register(&mut self, descriptor: AdapterDescriptor) {
        debug!(adapter = %descriptor.name(), "Registered adapter type");
        self.registrations.push((descriptor, Origin::Named));
    }

    pub fn registrations(&self) -> impl Iterator<Item = (&AdapterDescriptor, Origin)> + '_ {
        self.registrations.iter().map(|(d, origin)| (d, *origin))
    }

    fn descriptor(&self, name: &str) -> Option<&AdapterDescriptor> {
        self.registrations
            .iter()
            .map(|(d, _)| d)
            .find(|d| d.name() == name)
    }

    /// Make every enumeration and lookup return `adapter`
    pub fn set_override_adapter(&mut self, adapter: Arc<Adapter>) {
        info!(adapter = %adapter.name(), "Override adapter set");
        self.override_adapter = Some(adapter);
    }

    pub fn clear_override_adapter(&mut self) {
        if self.override_adapter.take().is_some() {
            info!("Override adapter cleared");
        }
    }

    pub fn override_adapter(&self) -> Option<&Arc<Adapter>> {
        self.override_adapter.as_ref()
    }

    /// Fresh instances of every available adapter type
    pub fn enumerate_adapters(&self) -> Vec<Arc<Adapter>> {
        self.enumerate_with_report().adapters
    }

    pub fn enumerate_with_report(&self) -> Enumeration {
        if let Some(adapter) = &self.override_adapter {
            return Enumeration {
                adapters: vec![Arc::clone(adapter)],
                skipped: Vec::new(),
            };
        }

        let mut report = Enumeration::default();
        for (descriptor, origin) in &self.registrations {
            if *origin == Origin::BuiltIn {
                self.instantiate_into(descriptor, &mut report);
            }
        }

        for slot in 0..REGISTER_SLOTS {
            let Some(name) = self.resolve_property(&register_key(slot)) else {
                break;
            };
            let name = name.trim();
            match self.descriptor(name) {
                Some(descriptor) => self.instantiate_into(descriptor, &mut report),
                None => {
                    warn!(
                        adapter = %name,
                        slot,
                        "Adapter registered in properties, but the type is not known"
                    );
                    report.skipped.push(SkippedAdapter {
                        name: name.to_string(),
                        reason: SkipReason::Unregistered,
                    });
                }
            }
        }

        if report.adapters.is_empty() {
            warn!("No 1-Wire adapter types available");
        }
        report
    }

    fn instantiate_into(&self, descriptor: &AdapterDescriptor, report: &mut Enumeration) {
        match descriptor.instantiate(self) {
            Ok(adapter) => report.adapters.push(Arc::new(adapter)),
            Err(e) => {
                debug!(adapter = %descriptor.name(), error = %e, "Adapter instantiation failed");
                report.skipped.push(SkippedAdapter {
                    name: descriptor.name().to_string(),
                    reason: SkipReason::Failed(e),
                });
            }
        }
    }

    /// Find, open and verify the named adapter on `port`
    pub fn get_adapter(&self, name: &str, port: &str) -> Result<Arc<Adapter>, OneWireError> {
        if let Some(adapter) = &self.override_adapter {
            return Ok(Arc::clone(adapter));
        }

        let adapter = self
            .enumerate_adapters()
            .into_iter()
            .find(|a| a.name() == name)
            .ok_or_else(|| OneWireError::AdapterNotFound(name.to_string()))?;

        let unavailable = || OneWireError::PortUnavailable {
            adapter: name.to_string(),
            port: port.to_string(),
        };
        match adapter.select_port(port) {
            Ok(true) => {}
            Ok(false) => return Err(unavailable()),
            Err(e) => {
                debug!(adapter = %name, port, error = %e, "Port selection failed");
                return Err(unavailable());
            }
        }

        let detected = {
            let mut session = adapter.acquire_blocking();
            let detected = session.adapter_detected();
            if !matches!(detected, Ok(true)) {
                if let Err(e) = session.free_port() {
                    debug!(adapter = %name, port, error = %e, "Freeing port failed");
                }
            }
            detected
        };
        if !detected? {
            return Err(OneWireError::AdapterNotDetected {
                adapter: name.to_string(),
                port: port.to_string(),
            });
        }

        info!(adapter = %name, port, "Adapter opened");
        Ok(adapter)
    }

    /// Open the adapter and port named by the default properties
    pub fn get_default_adapter(&self) -> Result<Arc<Adapter>, OneWireError> {
        let name = self.default_value(DEFAULT_ADAPTER_KEY);
        let port = self.default_value(DEFAULT_PORT_KEY);
        self.get_adapter(&name, &port)
    }

    fn default_value(&self, key: &str) -> String {
        self.resolve_property(key).unwrap_or_default()
    }

    /// Resolve a property through the override adapter, runtime properties
    /// and environment, properties files and finally the smart defaults
    pub fn resolve_property(&self, key: &str) -> Option<String> {
        if let Some(adapter) = &self.override_adapter {
            let from_override = match key {
                DEFAULT_ADAPTER_KEY => Some(adapter.name().to_string()),
                DEFAULT_PORT_KEY => adapter.port_name(),
                _ => None,
            };
            if from_override.is_some() {
                return from_override;
            }
        }

        self.config
            .runtime_value(key)
            .or_else(|| self.config.file_value(key))
            .or_else(|| smart_default(key).map(str::to_string))
    }
}

impl PropertyLookup for Registry {
    fn property(&self, key: &str) -> Option<String> {
        self.resolve_property(key)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("registrations", &self.registrations)
            .field("override_adapter", &self.override_adapter.as_ref().map(|a| a.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixed(HashMap<&'static str, &'static str>);

    impl PropertyLookup for Fixed {
        fn property(&self, key: &str) -> Option<String> {
            self.0.get(key).map(|v| v.to_string())
        }
    }

    fn isolated() -> RegistryConfig {
        RegistryConfig::new().with_search_paths(Vec::new())
    }

    fn failing(name: &str) -> AdapterDescriptor {
        AdapterDescriptor::new(name, "nowhere", Capabilities::default(), |_| {
            Err(OneWireError::Io("no hardware".to_string()))
        })
    }

    #[test]
    fn test_descriptor_passes_properties_to_factory() {
        let descriptor = simulator::descriptor();
        let props = Fixed(HashMap::from([(
            simulator::DEVICES_KEY,
            "not-an-address",
        )]));
        assert!(matches!(
            descriptor.instantiate(&props),
            Err(OneWireError::InvalidAddress(_))
        ));
        assert!(descriptor.instantiate(&Fixed(HashMap::new())).is_ok());
    }

    #[test]
    fn test_named_types_need_a_registration_key() {
        let mut registry = Registry::new(isolated());
        registry.register(simulator::descriptor_named("Bench"));

        let names: Vec<_> = registry
            .enumerate_adapters()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["SimulatedAdapter"]);
    }

    #[test]
    fn test_failed_builtin_is_reported() {
        let mut registry = Registry::without_builtins(isolated());
        registry.register_builtin(failing("Serial"));
        registry.register_builtin(simulator::descriptor());

        let report = registry.enumerate_with_report();
        assert_eq!(report.adapters.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].name, "Serial");
        assert!(matches!(report.skipped[0].reason, SkipReason::Failed(OneWireError::Io(_))));
    }

    #[test]
    fn test_smart_defaults_resolve() {
        let registry = Registry::new(isolated());
        assert_eq!(
            registry.resolve_property(DEFAULT_ADAPTER_KEY).as_deref(),
            Some("SimulatedAdapter")
        );
        assert_eq!(registry.resolve_property(DEFAULT_PORT_KEY).as_deref(), Some("sim0"));
        assert_eq!(registry.resolve_property("onewire.anything.else"), None);
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::Unregistered.to_string(),
            "registered in properties, but not known"
        );
    }
}
