use onewire_access::simulator::{self, network_descriptor};
use onewire_access::{
    AdapterDescriptor, Registry, RegistryConfig, SkipReason, DEFAULT_ADAPTER_KEY,
    DEFAULT_PORT_KEY,
};
use onewire_adapter::Adapter;
use onewire_core::{Capabilities, DeviceAddress, OneWireError};
use onewire_transport::{SimNetwork, SimulatedBus};
use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn isolated() -> RegistryConfig {
    RegistryConfig::new().with_search_paths(Vec::new())
}

fn names(adapters: &[Arc<Adapter>]) -> Vec<String> {
    adapters.iter().map(|a| a.name().to_string()).collect()
}

fn walk(adapter: &Adapter) -> Vec<DeviceAddress> {
    let mut session = adapter.acquire_blocking();
    session
        .devices(false, false)
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn test_enumeration_order_and_slot_gap() {
    let mut registry = Registry::new(
        isolated()
            .with_property("onewire.register.adapter0", "BenchA")
            .with_property("onewire.register.adapter1", "BenchB")
            .with_property("onewire.register.adapter3", "BenchC"),
    );
    registry.register(simulator::descriptor_named("BenchC"));
    registry.register(simulator::descriptor_named("BenchB"));
    registry.register(simulator::descriptor_named("BenchA"));

    // Slot 2 is empty, so slot 3 is never read
    assert_eq!(
        names(&registry.enumerate_adapters()),
        vec!["SimulatedAdapter", "BenchA", "BenchB"]
    );
}

#[test]
fn test_unknown_registered_type_is_skipped() {
    let registry = Registry::new(
        isolated()
            .with_property("onewire.register.adapter0", "Missing")
            .with_property("onewire.register.adapter1", "SimulatedAdapter"),
    );

    let report = registry.enumerate_with_report();
    assert_eq!(
        names(&report.adapters),
        vec!["SimulatedAdapter", "SimulatedAdapter"]
    );
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].name, "Missing");
    assert!(matches!(report.skipped[0].reason, SkipReason::Unregistered));
}

#[test]
fn test_empty_registry_enumerates_nothing() {
    let registry = Registry::without_builtins(isolated());
    let report = registry.enumerate_with_report();
    assert!(report.adapters.is_empty());
    assert!(report.skipped.is_empty());
    assert!(matches!(
        registry.get_default_adapter(),
        Err(OneWireError::AdapterNotFound(name)) if name == "SimulatedAdapter"
    ));
}

#[test]
fn test_get_adapter_selects_and_verifies() {
    let network = SimNetwork::new();
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network.clone()));

    let adapter = registry.get_adapter("Bench", "sim2").unwrap();
    assert_eq!(adapter.port_name().as_deref(), Some("sim2"));
    assert!(!network.is_claimed());
    assert!(adapter.acquire(false).is_some());
}

#[test]
fn test_get_adapter_failures() {
    let network = SimNetwork::new();
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network.clone()));

    assert!(matches!(
        registry.get_adapter("Serial", "sim0"),
        Err(OneWireError::AdapterNotFound(name)) if name == "Serial"
    ));
    assert!(matches!(
        registry.get_adapter("Bench", "COM1"),
        Err(OneWireError::PortUnavailable { port, .. }) if port == "COM1"
    ));

    network.set_adapter_present(false);
    let err = registry.get_adapter("Bench", "sim0").unwrap_err();
    assert!(matches!(err, OneWireError::AdapterNotDetected { .. }));
    assert_eq!(
        err.to_string(),
        "Port found \"sim0\" but adapter \"Bench\" not detected"
    );
    // The session was closed and the port freed on the failure path
    assert!(!network.is_claimed());
    assert_eq!(network.attached_ports(), 0);
}

#[test]
fn test_get_adapter_probe_error_frees_port() {
    let network = SimNetwork::new();
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network.clone()));

    network.set_probe_error(true);
    assert!(matches!(
        registry.get_adapter("Bench", "sim0"),
        Err(OneWireError::Io(_))
    ));
    assert!(!network.is_claimed());
    assert_eq!(network.attached_ports(), 0);
}

#[test]
fn test_get_adapter_port_error_is_unavailable() {
    let network = SimNetwork::new();
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network.clone()));

    network.set_port_error(true);
    assert!(matches!(
        registry.get_adapter("Bench", "sim1"),
        Err(OneWireError::PortUnavailable { adapter, port }) if adapter == "Bench" && port == "sim1"
    ));
    assert_eq!(network.attached_ports(), 0);
}

#[test]
fn test_get_adapter_waits_for_other_holder() {
    let network = SimNetwork::new();
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network.clone()));

    let mut other = SimulatedBus::new(network.clone());
    assert!(onewire_transport::BusTransport::begin_exclusive(&mut other));

    thread::scope(|s| {
        let opener = s.spawn(|| registry.get_adapter("Bench", "sim0").is_ok());
        thread::sleep(Duration::from_millis(60));
        assert!(!opener.is_finished());
        onewire_transport::BusTransport::end_exclusive(&mut other);
        assert!(opener.join().unwrap());
    });
}

#[test]
fn test_override_supersedes_everything() {
    let network = SimNetwork::new();
    let mut registry = Registry::new(isolated().with_property(DEFAULT_PORT_KEY, "sim3"));
    let pinned = Arc::new(Adapter::new(
        "Pinned",
        "test bus",
        Box::new(SimulatedBus::new(network)),
    ));
    assert!(pinned.select_port("sim1").unwrap());

    registry.set_override_adapter(Arc::clone(&pinned));
    assert_eq!(names(&registry.enumerate_adapters()), vec!["Pinned"]);
    assert!(Arc::ptr_eq(
        &registry.get_adapter("Nonexistent", "nowhere").unwrap(),
        &pinned
    ));
    assert!(Arc::ptr_eq(&registry.get_default_adapter().unwrap(), &pinned));
    assert_eq!(
        registry.resolve_property(DEFAULT_ADAPTER_KEY).as_deref(),
        Some("Pinned")
    );
    assert_eq!(
        registry.resolve_property(DEFAULT_PORT_KEY).as_deref(),
        Some("sim1")
    );

    registry.clear_override_adapter();
    assert_eq!(names(&registry.enumerate_adapters()), vec!["SimulatedAdapter"]);
    assert_eq!(
        registry.resolve_property(DEFAULT_PORT_KEY).as_deref(),
        Some("sim3")
    );
}

#[test]
fn test_default_adapter_while_holding_override_session() {
    let mut registry = Registry::new(isolated());
    let pinned = Arc::new(Adapter::new(
        "Pinned",
        "test bus",
        Box::new(SimulatedBus::new(SimNetwork::new())),
    ));
    assert!(pinned.select_port("sim2").unwrap());
    registry.set_override_adapter(Arc::clone(&pinned));

    let registry = Arc::new(registry);
    let (sender, receiver) = mpsc::channel();
    {
        let registry = Arc::clone(&registry);
        let pinned = Arc::clone(&pinned);
        thread::spawn(move || {
            let _session = pinned.acquire_blocking();
            let opened = registry.get_default_adapter().map(|a| Arc::ptr_eq(&a, &pinned));
            let port = registry.resolve_property(DEFAULT_PORT_KEY);
            sender.send((opened, port)).unwrap();
        });
    }

    let (opened, port) = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(opened.unwrap());
    assert_eq!(port.as_deref(), Some("sim2"));
}

#[test]
fn test_override_without_port_falls_through() {
    let mut registry = Registry::new(isolated());
    registry.set_override_adapter(Arc::new(Adapter::new(
        "Pinned",
        "test bus",
        Box::new(SimulatedBus::new(SimNetwork::new())),
    )));
    assert_eq!(
        registry.resolve_property(DEFAULT_PORT_KEY).as_deref(),
        Some("sim0")
    );
}

fn write_properties(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_property_precedence() {
    let key = "onewire.test.precedence";
    let dir = TempDir::new().unwrap();
    let local = write_properties(&dir, "local.properties", &format!("{key}=local\n"));
    let system = write_properties(
        &dir,
        "system.properties",
        &format!("{key}=system\nonewire.test.system.only=system\n"),
    );
    let paths = vec![local, system];

    let files_only = Registry::new(isolated().with_search_paths(paths.clone()));
    assert_eq!(files_only.resolve_property(key).as_deref(), Some("local"));
    assert_eq!(
        files_only
            .resolve_property("onewire.test.system.only")
            .as_deref(),
        Some("system")
    );

    std::env::set_var("ONEWIRE_TEST_PRECEDENCE", "env");
    let with_env = Registry::new(
        isolated()
            .with_search_paths(paths.clone())
            .with_env(true),
    );
    assert_eq!(with_env.resolve_property(key).as_deref(), Some("env"));

    let with_runtime = Registry::new(
        isolated()
            .with_search_paths(paths)
            .with_env(true)
            .with_property(key, "runtime"),
    );
    assert_eq!(with_runtime.resolve_property(key).as_deref(), Some("runtime"));
}

#[test]
fn test_unreadable_file_falls_through_to_default() {
    let dir = TempDir::new().unwrap();
    let broken = write_properties(&dir, "broken.properties", "onewire.port.default=\\u00zz\n");
    // A directory cannot be read as a file
    let registry = Registry::new(
        isolated().with_search_paths(vec![dir.path().to_path_buf(), broken]),
    );
    assert_eq!(
        registry.resolve_property(DEFAULT_PORT_KEY).as_deref(),
        Some("sim0")
    );
}

#[test]
fn test_default_adapter_from_properties_file() {
    let dir = TempDir::new().unwrap();
    let path = write_properties(
        &dir,
        "onewire.properties",
        "# bench setup\n\
         onewire.adapter.default=SimulatedAdapter\n\
         onewire.port.default=sim2\n\
         onewire.simulator.devices=2800000000000001, 10000000000000AA\n",
    );
    let registry = Registry::new(isolated().with_search_paths(vec![path]));

    let adapter = registry.get_default_adapter().unwrap();
    assert_eq!(adapter.port_name().as_deref(), Some("sim2"));
    assert_eq!(walk(&adapter).len(), 2);
}

#[test]
fn test_bad_simulator_population_is_reported() {
    let registry = Registry::new(
        isolated().with_property(simulator::DEVICES_KEY, "28-00-00"),
    );
    let report = registry.enumerate_with_report();
    assert!(report.adapters.is_empty());
    assert!(matches!(
        report.skipped[0].reason,
        SkipReason::Failed(OneWireError::InvalidAddress(_))
    ));
}

#[test]
fn test_two_device_scenario() {
    // 0x10 and 0x28 both start with a 0 bit; 0x10 sends its first 1 later
    let a = DeviceAddress::with_crc(0x10, [0x01, 0, 0, 0, 0, 0]);
    let b = DeviceAddress::with_crc(0x28, [0x01, 0, 0, 0, 0, 0]);
    let registry = Registry::new(
        isolated().with_property(simulator::DEVICES_KEY, format!("{b},{a}")),
    );

    let adapter = registry.get_default_adapter().unwrap();
    let mut session = adapter.acquire(false).unwrap();

    assert_eq!(session.find_first_device(false, false).unwrap(), Some(a));
    assert_eq!(session.find_next_device().unwrap(), Some(b));
    assert!(session.cursor().is_exhausted());
    assert_eq!(session.find_next_device().unwrap(), None);
    assert_eq!(session.find_next_device().unwrap(), Some(a));

    assert!(session.is_present(&a));
    assert!(!session.is_present(&DeviceAddress::with_crc(0x28, [0x02, 0, 0, 0, 0, 0])));
    assert!(session.select(&b).unwrap());
}

#[test]
fn test_concurrent_walks_are_serialized() {
    let devices: Vec<_> = (1..=5u8)
        .map(|n| DeviceAddress::with_crc(0x28, [n, n, 0, 0, 0, 0]))
        .collect();
    let network = SimNetwork::with_devices(devices.iter().copied());
    let mut registry = Registry::without_builtins(isolated());
    registry.register_builtin(network_descriptor("Bench", network));
    let adapter = registry.get_adapter("Bench", "sim0").unwrap();

    let walks: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| walk(&adapter))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for found in walks {
        assert_eq!(found.len(), devices.len());
    }
}

#[test]
fn test_descriptor_metadata() {
    let registry = Registry::new(isolated());
    let (descriptor, origin): (&AdapterDescriptor, _) = registry.registrations().next().unwrap();
    assert_eq!(descriptor.name(), "SimulatedAdapter");
    assert_eq!(origin, onewire_access::Origin::BuiltIn);
    assert_ne!(descriptor.capabilities(), Capabilities::default());
    assert!(!onewire_access::version().is_empty());
}
