//! Built-in simulated adapter type

use onewire_adapter::Adapter;
use onewire_core::{DeviceAddress, OneWireError};
use onewire_transport::{SimNetwork, SimulatedBus};

use crate::registry::{AdapterDescriptor, PropertyLookup};

pub const SIMULATOR_NAME: &str = "SimulatedAdapter";

/// Comma separated addresses of the devices on a fresh simulated bus
pub const DEVICES_KEY: &str = "onewire.simulator.devices";
/// Comma separated addresses of devices that start in an alarm condition
pub const ALARMING_KEY: &str = "onewire.simulator.alarming";

const PORT_TYPE: &str = "simulated bus (sim0-sim3)";

pub fn descriptor() -> AdapterDescriptor {
    descriptor_named(SIMULATOR_NAME)
}

/// Simulator type whose bus is populated from the simulator properties
pub fn descriptor_named(name: &str) -> AdapterDescriptor {
    let adapter_name = name.to_string();
    AdapterDescriptor::new(
        name,
        PORT_TYPE,
        SimulatedBus::default_capabilities(),
        move |properties| {
            let network = SimNetwork::new();
            for address in address_list(properties, DEVICES_KEY)? {
                network.add_device(address);
            }
            for address in address_list(properties, ALARMING_KEY)? {
                network.add_alarming_device(address);
            }
            Ok(Adapter::new(
                adapter_name.clone(),
                PORT_TYPE,
                Box::new(SimulatedBus::new(network)),
            ))
        },
    )
}

/// Simulator type attached to a caller-owned network.
///
/// Every instance shares `network`, so instances contend for the same
/// exclusive open.
pub fn network_descriptor(name: &str, network: SimNetwork) -> AdapterDescriptor {
    let adapter_name = name.to_string();
    AdapterDescriptor::new(
        name,
        PORT_TYPE,
        SimulatedBus::default_capabilities(),
        move |_| {
            Ok(Adapter::new(
                adapter_name.clone(),
                PORT_TYPE,
                Box::new(SimulatedBus::new(network.clone())),
            ))
        },
    )
}

pub fn parse_address_list(text: &str) -> Result<Vec<DeviceAddress>, OneWireError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse::<DeviceAddress>)
        .collect()
}

fn address_list(
    properties: &dyn PropertyLookup,
    key: &str,
) -> Result<Vec<DeviceAddress>, OneWireError> {
    properties
        .property(key)
        .map_or(Ok(Vec::new()), |text| parse_address_list(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_list() {
        let parsed = parse_address_list(" 2800000000000001, ,10-00-00-00-00-00-00-02 ").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].family(), 0x28);
        assert_eq!(parsed[1].family(), 0x10);
        assert!(parse_address_list("").unwrap().is_empty());
        assert!(parse_address_list("28000000").is_err());
    }
}
