//! Simulated 1-Wire bus
//!
//! `SimNetwork` is the shared wire: the devices hanging off it, the exclusive
//! open claimed by whichever driver holds it, and a log of all traffic.
//! `SimulatedBus` is one driver instance attached to a network. Two drivers
//! attached to the same network behave like two processes sharing one
//! physical port.

use onewire_core::{
    Capabilities, DeviceAddress, OneWireError, PowerCondition, PowerDuration, ResetResult,
    SearchCommand, Speed, ADDRESS_BITS, MATCH_ROM, NO_DEVICE,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::BusTransport;

/// Ports offered by the simulator
pub const SIMULATOR_PORTS: [&str; 4] = ["sim0", "sim1", "sim2", "sim3"];

/// One transaction observed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Reset(ResetResult),
    Search {
        opcode: u8,
        last_discrepancy: u8,
        skip_reset: bool,
    },
    WriteBit(bool),
    ReadBit(bool),
    WriteByte(u8),
    ReadByte(u8),
    /// Bytes sent by a block transfer
    Block(Vec<u8>),
    Speed(Speed),
    StrongPullup,
    PowerNormal,
    ProgramPulse,
}

#[derive(Debug, Clone)]
struct SimDevice {
    address: DeviceAddress,
    alarming: bool,
    response: VecDeque<u8>,
}

impl SimDevice {
    fn bit(&self, position: u8) -> bool {
        let index = usize::from(position - 1);
        self.address.bytes()[index / 8] & (1 << (index % 8)) != 0
    }
}

/// Where the bus is in the ROM command sequence
#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    AwaitCommand,
    MatchRom(Vec<u8>),
    Selected(DeviceAddress),
}

#[derive(Debug)]
struct NetworkState {
    devices: Vec<SimDevice>,
    adapter_present: bool,
    port_error: bool,
    probe_error: bool,
    attached_ports: usize,
    short: bool,
    claimed: bool,
    strong_pullup: bool,
    program_pulses: usize,
    traffic: Vec<BusEvent>,
}

impl Default for NetworkState {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            adapter_present: true,
            port_error: false,
            probe_error: false,
            attached_ports: 0,
            short: false,
            claimed: false,
            strong_pullup: false,
            program_pulses: 0,
            traffic: Vec::new(),
        }
    }
}

/// Shared handle to a simulated wire and the devices on it
#[derive(Debug, Clone, Default)]
pub struct SimNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl SimNetwork {
    /// Create an empty network with adapter hardware present
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network populated with the given devices
    pub fn with_devices(addresses: impl IntoIterator<Item = DeviceAddress>) -> Self {
        let network = Self::new();
        for address in addresses {
            network.add_device(address);
        }
        network
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_device(&self, address: DeviceAddress) {
        self.insert(address, false);
    }

    pub fn add_alarming_device(&self, address: DeviceAddress) {
        self.insert(address, true);
    }

    fn insert(&self, address: DeviceAddress, alarming: bool) {
        let mut state = self.lock();
        match state.devices.iter_mut().find(|d| d.address == address) {
            Some(device) => device.alarming = alarming,
            None => state.devices.push(SimDevice {
                address,
                alarming,
                response: VecDeque::new(),
            }),
        }
    }

    /// Detach a device, returning whether it was on the bus
    pub fn remove_device(&self, address: &DeviceAddress) -> bool {
        let mut state = self.lock();
        let before = state.devices.len();
        state.devices.retain(|d| d.address != *address);
        state.devices.len() != before
    }

    /// Change a device's alarm condition, returning whether it was on the bus
    pub fn set_alarming(&self, address: &DeviceAddress, alarming: bool) -> bool {
        let mut state = self.lock();
        match state.devices.iter_mut().find(|d| d.address == *address) {
            Some(device) => {
                device.alarming = alarming;
                true
            }
            None => false,
        }
    }

    /// Queue bytes a device answers with once it has been addressed
    pub fn queue_response(&self, address: &DeviceAddress, bytes: &[u8]) -> bool {
        let mut state = self.lock();
        match state.devices.iter_mut().find(|d| d.address == *address) {
            Some(device) => {
                device.response.extend(bytes.iter().copied());
                true
            }
            None => false,
        }
    }

    pub fn devices(&self) -> Vec<DeviceAddress> {
        self.lock().devices.iter().map(|d| d.address).collect()
    }

    /// Simulate adapter hardware being unplugged from its port
    pub fn set_adapter_present(&self, present: bool) {
        self.lock().adapter_present = present;
    }

    /// Make port selection fail with an I/O error
    pub fn set_port_error(&self, failing: bool) {
        self.lock().port_error = failing;
    }

    /// Make the adapter hardware probe fail with an I/O error
    pub fn set_probe_error(&self, failing: bool) {
        self.lock().probe_error = failing;
    }

    pub fn set_short(&self, short: bool) {
        self.lock().short = short;
    }

    /// Number of drivers with a port selected
    pub fn attached_ports(&self) -> usize {
        self.lock().attached_ports
    }

    /// Whether some driver currently holds the exclusive open
    pub fn is_claimed(&self) -> bool {
        self.lock().claimed
    }

    pub fn strong_pullup(&self) -> bool {
        self.lock().strong_pullup
    }

    pub fn program_pulses(&self) -> usize {
        self.lock().program_pulses
    }

    pub fn traffic(&self) -> Vec<BusEvent> {
        self.lock().traffic.clone()
    }

    pub fn clear_traffic(&self) {
        self.lock().traffic.clear();
    }
}

/// Driver instance attached to a [`SimNetwork`]
#[derive(Debug)]
pub struct SimulatedBus {
    network: SimNetwork,
    ports: Vec<String>,
    selected: Option<String>,
    capabilities: Capabilities,
    speed: Speed,
    holding: bool,
    phase: Phase,
    pending_power: Option<PowerCondition>,
}

impl SimulatedBus {
    /// Attach a driver with the default ports and capabilities
    pub fn new(network: SimNetwork) -> Self {
        Self {
            network,
            ports: SIMULATOR_PORTS.iter().map(|p| p.to_string()).collect(),
            selected: None,
            capabilities: Self::default_capabilities(),
            speed: Speed::Regular,
            holding: false,
            phase: Phase::Idle,
            pending_power: None,
        }
    }

    /// Overdrive, flex speed, strong power and program pulse; no hyperdrive
    pub const fn default_capabilities() -> Capabilities {
        Capabilities {
            overdrive: true,
            hyperdrive: false,
            flex_speed: true,
            power_delivery: true,
            program_pulse: true,
        }
    }

    pub fn with_ports(mut self, ports: Vec<String>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn network(&self) -> &SimNetwork {
        &self.network
    }

    fn set_selected(&mut self, port: Option<String>) {
        {
            let mut state = self.network.lock();
            match (self.selected.is_some(), port.is_some()) {
                (false, true) => state.attached_ports += 1,
                (true, false) => state.attached_ports -= 1,
                _ => {}
            }
        }
        self.selected = port;
    }

    fn require_port(&self) -> Result<(), OneWireError> {
        if self.selected.is_some() {
            Ok(())
        } else {
            Err(OneWireError::PortNotSelected)
        }
    }

    fn log(&self, event: BusEvent) {
        self.network.lock().traffic.push(event);
    }

    /// Apply a strong pull-up armed for after the next bit or byte
    fn after_transfer(&mut self, byte_sized: bool) {
        let fire = matches!(
            (self.pending_power, byte_sized),
            (Some(PowerCondition::AfterNextBit), false) | (Some(PowerCondition::AfterNextByte), true)
        );
        if fire {
            self.pending_power = None;
            let mut state = self.network.lock();
            state.strong_pullup = true;
            state.traffic.push(BusEvent::StrongPullup);
        }
    }

    fn reset_result(state: &NetworkState) -> ResetResult {
        if state.short {
            ResetResult::Short
        } else if state.devices.is_empty() {
            ResetResult::NoPresence
        } else if state.devices.iter().any(|d| d.alarming) {
            ResetResult::AlarmPresence
        } else {
            ResetResult::Presence
        }
    }

    /// Byte exchange shared by single-byte and block transfers
    fn exchange_byte(&mut self, byte: u8) -> u8 {
        let mut state = self.network.lock();
        let mut reply = byte;
        let phase = std::mem::replace(&mut self.phase, Phase::Idle);
        self.phase = match phase {
            Phase::AwaitCommand if byte == MATCH_ROM => Phase::MatchRom(Vec::with_capacity(8)),
            Phase::AwaitCommand | Phase::Idle => Phase::Idle,
            Phase::MatchRom(mut rom) => {
                rom.push(byte);
                if rom.len() < 8 {
                    Phase::MatchRom(rom)
                } else {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(&rom);
                    let address = DeviceAddress::from_bytes(bytes);
                    if state.devices.iter().any(|d| d.address == address) {
                        debug!(address = %address, "Simulated device addressed");
                        Phase::Selected(address)
                    } else {
                        Phase::Idle
                    }
                }
            }
            Phase::Selected(address) => {
                if byte == 0xFF {
                    if let Some(next) = state
                        .devices
                        .iter_mut()
                        .find(|d| d.address == address)
                        .and_then(|d| d.response.pop_front())
                    {
                        reply = next;
                    }
                }
                Phase::Selected(address)
            }
        };
        reply
    }
}

impl BusTransport for SimulatedBus {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn adapter_version(&self) -> String {
        format!("simulator {}", env!("CARGO_PKG_VERSION"))
    }

    fn port_names(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn select_port(&mut self, port: &str) -> Result<bool, OneWireError> {
        if self.network.lock().port_error {
            return Err(OneWireError::Io(format!("cannot open {port}")));
        }
        let known = self.ports.iter().any(|p| p == port);
        self.set_selected(known.then(|| port.to_string()));
        Ok(known)
    }

    fn free_port(&mut self) -> Result<(), OneWireError> {
        self.set_selected(None);
        Ok(())
    }

    fn port_name(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    fn adapter_detected(&mut self) -> Result<bool, OneWireError> {
        if self.selected.is_none() {
            return Ok(false);
        }
        let state = self.network.lock();
        if state.probe_error {
            return Err(OneWireError::Io("adapter probe timed out".to_string()));
        }
        Ok(state.adapter_present)
    }

    fn begin_exclusive(&mut self) -> bool {
        let mut state = self.network.lock();
        if state.claimed {
            return false;
        }
        state.claimed = true;
        self.holding = true;
        true
    }

    fn end_exclusive(&mut self) {
        if self.holding {
            self.network.lock().claimed = false;
            self.holding = false;
        }
    }

    fn reset(&mut self) -> Result<ResetResult, OneWireError> {
        self.require_port()?;
        let mut state = self.network.lock();
        let result = Self::reset_result(&state);
        state.traffic.push(BusEvent::Reset(result));
        drop(state);
        self.phase = if result.is_present() {
            Phase::AwaitCommand
        } else {
            Phase::Idle
        };
        Ok(result)
    }

    fn search_step(
        &mut self,
        address: &mut [u8; 8],
        last_discrepancy: u8,
        command: SearchCommand,
        skip_reset: bool,
    ) -> Result<u8, OneWireError> {
        self.require_port()?;
        self.phase = Phase::Idle;
        let mut state = self.network.lock();
        state.traffic.push(BusEvent::Search {
            opcode: command.opcode(),
            last_discrepancy,
            skip_reset,
        });

        if !skip_reset && !Self::reset_result(&state).is_present() {
            return Ok(NO_DEVICE);
        }

        let mut candidates: Vec<&SimDevice> = state
            .devices
            .iter()
            .filter(|d| command == SearchCommand::Normal || d.alarming)
            .collect();
        if candidates.is_empty() {
            return Ok(NO_DEVICE);
        }

        let mut last_zero = 0u8;
        for position in 1..=ADDRESS_BITS {
            let index = usize::from(position - 1);
            let mask = 1u8 << (index % 8);
            let seed_bit = address[index / 8] & mask != 0;

            let has_zero = candidates.iter().any(|d| !d.bit(position));
            let has_one = candidates.iter().any(|d| d.bit(position));

            let direction = match (has_zero, has_one) {
                (false, false) => return Ok(NO_DEVICE),
                (true, false) => false,
                (false, true) => true,
                (true, true) => {
                    let bit = if position < last_discrepancy {
                        seed_bit
                    } else {
                        position == last_discrepancy
                    };
                    if !bit {
                        last_zero = position;
                    }
                    bit
                }
            };

            if direction {
                address[index / 8] |= mask;
            } else {
                address[index / 8] &= !mask;
            }
            candidates.retain(|d| d.bit(position) == direction);
        }

        let next = if last_zero == 0 {
            last_discrepancy
        } else {
            last_zero
        };
        trace!(
            opcode = command.opcode(),
            last_discrepancy,
            next,
            "Simulated search step"
        );
        Ok(next)
    }

    fn write_bit(&mut self, bit: bool) -> Result<(), OneWireError> {
        self.require_port()?;
        self.log(BusEvent::WriteBit(bit));
        self.after_transfer(false);
        Ok(())
    }

    fn read_bit(&mut self) -> Result<bool, OneWireError> {
        self.require_port()?;
        // Idle bus reads high
        self.log(BusEvent::ReadBit(true));
        self.after_transfer(false);
        Ok(true)
    }

    fn write_byte(&mut self, byte: u8) -> Result<(), OneWireError> {
        self.require_port()?;
        self.log(BusEvent::WriteByte(byte));
        self.exchange_byte(byte);
        self.after_transfer(true);
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8, OneWireError> {
        self.require_port()?;
        let byte = self.exchange_byte(0xFF);
        self.log(BusEvent::ReadByte(byte));
        self.after_transfer(true);
        Ok(byte)
    }

    fn transfer_block(&mut self, block: &mut [u8]) -> Result<(), OneWireError> {
        self.require_port()?;
        self.log(BusEvent::Block(block.to_vec()));
        for byte in block.iter_mut() {
            *byte = self.exchange_byte(*byte);
        }
        Ok(())
    }

    fn set_speed(&mut self, speed: Speed) -> Result<(), OneWireError> {
        if let Some(needed) = Capabilities::required_for_speed(speed) {
            if !self.capabilities.supports(needed) {
                return Err(OneWireError::CapabilityUnsupported(needed));
            }
        }
        self.speed = speed;
        self.log(BusEvent::Speed(speed));
        Ok(())
    }

    fn speed(&self) -> Speed {
        self.speed
    }

    fn set_power_duration(&mut self, duration: PowerDuration) -> Result<(), OneWireError> {
        if duration != PowerDuration::Infinite {
            return Err(OneWireError::UnsupportedSetting(
                "only infinite power duration is supported".to_string(),
            ));
        }
        Ok(())
    }

    fn start_power_delivery(&mut self, condition: PowerCondition) -> Result<bool, OneWireError> {
        self.require_port()?;
        match condition {
            PowerCondition::Now => {
                let mut state = self.network.lock();
                state.strong_pullup = true;
                state.traffic.push(BusEvent::StrongPullup);
            }
            armed => self.pending_power = Some(armed),
        }
        Ok(true)
    }

    fn set_program_pulse_duration(
        &mut self,
        duration: PowerDuration,
    ) -> Result<(), OneWireError> {
        if duration != PowerDuration::Eprom {
            return Err(OneWireError::UnsupportedSetting(
                "only the EPROM program pulse duration is supported".to_string(),
            ));
        }
        Ok(())
    }

    fn start_program_pulse(&mut self, condition: PowerCondition) -> Result<bool, OneWireError> {
        self.require_port()?;
        if condition != PowerCondition::Now {
            return Err(OneWireError::UnsupportedSetting(
                "program pulse after bit/byte is not supported".to_string(),
            ));
        }
        let mut state = self.network.lock();
        state.program_pulses += 1;
        state.traffic.push(BusEvent::ProgramPulse);
        Ok(true)
    }

    fn set_power_normal(&mut self) -> Result<(), OneWireError> {
        self.pending_power = None;
        let mut state = self.network.lock();
        state.strong_pullup = false;
        state.traffic.push(BusEvent::PowerNormal);
        Ok(())
    }
}
