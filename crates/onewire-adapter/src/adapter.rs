//! A transport bound to its search state and capability flags

use onewire_core::{
    Capabilities, Capability, DeviceAddress, OneWireError, PowerCondition, PowerDuration,
    ResetResult, SearchCommand, Speed,
};
use onewire_transport::BusTransport;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::arbiter::{Arbiter, CancelToken, ExclusiveAccess, ExclusiveSession};
use crate::search::{self, FamilyFilter, SearchCursor, SearchEngine};

/// Held exclusive access to an adapter's bus
pub type BusSession<'a> = ExclusiveSession<'a, BusState>;

/// Everything guarded by an adapter's arbiter
pub struct BusState {
    transport: Box<dyn BusTransport>,
    cursor: SearchCursor,
    filter: FamilyFilter,
    capabilities: Capabilities,
    /// Copy of the selected port, readable while a session is held
    port: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusState")
            .field("port", &self.transport.port_name())
            .field("cursor", &self.cursor)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl ExclusiveAccess for BusState {
    fn try_begin(&mut self) -> bool {
        self.transport.begin_exclusive()
    }

    fn end(&mut self) {
        self.transport.end_exclusive();
    }
}

impl BusState {
    fn require(&self, capability: Capability) -> Result<(), OneWireError> {
        if self.capabilities.supports(capability) {
            Ok(())
        } else {
            Err(OneWireError::CapabilityUnsupported(capability))
        }
    }

    /// Refresh the port copy from the transport
    fn record_port(&self) {
        let current = self.transport.port_name().map(str::to_string);
        *self.port.write().unwrap_or_else(PoisonError::into_inner) = current;
    }

    fn engine(&mut self) -> SearchEngine<'_> {
        SearchEngine {
            transport: self.transport.as_mut(),
            cursor: &mut self.cursor,
            filter: &self.filter,
        }
    }

    // Port and hardware

    pub fn adapter_detected(&mut self) -> Result<bool, OneWireError> {
        self.transport.adapter_detected()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.transport.port_name()
    }

    pub fn free_port(&mut self) -> Result<(), OneWireError> {
        let freed = self.transport.free_port();
        self.record_port();
        freed
    }

    // Raw bus I/O

    pub fn reset(&mut self) -> Result<ResetResult, OneWireError> {
        self.transport.reset()
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), OneWireError> {
        self.transport.write_bit(bit)
    }

    pub fn read_bit(&mut self) -> Result<bool, OneWireError> {
        self.transport.read_bit()
    }

    pub fn write_byte(&mut self, byte: u8) -> Result<(), OneWireError> {
        self.transport.write_byte(byte)
    }

    pub fn read_byte(&mut self) -> Result<u8, OneWireError> {
        self.transport.read_byte()
    }

    /// Write `block` and overwrite it with the bytes read back
    pub fn transfer_block(&mut self, block: &mut [u8]) -> Result<(), OneWireError> {
        self.transport.transfer_block(block)
    }

    // Speed and power

    pub fn set_speed(&mut self, speed: Speed) -> Result<(), OneWireError> {
        if let Some(needed) = Capabilities::required_for_speed(speed) {
            self.require(needed)?;
        }
        self.transport.set_speed(speed)
    }

    pub fn speed(&self) -> Speed {
        self.transport.speed()
    }

    pub fn set_power_duration(&mut self, duration: PowerDuration) -> Result<(), OneWireError> {
        self.require(Capability::PowerDelivery)?;
        self.transport.set_power_duration(duration)
    }

    pub fn start_power_delivery(
        &mut self,
        condition: PowerCondition,
    ) -> Result<bool, OneWireError> {
        self.require(Capability::PowerDelivery)?;
        self.transport.start_power_delivery(condition)
    }

    pub fn set_program_pulse_duration(
        &mut self,
        duration: PowerDuration,
    ) -> Result<(), OneWireError> {
        self.require(Capability::ProgramPulse)?;
        self.transport.set_program_pulse_duration(duration)
    }

    pub fn start_program_pulse(&mut self, condition: PowerCondition) -> Result<bool, OneWireError> {
        self.require(Capability::ProgramPulse)?;
        self.transport.start_program_pulse(condition)
    }

    pub fn set_power_normal(&mut self) -> Result<(), OneWireError> {
        self.transport.set_power_normal()
    }

    // Search

    /// Start a new enumeration and return its first accepted device
    pub fn find_first_device(
        &mut self,
        alarm_only: bool,
        skip_reset: bool,
    ) -> Result<Option<DeviceAddress>, OneWireError> {
        self.engine().find_first(alarm_only, skip_reset)
    }

    /// Continue the enumeration; `None` once every device has been reported
    pub fn find_next_device(&mut self) -> Result<Option<DeviceAddress>, OneWireError> {
        self.engine().find_next()
    }

    /// Iterate a fresh enumeration
    pub fn devices(&mut self, alarm_only: bool, skip_reset: bool) -> Devices<'_> {
        Devices {
            state: self,
            alarm_only,
            skip_reset,
            started: false,
            done: false,
        }
    }

    /// Whether exactly this address answers a normal search
    pub fn is_present(&mut self, address: &DeviceAddress) -> bool {
        self.verify(address, SearchCommand::Normal)
    }

    /// Whether exactly this address answers an alarm search
    pub fn is_alarming(&mut self, address: &DeviceAddress) -> bool {
        self.verify(address, SearchCommand::Alarm)
    }

    fn verify(&mut self, address: &DeviceAddress, command: SearchCommand) -> bool {
        match search::verify(
            self.transport.as_mut(),
            address,
            command,
            self.cursor.skip_reset(),
        ) {
            Ok(found) => found,
            Err(e) => {
                debug!(address = %address, error = %e, "Verification failed");
                false
            }
        }
    }

    /// Address one device for the commands that follow
    pub fn select(&mut self, address: &DeviceAddress) -> Result<bool, OneWireError> {
        search::select(self.transport.as_mut(), address)
    }

    /// Report only the given families
    pub fn set_family_filter(&mut self, codes: &[u8]) {
        self.filter = FamilyFilter::only(codes);
    }

    /// Report every family except the given ones
    pub fn exclude_families(&mut self, codes: &[u8]) {
        self.filter = FamilyFilter::excluding(codes);
    }

    pub fn target_all_families(&mut self) {
        self.filter = FamilyFilter::all();
    }

    pub fn cursor(&self) -> SearchCursor {
        self.cursor.clone()
    }

    pub fn current_address(&self) -> DeviceAddress {
        self.cursor.current_address()
    }
}

/// Lazy enumeration over a session's bus.
///
/// Yields each accepted device once; a failed step is yielded as an error and
/// ends the iteration.
pub struct Devices<'a> {
    state: &'a mut BusState,
    alarm_only: bool,
    skip_reset: bool,
    started: bool,
    done: bool,
}

impl Iterator for Devices<'_> {
    type Item = Result<DeviceAddress, OneWireError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let found = if self.started {
            self.state.find_next_device()
        } else {
            self.started = true;
            self.state.find_first_device(self.alarm_only, self.skip_reset)
        };
        match found {
            Ok(Some(address)) => Some(Ok(address)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// One adapter type bound to one transport instance
#[derive(Debug)]
pub struct Adapter {
    name: String,
    port_type_description: String,
    capabilities: Capabilities,
    port: Arc<RwLock<Option<String>>>,
    arbiter: Arbiter<BusState>,
}

impl Adapter {
    pub fn new(
        name: impl Into<String>,
        port_type_description: impl Into<String>,
        transport: Box<dyn BusTransport>,
    ) -> Self {
        let capabilities = transport.capabilities();
        let port = Arc::new(RwLock::new(transport.port_name().map(str::to_string)));
        Self {
            name: name.into(),
            port_type_description: port_type_description.into(),
            capabilities,
            port: Arc::clone(&port),
            arbiter: Arbiter::new(BusState {
                transport,
                cursor: SearchCursor::default(),
                filter: FamilyFilter::all(),
                capabilities,
                port,
            }),
        }
    }

    /// Change how often a waiting acquire retries
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Self {
            arbiter: self.arbiter.with_poll_interval(poll_interval),
            ..self
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

    // Self-locking operations; each waits for a current session to end,
    // except `port_name`, which reads the last recorded selection

    pub fn port_names(&self) -> Vec<String> {
        self.arbiter.with_resource(|state| state.transport.port_names())
    }

    pub fn select_port(&self, port: &str) -> Result<bool, OneWireError> {
        let selected = self.arbiter.with_resource(|state| {
            let selected = state.transport.select_port(port);
            state.record_port();
            selected
        })?;
        debug!(adapter = %self.name, port, selected, "Port selection");
        Ok(selected)
    }

    pub fn free_port(&self) -> Result<(), OneWireError> {
        self.arbiter.with_resource(BusState::free_port)
    }

    /// Selected port; never waits for the bus
    pub fn port_name(&self) -> Option<String> {
        self.port
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn adapter_version(&self) -> String {
        self.arbiter
            .with_resource(|state| state.transport.adapter_version())
    }

    // Exclusive access

    /// Acquire the bus, waiting without bound or trying once
    pub fn acquire(&self, blocking: bool) -> Option<BusSession<'_>> {
        let session = self.arbiter.acquire(blocking);
        debug!(adapter = %self.name, blocking, acquired = session.is_some(), "Exclusive acquire");
        session
    }

    pub fn acquire_blocking(&self) -> BusSession<'_> {
        self.arbiter.acquire_blocking()
    }

    pub fn try_acquire(&self) -> Option<BusSession<'_>> {
        self.arbiter.try_acquire()
    }

    /// Wait for the bus until the deadline passes or `cancel` fires
    pub fn acquire_bounded(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Option<BusSession<'_>> {
        self.arbiter.acquire_bounded(deadline, cancel)
    }
}
