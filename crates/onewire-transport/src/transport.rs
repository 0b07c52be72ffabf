//! Transport trait implemented by concrete adapter drivers

use onewire_core::{
    Capabilities, OneWireError, PowerCondition, PowerDuration, ResetResult, SearchCommand, Speed,
};

/// Primitive operations of one physical bus adapter.
///
/// Port management (`port_names`, `select_port`, `free_port`, `port_name`)
/// may be called at any time. Every other operation is only issued by the
/// holder of an exclusive session, which brackets its use with
/// `begin_exclusive` / `end_exclusive`.
pub trait BusTransport: Send {
    /// Static feature flags of this adapter type
    fn capabilities(&self) -> Capabilities;

    /// Firmware or driver version string reported by the adapter
    fn adapter_version(&self) -> String;

    /// Names of the ports this adapter can be attached to
    fn port_names(&self) -> Vec<String>;

    /// Attach to a port, returning `false` if the port cannot be used
    fn select_port(&mut self, port: &str) -> Result<bool, OneWireError>;

    /// Detach from the selected port
    fn free_port(&mut self) -> Result<(), OneWireError>;

    /// Currently selected port
    fn port_name(&self) -> Option<&str>;

    /// Probe whether adapter hardware answers on the selected port
    fn adapter_detected(&mut self) -> Result<bool, OneWireError>;

    /// Try once to open the port exclusively (also excludes other processes)
    fn begin_exclusive(&mut self) -> bool;

    /// Close the exclusive open; calling it without a matching open is a no-op
    fn end_exclusive(&mut self);

    /// Issue a reset pulse and report what answered
    fn reset(&mut self) -> Result<ResetResult, OneWireError>;

    /// Run one search pass over all 64 address bits.
    ///
    /// `address` seeds the bits replayed below `last_discrepancy` and is
    /// overwritten with the address found along the path taken. Returns the
    /// new last discrepancy: the highest bit position (1-based) where
    /// devices disagreed and the 0 branch was taken, `last_discrepancy`
    /// unchanged when no such position exists, or a value above 64 when no
    /// device answered.
    fn search_step(
        &mut self,
        address: &mut [u8; 8],
        last_discrepancy: u8,
        command: SearchCommand,
        skip_reset: bool,
    ) -> Result<u8, OneWireError>;

    fn write_bit(&mut self, bit: bool) -> Result<(), OneWireError>;

    fn read_bit(&mut self) -> Result<bool, OneWireError>;

    fn write_byte(&mut self, byte: u8) -> Result<(), OneWireError>;

    fn read_byte(&mut self) -> Result<u8, OneWireError>;

    /// Send every byte of `block` and replace it with what was read back
    fn transfer_block(&mut self, block: &mut [u8]) -> Result<(), OneWireError>;

    fn set_speed(&mut self, speed: Speed) -> Result<(), OneWireError>;

    fn speed(&self) -> Speed;

    fn set_power_duration(&mut self, duration: PowerDuration) -> Result<(), OneWireError>;

    /// Arm or start strong power delivery
    fn start_power_delivery(&mut self, condition: PowerCondition) -> Result<bool, OneWireError>;

    fn set_program_pulse_duration(&mut self, duration: PowerDuration)
        -> Result<(), OneWireError>;

    /// Arm or deliver an EPROM program pulse
    fn start_program_pulse(&mut self, condition: PowerCondition) -> Result<bool, OneWireError>;

    /// Return the bus to normal (weak pull-up) levels
    fn set_power_normal(&mut self) -> Result<(), OneWireError>;
}
