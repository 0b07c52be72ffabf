//! Discrepancy search over the 64-bit address space
//!
//! Each search step walks one path from the root of the address tree to a
//! leaf. The cursor remembers the deepest branch point where the 0 side was
//! taken, and the next step replays the path up to it and takes the 1 side.
//! When a step finds no new branch point the walk is complete.

use onewire_core::{DeviceAddress, OneWireError, SearchCommand, ADDRESS_BITS, MATCH_ROM};
use onewire_transport::BusTransport;
use tracing::{debug, trace};

/// State carried between the steps of one enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCursor {
    last_discrepancy: u8,
    current: [u8; 8],
    alarm_only: bool,
    skip_reset: bool,
    exhausted: bool,
}

impl SearchCursor {
    /// 0 before the first step, otherwise the pending branch point
    pub fn last_discrepancy(&self) -> u8 {
        self.last_discrepancy
    }

    /// Address assembled by the most recent step
    pub fn current_address(&self) -> DeviceAddress {
        DeviceAddress::from_bytes(self.current)
    }

    pub fn alarm_only(&self) -> bool {
        self.alarm_only
    }

    pub fn skip_reset(&self) -> bool {
        self.skip_reset
    }

    /// Whether the final branch has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn command(&self) -> SearchCommand {
        SearchCommand::for_alarm(self.alarm_only)
    }

    /// Back to the root of the tree, keeping the search options
    fn restart(&mut self) {
        self.last_discrepancy = 0;
        self.current = [0; 8];
        self.exhausted = false;
    }
}

/// Which family codes an enumeration reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyFilter {
    include: Option<Vec<u8>>,
    exclude: Vec<u8>,
}

impl FamilyFilter {
    /// Report every device
    pub fn all() -> Self {
        Self::default()
    }

    /// Report only devices of the given families
    pub fn only(codes: &[u8]) -> Self {
        Self {
            include: Some(codes.to_vec()),
            exclude: Vec::new(),
        }
    }

    /// Report every device except those of the given families
    pub fn excluding(codes: &[u8]) -> Self {
        Self {
            include: None,
            exclude: codes.to_vec(),
        }
    }

    pub fn accepts(&self, address: &DeviceAddress) -> bool {
        let family = address.family();
        if self.exclude.contains(&family) {
            return false;
        }
        self.include
            .as_ref()
            .map_or(true, |include| include.contains(&family))
    }
}

/// Search operations over one transport and its cursor
pub(crate) struct SearchEngine<'a> {
    pub transport: &'a mut dyn BusTransport,
    pub cursor: &'a mut SearchCursor,
    pub filter: &'a FamilyFilter,
}

impl SearchEngine<'_> {
    pub fn find_first(
        &mut self,
        alarm_only: bool,
        skip_reset: bool,
    ) -> Result<Option<DeviceAddress>, OneWireError> {
        self.cursor.alarm_only = alarm_only;
        self.cursor.skip_reset = skip_reset;
        self.cursor.restart();
        self.find_next()
    }

    /// Next address accepted by the filter.
    ///
    /// Rejected addresses keep advancing the walk; only the reporting is
    /// suppressed.
    pub fn find_next(&mut self) -> Result<Option<DeviceAddress>, OneWireError> {
        let filter = self.filter;
        std::iter::from_fn(|| self.step().transpose())
            .find(|found| match found {
                Ok(address) => {
                    let accepted = filter.accepts(address);
                    if !accepted {
                        trace!(address = %address, "Skipping filtered family");
                    }
                    accepted
                }
                Err(_) => true,
            })
            .transpose()
    }

    /// One search pass; `None` marks the end of the enumeration
    fn step(&mut self) -> Result<Option<DeviceAddress>, OneWireError> {
        if self.cursor.exhausted {
            self.cursor.restart();
            return Ok(None);
        }

        let previous = self.cursor.last_discrepancy;
        let mut rom = self.cursor.current;
        let next = match self.transport.search_step(
            &mut rom,
            previous,
            self.cursor.command(),
            self.cursor.skip_reset,
        ) {
            Ok(next) => next,
            Err(e) => {
                debug!(error = %e, "Search step failed; ending enumeration");
                self.cursor.exhausted = true;
                return Err(e);
            }
        };

        if next > ADDRESS_BITS {
            trace!(previous, "No device answered the search");
            self.cursor.restart();
            return Ok(None);
        }

        self.cursor.current = rom;
        self.cursor.last_discrepancy = next;
        if next == previous {
            self.cursor.exhausted = true;
        }

        let address = DeviceAddress::from_bytes(rom);
        trace!(address = %address, previous, next, "Search step");
        Ok(Some(address))
    }
}

/// Check that exactly `address` answers a search, without touching any cursor
pub(crate) fn verify(
    transport: &mut dyn BusTransport,
    address: &DeviceAddress,
    command: SearchCommand,
    skip_reset: bool,
) -> Result<bool, OneWireError> {
    let mut scratch = *address.bytes();
    let result = transport.search_step(&mut scratch, ADDRESS_BITS, command, skip_reset)?;
    Ok(result <= ADDRESS_BITS && scratch == *address.bytes())
}

/// Reset the bus and address a single device with Match ROM
pub(crate) fn select(
    transport: &mut dyn BusTransport,
    address: &DeviceAddress,
) -> Result<bool, OneWireError> {
    let reset = transport.reset()?;
    if !reset.is_present() {
        debug!(address = %address, reset = ?reset, "No presence; device not selected");
        return Ok(false);
    }

    let mut block = [0u8; 9];
    block[0] = MATCH_ROM;
    block[1..].copy_from_slice(address.bytes());
    transport.transfer_block(&mut block)?;
    Ok(true)
}
