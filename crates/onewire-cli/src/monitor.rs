//! Device scans and the periodic watch loop

use anyhow::{anyhow, Result};
use onewire_adapter::{Adapter, CancelToken};
use onewire_core::{DeviceAddress, OneWireError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// What a single scan looks for
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub alarm_only: bool,
    pub skip_reset: bool,
    /// Report only these families (empty: all)
    pub include: Vec<u8>,
    pub exclude: Vec<u8>,
}

/// Enumerate the bus once.
///
/// Returns `Ok(None)` when `cancel` fired before the bus was acquired.
pub fn scan(
    adapter: &Adapter,
    options: &ScanOptions,
    cancel: Option<&CancelToken>,
) -> Result<Option<Vec<DeviceAddress>>, OneWireError> {
    let Some(mut session) = adapter.acquire_bounded(None, cancel) else {
        return Ok(None);
    };

    if !options.include.is_empty() {
        session.set_family_filter(&options.include);
    } else if !options.exclude.is_empty() {
        session.exclude_families(&options.exclude);
    } else {
        session.target_all_families();
    }

    let found = session
        .devices(options.alarm_only, options.skip_reset)
        .collect::<Result<Vec<_>, _>>()?;
    debug!(found = found.len(), "Scan complete");
    Ok(Some(found))
}

/// Change observed between two scans
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "address", rename_all = "snake_case")]
pub enum WatchEvent {
    Arrived(DeviceAddress),
    Departed(DeviceAddress),
}

/// Devices seen by the previous scan
#[derive(Debug, Default)]
pub struct DeviceSet {
    known: BTreeSet<DeviceAddress>,
}

impl DeviceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the known set with `scan`, returning departures then arrivals
    pub fn update(&mut self, scan: impl IntoIterator<Item = DeviceAddress>) -> Vec<WatchEvent> {
        let current: BTreeSet<_> = scan.into_iter().collect();
        let mut events: Vec<_> = self
            .known
            .difference(&current)
            .copied()
            .map(WatchEvent::Departed)
            .collect();
        events.extend(
            current
                .difference(&self.known)
                .copied()
                .map(WatchEvent::Arrived),
        );
        self.known = current;
        events
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }
}

/// Scan every `period` until Ctrl-C, printing arrivals and departures.
///
/// Bus I/O failures are logged and the next tick retries; other failures end
/// the loop.
pub async fn watch(
    adapter: Arc<Adapter>,
    options: ScanOptions,
    period: Duration,
    json: bool,
) -> Result<()> {
    let cancel = CancelToken::new();
    let mut ticker = interval(period);
    let mut devices = DeviceSet::new();

    info!(adapter = %adapter.name(), period_ms = period.as_millis() as u64, "Watching bus");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping watch");
                cancel.cancel();
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let scan_adapter = Arc::clone(&adapter);
        let scan_options = options.clone();
        let scan_cancel = cancel.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            scan(&scan_adapter, &scan_options, Some(&scan_cancel))
        });

        let result = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; cancelling scan");
                cancel.cancel();
                return Ok(());
            }
            joined = scanned => joined.map_err(|e| anyhow!("Scan task failed: {e}"))?,
        };

        match result {
            Ok(Some(found)) => {
                for event in devices.update(found) {
                    print_event(&event, json)?;
                }
                debug!(present = devices.len(), "Watch tick");
            }
            Ok(None) => return Ok(()),
            Err(e) if e.is_io() => warn!(error = %e, "Scan failed; retrying next tick"),
            Err(e) => return Err(e.into()),
        }
    }
}

fn print_event(event: &WatchEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
    } else {
        match event {
            WatchEvent::Arrived(address) => println!("+ {address}"),
            WatchEvent::Departed(address) => println!("- {address}"),
        }
    }
    Ok(())
}
