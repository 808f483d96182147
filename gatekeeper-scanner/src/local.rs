use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager};

use gatekeeper_domain::identifier::DeviceId;
use gatekeeper_domain::observation::Advertisement;
use gatekeeper_tracker::service::TrackerHandle;

use crate::ibeacon::{self, APPLE_COMPANY_ID};

/// How long each scan window stays open before the adapter is polled.
const SCAN_WINDOW: Duration = Duration::from_secs(1);

/// The hub's own radio, observing through the first available adapter.
pub struct LocalScanner {
    adapter: Adapter,
}

impl LocalScanner {
    pub async fn new() -> Result<LocalScanner> {
        let manager = Manager::new().await?;
        let mut adapter_list = manager.adapters().await?;
        let adapter = adapter_list
            .pop()
            .ok_or_else(|| anyhow!("no Bluetooth adapters found"))?;
        Ok(LocalScanner { adapter })
    }

    /// One scan window: everything currently advertising, as records the
    /// tracker understands.
    pub async fn scan_once(&self) -> Result<Vec<Advertisement>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .context("starting BLE scan")?;
        time::sleep(SCAN_WINDOW).await;
        let peripherals = self.adapter.peripherals().await?;
        let mut records = Vec::new();
        for peripheral in &peripherals {
            let Some(properties) = peripheral.properties().await? else {
                continue;
            };
            if let Some(advertisement) = advertisement_from_properties(&properties) {
                records.push(advertisement);
            }
        }
        self.adapter.stop_scan().await.context("stopping BLE scan")?;
        Ok(records)
    }
}

/// Map advertised properties to a tracker record. iBeacon frames identify
/// by proximity UUID, everything else by MAC; sightings without an RSSI
/// are useless to the pipeline and dropped.
pub fn advertisement_from_properties(properties: &PeripheralProperties) -> Option<Advertisement> {
    let rssi = i32::from(properties.rssi?);
    let beacon = properties
        .manufacturer_data
        .get(&APPLE_COMPANY_ID)
        .and_then(|data| ibeacon::parse(data));
    let (identifier, major, minor) = match beacon {
        Some(frame) => (
            DeviceId::uuid(&frame.uuid),
            Some(frame.major),
            Some(frame.minor),
        ),
        None => (DeviceId::mac(&properties.address.to_string()), None, None),
    };
    Some(Advertisement {
        identifier,
        rssi,
        name: properties.local_name.clone(),
        major,
        minor,
    })
}

/// Scan until shutdown, forwarding every sighting into the engine queue
/// under the hub's reserved satellite id.
pub async fn run(tracker: TrackerHandle, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let scanner = LocalScanner::new().await?;
    info!("local scanner started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            scanned = scanner.scan_once() => {
                match scanned {
                    Ok(records) => {
                        debug!(count = records.len(), "local scan window");
                        for advertisement in records {
                            tracker.observe_local(advertisement).await;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "local scan failed, backing off");
                        time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }
    info!("local scanner stopped");
    Ok(())
}
