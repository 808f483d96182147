use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use gatekeeper_domain::observation::Advertisement;

use crate::calibration::{CalibrationAction, CalibrationReply};
use crate::discovery_cache::DiscoveryEntry;
use crate::engine::Engine;
use crate::events::{Command, Inbound, PresenceUpdate};

/// Cadence of the absence/liveness sweep.
pub const MAINTENANCE_TICK: Duration = Duration::from_secs(2);

/// Where finished publications go. The MQTT layer implements this; tests
/// record into memory.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn publish(&self, update: &PresenceUpdate) -> Result<()>;
}

/// Cheap cloneable front door to the engine queue. Every producer (bus
/// dispatcher, local scanner, admin surface) posts through this, which
/// is what keeps observations ordered per (satellite, identifier) and the
/// engine single-threaded.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: mpsc::Sender<Inbound>,
}

impl TrackerHandle {
    pub async fn observe(&self, sat_id: &str, advertisement: Advertisement) {
        self.send(Inbound::Observation {
            sat_id: sat_id.to_string(),
            advertisement,
        })
        .await;
    }

    pub async fn observe_local(&self, advertisement: Advertisement) {
        self.observe(crate::HUB_SATELLITE_ID, advertisement).await;
    }

    pub async fn health(&self, sat_id: &str, sensor: &str, value: &str) {
        self.send(Inbound::Health {
            sat_id: sat_id.to_string(),
            sensor: sensor.to_string(),
            value: value.to_string(),
        })
        .await;
    }

    pub async fn reload_config(&self) {
        self.send(Inbound::Command(Command::ReloadConfig)).await;
    }

    pub async fn clear_discovery_cache(&self) {
        self.send(Inbound::Command(Command::ClearDiscoveryCache))
            .await;
    }

    pub async fn calibrate(
        &self,
        sat_id: &str,
        action: CalibrationAction,
    ) -> Result<CalibrationReply> {
        let (reply, rx) = oneshot::channel();
        self.send(Inbound::Command(Command::Calibrate {
            sat_id: sat_id.to_string(),
            action,
            reply,
        }))
        .await;
        Ok(rx.await?)
    }

    pub async fn discovery_snapshot(&self) -> Result<Vec<DiscoveryEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(Inbound::Command(Command::DiscoverySnapshot { reply }))
            .await;
        Ok(rx.await?)
    }

    async fn send(&self, event: Inbound) {
        if self.tx.send(event).await.is_err() {
            debug!("tracker queue closed, event dropped");
        }
    }
}

/// Build the queue. Capacity bounds how far the radios can run ahead of
/// the engine before backpressure kicks in.
pub fn channel(capacity: usize) -> (TrackerHandle, mpsc::Receiver<Inbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    (TrackerHandle { tx }, rx)
}

/// Run the engine until shutdown flips or every handle is gone. All
/// engine access happens here, one event at a time; publications are
/// awaited in place, which serialises them per device for free.
pub async fn run(
    mut engine: Engine,
    mut rx: mpsc::Receiver<Inbound>,
    sink: Arc<dyn UpdateSink>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(MAINTENANCE_TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!("tracker service started");
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = rx.recv() => {
                match event {
                    Some(event) => handle_event(&mut engine, event, &sink).await,
                    None => break,
                }
            }
            _ = tick.tick() => {
                for update in engine.sweep(Utc::now()) {
                    deliver(&sink, &update).await;
                }
            }
        }
    }
    info!("tracker service stopped");
}

async fn handle_event(engine: &mut Engine, event: Inbound, sink: &Arc<dyn UpdateSink>) {
    let now = Utc::now();
    match event {
        Inbound::Observation {
            sat_id,
            advertisement,
        } => {
            if let Some(update) = engine.ingest(&sat_id, &advertisement, now) {
                deliver(sink, &update).await;
            }
        }
        Inbound::Health {
            sat_id,
            sensor,
            value,
        } => engine.health(&sat_id, &sensor, &value, now),
        Inbound::Command(Command::ReloadConfig) => engine.reload_config(),
        Inbound::Command(Command::ClearDiscoveryCache) => engine.clear_discovery_cache(),
        Inbound::Command(Command::Calibrate {
            sat_id,
            action,
            reply,
        }) => {
            let _ = reply.send(engine.calibrate(&sat_id, action, now));
        }
        Inbound::Command(Command::DiscoverySnapshot { reply }) => {
            let _ = reply.send(engine.discovery_snapshot());
        }
    }
}

async fn deliver(sink: &Arc<dyn UpdateSink>, update: &PresenceUpdate) {
    // Publish failures are logged and dropped; the satellite re-sends.
    if let Err(err) = sink.publish(update).await {
        warn!(device = %update.device.alias, %err, "presence publish failed");
    }
}

#[cfg(test)]
mod test {
    use super::{UpdateSink, channel, run};
    use crate::engine::Engine;
    use crate::events::PresenceUpdate;
    use anyhow::Result;
    use async_trait::async_trait;
    use gatekeeper_config::ConfigStore;
    use gatekeeper_domain::device::KnownDevice;
    use gatekeeper_domain::identifier::DeviceId;
    use gatekeeper_domain::observation::Advertisement;
    use gatekeeper_domain::satellite::Satellite;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Default)]
    struct RecordingSink {
        updates: Mutex<Vec<PresenceUpdate>>,
    }

    #[async_trait]
    impl UpdateSink for RecordingSink {
        async fn publish(&self, update: &PresenceUpdate) -> Result<()> {
            self.updates.lock().unwrap().push(update.clone());
            Ok(())
        }
    }

    fn engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConfigStore::open(dir.path()).unwrap());
        store
            .save_devices(&[KnownDevice::new(
                &DeviceId::mac("AA:BB:CC:DD:EE:01"),
                "Phone",
                "Bluetooth",
            )])
            .unwrap();
        let mut sats = BTreeMap::new();
        sats.insert(
            "s1".to_string(),
            Satellite {
                room: "Kitchen".to_string(),
                x: None,
                y: None,
                ref_rssi_1m: -59,
                last_seen: 0.0,
            },
        );
        store.save_satellites(&sats).unwrap();
        (dir, Engine::new(store))
    }

    #[tokio::test]
    async fn observation_flows_to_the_sink() {
        let (_dir, engine) = engine();
        let sink = Arc::new(RecordingSink::default());
        let (handle, rx) = channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(engine, rx, sink.clone(), shutdown_rx));

        handle
            .observe(
                "s1",
                Advertisement::new(DeviceId::mac("AA:BB:CC:DD:EE:01"), -60),
            )
            .await;

        // wait for the publication to land
        for _ in 0..50 {
            if !sink.updates.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        {
            let updates = sink.updates.lock().unwrap();
            assert_eq!(updates.len(), 1);
            assert_eq!(updates[0].room, "Kitchen");
            assert!(updates[0].present);
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("service exits promptly on shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn calibration_round_trips_through_the_queue() {
        use crate::calibration::{CalibrationAction, CalibrationReply};

        let (_dir, engine) = engine();
        let sink = Arc::new(RecordingSink::default());
        let (handle, rx) = channel(64);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(engine, rx, sink, shutdown_rx));

        let reply = handle
            .calibrate("s1", CalibrationAction::Start)
            .await
            .unwrap();
        assert!(matches!(reply, CalibrationReply::Started { .. }));

        handle
            .observe(
                "s1",
                Advertisement::new(DeviceId::mac("00:11:22:33:44:55"), -59),
            )
            .await;
        let reply = handle
            .calibrate("s1", CalibrationAction::Status)
            .await
            .unwrap();
        let CalibrationReply::Status { count, .. } = reply else {
            panic!("expected status");
        };
        assert_eq!(count, 1);

        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("service exits when every handle is gone")
            .unwrap();
    }
}
