use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use uuid::Uuid;

use crate::device::constants::EVENT_CHANNEL_CAPACITY;
use crate::device::types::{AdapterEvent, DiscoveredDevice, PeripheralAddress};
use crate::error::DeviceError;

/// Contract between the link loop and the platform bluetooth stack.
///
/// `connect` issues the attempt and returns immediately; its outcome
/// arrives later as `LinkUp` or `LinkDown` on the `events` stream. The
/// port reports every advertisement it sees; filtering by identifier is
/// the loop's job.
#[async_trait]
pub trait AdapterPort: Send + Sync {
    async fn is_powered(&self) -> Result<bool, DeviceError>;

    async fn start_scan(&self) -> Result<(), DeviceError>;

    async fn stop_scan(&self) -> Result<(), DeviceError>;

    async fn connect(&self, address: &PeripheralAddress) -> Result<(), DeviceError>;

    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// The serialized callback stream. May be taken once.
    async fn events(&self) -> Result<BoxStream<'static, AdapterEvent>, DeviceError>;
}

/// `AdapterPort` on top of btleplug, using the first adapter the
/// platform reports.
pub struct BtleAdapter {
    adapter: Adapter,
    scan_filter: ScanFilter,
    // peripheral the latest connect was issued against; link-up/link-down
    // events are scoped to it
    connected: Arc<Mutex<Option<Peripheral>>>,
    events_tx: Sender<AdapterEvent>,
    events_rx: Mutex<Option<Receiver<AdapterEvent>>>,
}

impl BtleAdapter {
    pub async fn first_available(service_filter: Option<Uuid>) -> Result<Self, DeviceError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters.into_iter().next().ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let scan_filter = match service_filter {
            Some(service) => ScanFilter { services: vec![service] },
            None => ScanFilter::default(),
        };

        let (events_tx, events_rx) = channel::<AdapterEvent>(EVENT_CHANNEL_CAPACITY);

        Ok(BtleAdapter {
            adapter,
            scan_filter,
            connected: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    async fn find_peripheral(&self, address: &PeripheralAddress) -> Result<Option<Peripheral>, DeviceError> {
        for peripheral in self.adapter.peripherals().await? {
            match peripheral.address().to_string().parse::<PeripheralAddress>() {
                Ok(candidate) if candidate == *address => return Ok(Some(peripheral)),
                _ => {}
            }
        }

        Ok(None)
    }
}

fn current_peripheral(connected: &Mutex<Option<Peripheral>>) -> Option<Peripheral> {
    connected.lock().expect("Failed to lock connected peripheral").clone()
}

fn is_current(connected: &Mutex<Option<Peripheral>>, id: &PeripheralId) -> bool {
    match current_peripheral(connected) {
        Some(peripheral) => peripheral.id() == *id,
        None => false,
    }
}

async fn forward_central_events(
    adapter: Adapter,
    connected: Arc<Mutex<Option<Peripheral>>>,
    mut central_events: BoxStream<'static, CentralEvent>,
    mut tx: Sender<AdapterEvent>,
) {
    while let Some(event) = central_events.next().await {
        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let peripheral = match adapter.peripheral(&id).await {
                    Ok(peripheral) => peripheral,
                    Err(err) => {
                        warn!("Failed to query BLE adapter for peripheral: {}", err);
                        continue;
                    },
                };

                match peripheral.properties().await {
                    Err(err) => {
                        warn!("Could not query peripheral for properties: {:?}", err);
                        continue;
                    },
                    Ok(None) => {
                        debug!("Peripheral has no properties");
                        continue;
                    },
                    Ok(Some(properties)) => {
                        let address = match properties.address.to_string().parse::<PeripheralAddress>() {
                            Ok(address) => address,
                            Err(_) => continue,
                        };

                        AdapterEvent::Discovered(DiscoveredDevice {
                            address,
                            rssi: properties.rssi,
                            local_name: properties.local_name,
                        })
                    },
                }
            },
            CentralEvent::DeviceConnected(id) => {
                if !is_current(&connected, &id) {
                    continue;
                }
                AdapterEvent::LinkUp
            },
            CentralEvent::DeviceDisconnected(id) => {
                if !is_current(&connected, &id) {
                    continue;
                }
                connected.lock().expect("Failed to lock connected peripheral").take();
                AdapterEvent::LinkDown { status: None }
            },
            CentralEvent::StateUpdate(state) => {
                debug!("Adapter state update: {:?}", state);
                continue;
            },
            _ => continue,
        };

        if tx.send(forwarded).await.is_err() {
            // receiver is gone, the loop has shut down
            break;
        }
    }

    debug!("Central event stream ended");
}

#[async_trait]
impl AdapterPort for BtleAdapter {
    async fn is_powered(&self) -> Result<bool, DeviceError> {
        let state = self.adapter.adapter_state().await?;
        Ok(matches!(state, CentralState::PoweredOn))
    }

    async fn start_scan(&self) -> Result<(), DeviceError> {
        self.adapter.start_scan(self.scan_filter.clone()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), DeviceError> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &PeripheralAddress) -> Result<(), DeviceError> {
        let peripheral = self
            .find_peripheral(address)
            .await?
            .ok_or_else(|| DeviceError::UnknownPeripheral(address.clone()))?;

        *self.connected.lock().expect("Failed to lock connected peripheral") = Some(peripheral.clone());

        let mut tx = self.events_tx.clone();
        spawn(async move {
            // connect resolving is also reported as a DeviceConnected
            // central event; the loop treats the duplicate as a no-op
            let outcome = match peripheral.connect().await {
                Ok(()) => AdapterEvent::LinkUp,
                Err(err) => {
                    warn!("Connecting to peripheral failed: {:?}", err);
                    AdapterEvent::LinkDown { status: Some(err.to_string()) }
                },
            };

            let _ = tx.send(outcome).await;
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let peripheral = self.connected.lock().expect("Failed to lock connected peripheral").take();

        if let Some(peripheral) = peripheral {
            peripheral.disconnect().await?;
        }

        Ok(())
    }

    async fn events(&self) -> Result<BoxStream<'static, AdapterEvent>, DeviceError> {
        let rx = self
            .events_rx
            .lock()
            .expect("Failed to lock event receiver")
            .take()
            .ok_or(DeviceError::EventStreamTaken)?;

        let central_events = self.adapter.events().await?;
        spawn(forward_central_events(
            self.adapter.clone(),
            Arc::clone(&self.connected),
            central_events,
            self.events_tx.clone(),
        ));

        Ok(rx.boxed())
    }
}
