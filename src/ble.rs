//! Bluetooth LE radio abstraction.
//!
//! The wireless transport talks to the radio through [`Radio`] and
//! [`GattLink`]. Characteristic values cross this seam base64-framed, the
//! same way mobile GATT stacks hand them out; backends that work with raw
//! bytes frame and unframe at their edge.
//!
//! With the `btleplug` feature enabled, [`btle::BtleplugRadio`] provides a
//! backend on top of the platform Bluetooth stack.

use crate::error::RadioError;
use async_trait::async_trait;
use futures_core::Stream;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

/// Opaque identifier of a peer seen during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advertisement data relevant for discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeerId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// Event delivered by an active scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Discovered(Advertisement),
    Error(String),
}

/// Stream of scan results. Dropping it unsubscribes the listener.
pub type ScanEvents = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    WithResponse,
    WithoutResponse,
}

/// Central-role radio.
#[async_trait]
pub trait Radio: Send + Sync {
    /// Resolves once the adapter is powered on.
    async fn wait_powered_on(&self) -> Result<(), RadioError> {
        Ok(())
    }

    /// Starts scanning and returns the result listener.
    async fn start_scan(&self) -> Result<ScanEvents, RadioError>;

    async fn stop_scan(&self) -> Result<(), RadioError>;

    /// Opens a GATT connection to a previously scanned peer.
    async fn connect(&self, peer: &PeerId) -> Result<Box<dyn GattLink>, RadioError>;
}

/// An open GATT connection.
#[async_trait]
pub trait GattLink: Send + Sync {
    fn peer(&self) -> &PeerId;

    async fn discover_services(&self) -> Result<(), RadioError>;

    /// Reads a characteristic; the value is base64-framed.
    async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, RadioError>;

    /// Writes a base64-framed value to a characteristic.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &str,
        kind: WriteKind,
    ) -> Result<(), RadioError>;

    async fn disconnect(&self) -> Result<(), RadioError>;
}

#[cfg(feature = "btleplug")]
pub mod btle {
    //! [`Radio`] backend for the platform Bluetooth stack via `btleplug`.

    use super::{Advertisement, GattLink, PeerId, Radio, ScanEvent, ScanEvents, WriteKind};
    use crate::error::RadioError;
    use crate::protocol::{decode_characteristic, encode_characteristic};
    use async_trait::async_trait;
    use btleplug::api::{
        Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    };
    use btleplug::platform::{Adapter, Manager, Peripheral};
    use futures_util::StreamExt;
    use log::{debug, info};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    pub struct BtleplugRadio {
        adapter: Adapter,
        seen: Arc<Mutex<HashMap<PeerId, Peripheral>>>,
    }

    impl BtleplugRadio {
        /// Uses the first adapter reported by the platform.
        pub async fn new() -> Result<Self, RadioError> {
            let manager = Manager::new().await?;
            let adapter = manager
                .adapters()
                .await?
                .into_iter()
                .next()
                .ok_or(RadioError::NoAdapter)?;
            info!("Using first Bluetooth adapter reported by the platform");
            Ok(Self {
                adapter,
                seen: Arc::new(Mutex::new(HashMap::new())),
            })
        }
    }

    #[async_trait]
    impl Radio for BtleplugRadio {
        async fn start_scan(&self) -> Result<ScanEvents, RadioError> {
            let mut events = self.adapter.events().await?;
            self.adapter.start_scan(ScanFilter::default()).await?;

            let adapter = self.adapter.clone();
            let seen = self.seen.clone();
            Ok(Box::pin(async_stream::stream! {
                while let Some(event) = events.next().await {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                        _ => continue,
                    };
                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(p) => p,
                        Err(e) => {
                            yield ScanEvent::Error(e.to_string());
                            continue;
                        }
                    };
                    match peripheral.properties().await {
                        Ok(Some(props)) => {
                            let peer = PeerId(format!("{:?}", id));
                            seen.lock().insert(peer.clone(), peripheral);
                            yield ScanEvent::Discovered(Advertisement {
                                id: peer,
                                local_name: props.local_name,
                                rssi: props.rssi,
                            });
                        }
                        Ok(None) => {}
                        Err(e) => yield ScanEvent::Error(e.to_string()),
                    }
                }
            }))
        }

        async fn stop_scan(&self) -> Result<(), RadioError> {
            self.adapter.stop_scan().await?;
            Ok(())
        }

        async fn connect(&self, peer: &PeerId) -> Result<Box<dyn GattLink>, RadioError> {
            let peripheral = self
                .seen
                .lock()
                .get(peer)
                .cloned()
                .ok_or_else(|| RadioError::UnknownPeer(peer.0.clone()))?;
            peripheral.connect().await?;
            Ok(Box::new(BtleplugLink {
                peer: peer.clone(),
                peripheral,
            }))
        }
    }

    struct BtleplugLink {
        peer: PeerId,
        peripheral: Peripheral,
    }

    impl BtleplugLink {
        fn find_characteristic(
            &self,
            service: Uuid,
            uuid: Uuid,
        ) -> Result<Characteristic, RadioError> {
            self.peripheral
                .services()
                .into_iter()
                .filter(|s| s.uuid == service)
                .flat_map(|s| s.characteristics)
                .find(|c| c.uuid == uuid)
                .ok_or(RadioError::CharacteristicNotFound(uuid))
        }
    }

    #[async_trait]
    impl GattLink for BtleplugLink {
        fn peer(&self) -> &PeerId {
            &self.peer
        }

        async fn discover_services(&self) -> Result<(), RadioError> {
            self.peripheral.discover_services().await?;
            Ok(())
        }

        async fn read(&self, service: Uuid, characteristic: Uuid) -> Result<String, RadioError> {
            let ch = self.find_characteristic(service, characteristic)?;
            let bytes = self.peripheral.read(&ch).await?;
            Ok(encode_characteristic(&bytes))
        }

        async fn write(
            &self,
            service: Uuid,
            characteristic: Uuid,
            value: &str,
            kind: WriteKind,
        ) -> Result<(), RadioError> {
            let ch = self.find_characteristic(service, characteristic)?;
            let bytes =
                decode_characteristic(value).map_err(|e| RadioError::Framing(e.to_string()))?;
            let write_type = match kind {
                WriteKind::WithResponse => WriteType::WithResponse,
                WriteKind::WithoutResponse => WriteType::WithoutResponse,
            };
            debug!("GATT write {} ({} bytes)", characteristic, bytes.len());
            self.peripheral.write(&ch, &bytes, write_type).await?;
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), RadioError> {
            self.peripheral.disconnect().await?;
            Ok(())
        }
    }
}
