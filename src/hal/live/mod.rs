mod driver_client;
mod driver_request;

use super::hal_common::{FlightHal, HardwareError, SensorSnapshot};
use crate::flight_control::common::Position;
use crate::info;
use async_trait::async_trait;
use driver_client::DriverClient;
use driver_request::{ArmingRequest, DriverAck, PositionCommandRequest, SensorsRequest};
use std::time::Duration;

/// Hardware backend that forwards every call to the driver layer over HTTP.
#[derive(Debug)]
pub struct LiveHal {
    client: DriverClient,
}

impl LiveHal {
    pub fn connect(base_url: &str, timeout: Duration) -> Result<Self, HardwareError> {
        let client = DriverClient::new(base_url, timeout)?;
        info!("Driver layer at {}", client.url());
        Ok(Self { client })
    }

    fn check_ack(ack: DriverAck) -> Result<(), HardwareError> {
        if ack.accepted {
            Ok(())
        } else {
            Err(HardwareError::Rejected(ack.message.unwrap_or_default()))
        }
    }
}

#[async_trait]
impl FlightHal for LiveHal {
    fn backend_name(&self) -> &'static str { "live" }

    async fn send_position_command(&self, target: Position, speed: f64) -> Result<(), HardwareError> {
        let request =
            PositionCommandRequest { lat: target.lat(), lon: target.lon(), alt: target.alt(), speed };
        Self::check_ack(self.client.send(&request).await?)
    }

    async fn read_sensors(&self) -> Result<SensorSnapshot, HardwareError> {
        Ok(self.client.send(&SensorsRequest).await?.into())
    }

    async fn arm(&self) -> Result<(), HardwareError> {
        Self::check_ack(self.client.send(&ArmingRequest { armed: true }).await?)
    }

    async fn disarm(&self) -> Result<(), HardwareError> {
        Self::check_ack(self.client.send(&ArmingRequest { armed: false }).await?)
    }
}
