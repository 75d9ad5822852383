//! The capability set the connection task needs from a transport.
//!
//! The actual radio and network stacks live in the platform crate; the
//! core only sees this trait. The two deployed transports are a
//! networked publish/subscribe link and a low-energy GATT link, selected
//! by configuration and wrapped in [`EitherTransport`] so the connection
//! task stays monomorphic.

use crank_icd::{Command, Side};

/// Which high-speed stream a binary batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HighSpeedStream {
    Side(Side),
    Imu,
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    type Error: core::fmt::Debug;

    /// Brings the link up. Called from the connect state and retried
    /// until it succeeds or the connection is disabled.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Link health, polled once per publish cycle.
    fn is_connected(&mut self) -> bool;

    /// Publishes the about-device payload. Sent once per attach.
    async fn publish_about(&mut self, payload: &str) -> Result<(), Self::Error>;

    async fn publish_housekeeping(&mut self, payload: &str)
        -> Result<(), Self::Error>;

    async fn publish_low_speed(&mut self, payload: &str) -> Result<(), Self::Error>;

    /// Publishes one batch of concatenated high-speed records.
    async fn publish_high_speed(
        &mut self,
        stream: HighSpeedStream,
        payload: &[u8],
    ) -> Result<(), Self::Error>;

    /// Non-blocking check for an inbound command.
    fn poll_command(&mut self) -> Option<Command>;

    /// Releases transport resources. The connection re-runs `connect`
    /// after a later enable.
    async fn shutdown(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EitherError<M, B> {
    Mqtt(M),
    Ble(B),
}

/// Tagged pair of the two deployed transports. Exactly one is active
/// per boot; the configuration decides which.
pub enum EitherTransport<M, B> {
    Mqtt(M),
    Ble(B),
}

impl<M: Transport, B: Transport> Transport for EitherTransport<M, B> {
    type Error = EitherError<M::Error, B::Error>;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        match self {
            Self::Mqtt(t) => t.connect().await.map_err(EitherError::Mqtt),
            Self::Ble(t) => t.connect().await.map_err(EitherError::Ble),
        }
    }

    fn is_connected(&mut self) -> bool {
        match self {
            Self::Mqtt(t) => t.is_connected(),
            Self::Ble(t) => t.is_connected(),
        }
    }

    async fn publish_about(&mut self, payload: &str) -> Result<(), Self::Error> {
        match self {
            Self::Mqtt(t) => t.publish_about(payload).await.map_err(EitherError::Mqtt),
            Self::Ble(t) => t.publish_about(payload).await.map_err(EitherError::Ble),
        }
    }

    async fn publish_housekeeping(
        &mut self,
        payload: &str,
    ) -> Result<(), Self::Error> {
        match self {
            Self::Mqtt(t) => {
                t.publish_housekeeping(payload).await.map_err(EitherError::Mqtt)
            }
            Self::Ble(t) => {
                t.publish_housekeeping(payload).await.map_err(EitherError::Ble)
            }
        }
    }

    async fn publish_low_speed(&mut self, payload: &str) -> Result<(), Self::Error> {
        match self {
            Self::Mqtt(t) => {
                t.publish_low_speed(payload).await.map_err(EitherError::Mqtt)
            }
            Self::Ble(t) => {
                t.publish_low_speed(payload).await.map_err(EitherError::Ble)
            }
        }
    }

    async fn publish_high_speed(
        &mut self,
        stream: HighSpeedStream,
        payload: &[u8],
    ) -> Result<(), Self::Error> {
        match self {
            Self::Mqtt(t) => {
                t.publish_high_speed(stream, payload).await.map_err(EitherError::Mqtt)
            }
            Self::Ble(t) => {
                t.publish_high_speed(stream, payload).await.map_err(EitherError::Ble)
            }
        }
    }

    fn poll_command(&mut self) -> Option<Command> {
        match self {
            Self::Mqtt(t) => t.poll_command(),
            Self::Ble(t) => t.poll_command(),
        }
    }

    async fn shutdown(&mut self) {
        match self {
            Self::Mqtt(t) => t.shutdown().await,
            Self::Ble(t) => t.shutdown().await,
        }
    }
}
