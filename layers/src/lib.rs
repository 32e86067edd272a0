//! Sidelink Protocol Stack Layers Library
//! 
//! This crate implements the slot-based sidelink MAC and the spectrum-domain
//! PHY of a millimeter-wave vehicular network, together with the RLC bearer
//! collaborator, the per-device glue and the simulation session driving them.

pub mod device;
pub mod mac;
pub mod network;
pub mod packet;
pub mod phy;
pub mod rlc;
pub mod trace;

use common::Rnti;
use thiserror::Error;

pub use network::{NetworkConfig, SidelinkNetwork};

/// Common errors for protocol layers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LayerError {
    #[error("Layer not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown device with RNTI {0}")]
    UnknownDevice(Rnti),

    #[error("No upper layer registered for logical channel {0}")]
    UnknownLogicalChannel(u8),

    #[error("Unsupported allocation: {0}")]
    UnsupportedAllocation(String),

    #[error("Channel model error: {0}")]
    ChannelModel(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] interfaces::InterfaceError),
}
