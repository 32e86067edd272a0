//! Sidelink Collaborator Interfaces Library
//! 
//! This crate provides the collaborators the sidelink MAC/PHY core calls into:
//! the discrete-event scheduler, adaptive modulation and coding, the block
//! error model, path loss / channel condition and node mobility.

pub mod amc;
pub mod error_model;
pub mod event_queue;
pub mod mobility;
pub mod propagation;

use thiserror::Error;

pub use amc::{Amc, NrAmc};
pub use error_model::{ErrorModel, HarqInfo, IdealErrorModel, NrErrorModel};
pub use event_queue::{EventId, EventQueue, Scheduler};
pub use mobility::{ConstantVelocityMobility, MobilityModel};
pub use propagation::{ChannelCondition, FixedPathGain, PathLoss, V2vPathLoss, V2vScenario};

/// Interface errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterfaceError {
    #[error("Event scheduled in the past: at {at_ns} ns, now {now_ns} ns")]
    EventInPast { at_ns: u128, now_ns: u128 },

    #[error("Invalid MCS index: {0}")]
    InvalidMcs(u8),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
