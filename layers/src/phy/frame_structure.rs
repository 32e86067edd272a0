//! Sidelink Frame Structure
//!
//! Slot and symbol timing derived from the numerology, as in 3GPP TS 38.211.
//! Bandwidth has to be known before the numerology is applied because the
//! resource-block count depends on both.

use crate::LayerError;
use common::types::SubcarrierSpacing;
use common::utils::{calculate_nrb, time};
use std::time::Duration;
use tracing::debug;

/// Default number of OFDM symbols per slot (normal cyclic prefix)
pub const DEFAULT_SYMBOLS_PER_SLOT: u8 = 14;

/// Subframes per 10 ms frame
pub const SUBFRAMES_PER_FRAME: u8 = 10;

/// Immutable frame timing shared by every MAC and PHY of a simulation
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTiming {
    numerology: u8,
    slot_period: Duration,
    symbol_period: Duration,
    symbols_per_slot: u8,
    slots_per_subframe: u8,
    subframes_per_frame: u8,
    bandwidth_hz: f64,
    center_frequency_hz: f64,
    subcarrier_spacing: SubcarrierSpacing,
    num_rb: u32,
}

impl FrameTiming {
    pub fn numerology(&self) -> u8 {
        self.numerology
    }

    pub fn slot_period(&self) -> Duration {
        self.slot_period
    }

    pub fn symbol_period(&self) -> Duration {
        self.symbol_period
    }

    pub fn symbols_per_slot(&self) -> u8 {
        self.symbols_per_slot
    }

    pub fn slots_per_subframe(&self) -> u8 {
        self.slots_per_subframe
    }

    pub fn subframes_per_frame(&self) -> u8 {
        self.subframes_per_frame
    }

    pub fn bandwidth_hz(&self) -> f64 {
        self.bandwidth_hz
    }

    pub fn center_frequency_hz(&self) -> f64 {
        self.center_frequency_hz
    }

    pub fn subcarrier_spacing(&self) -> SubcarrierSpacing {
        self.subcarrier_spacing
    }

    /// Bandwidth of one resource block in Hz
    pub fn rb_bandwidth_hz(&self) -> f64 {
        self.subcarrier_spacing.as_hz() * 12.0
    }

    pub fn num_rb(&self) -> u32 {
        self.num_rb
    }
}

/// Step-wise construction of [`FrameTiming`]
#[derive(Debug, Clone)]
pub struct FrameTimingBuilder {
    bandwidth_hz: Option<f64>,
    center_frequency_hz: Option<f64>,
    symbols_per_slot: u8,
    numerology: Option<u8>,
}

impl Default for FrameTimingBuilder {
    fn default() -> Self {
        Self {
            bandwidth_hz: None,
            center_frequency_hz: None,
            symbols_per_slot: DEFAULT_SYMBOLS_PER_SLOT,
            numerology: None,
        }
    }
}

impl FrameTimingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bandwidth(mut self, bandwidth_hz: f64) -> Result<Self, LayerError> {
        if !(bandwidth_hz > 0.0) {
            return Err(LayerError::InvalidConfiguration(
                format!("Bandwidth must be positive, got {} Hz", bandwidth_hz)
            ));
        }
        self.bandwidth_hz = Some(bandwidth_hz);
        Ok(self)
    }

    pub fn set_center_frequency(mut self, frequency_hz: f64) -> Result<Self, LayerError> {
        if !(frequency_hz > 0.0) {
            return Err(LayerError::InvalidConfiguration(
                format!("Center frequency must be positive, got {} Hz", frequency_hz)
            ));
        }
        self.center_frequency_hz = Some(frequency_hz);
        Ok(self)
    }

    pub fn set_symbols_per_slot(mut self, symbols: u8) -> Result<Self, LayerError> {
        if symbols == 0 {
            return Err(LayerError::InvalidConfiguration("Slot needs at least one symbol".into()));
        }
        self.symbols_per_slot = symbols;
        Ok(self)
    }

    /// Apply a numerology index; the bandwidth must already be set
    pub fn set_numerology(mut self, numerology: u8) -> Result<Self, LayerError> {
        if self.bandwidth_hz.is_none() {
            return Err(LayerError::InvalidConfiguration(
                "Bandwidth must be set before the numerology".into()
            ));
        }
        if numerology > SubcarrierSpacing::MAX_NUMEROLOGY {
            return Err(LayerError::InvalidConfiguration(
                format!("Numerology {} outside [0, {}]", numerology, SubcarrierSpacing::MAX_NUMEROLOGY)
            ));
        }
        self.numerology = Some(numerology);
        Ok(self)
    }

    pub fn build(self) -> Result<FrameTiming, LayerError> {
        let bandwidth_hz = self.bandwidth_hz.ok_or_else(|| {
            LayerError::InvalidConfiguration("Bandwidth not set".into())
        })?;
        let center_frequency_hz = self.center_frequency_hz.ok_or_else(|| {
            LayerError::InvalidConfiguration("Center frequency not set".into())
        })?;
        let numerology = self.numerology.ok_or_else(|| {
            LayerError::InvalidConfiguration("Numerology not set".into())
        })?;
        let subcarrier_spacing = SubcarrierSpacing::from_numerology(numerology).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!("Numerology {} has no subcarrier spacing", numerology))
        })?;

        let slots_per_subframe = time::slots_per_subframe(numerology);
        let slot_period = time::slot_duration(numerology);
        let symbol_period = slot_period / self.symbols_per_slot as u32;
        let num_rb = calculate_nrb(bandwidth_hz, subcarrier_spacing.as_hz());
        if num_rb == 0 {
            return Err(LayerError::InvalidConfiguration(
                format!("Bandwidth {} Hz holds no resource block at {:?}", bandwidth_hz, subcarrier_spacing)
            ));
        }

        debug!("Frame timing: numerology={}, slot={:?}, symbol={:?}, slots/subframe={}, RBs={}",
               numerology, slot_period, symbol_period, slots_per_subframe, num_rb);

        Ok(FrameTiming {
            numerology,
            slot_period,
            symbol_period,
            symbols_per_slot: self.symbols_per_slot,
            slots_per_subframe,
            subframes_per_frame: SUBFRAMES_PER_FRAME,
            bandwidth_hz,
            center_frequency_hz,
            subcarrier_spacing,
            num_rb,
        })
    }
}
