//! Common Utilities
//!
//! Provides unit conversions and resource-grid helpers used across the stack

use tracing::trace;

/// Thermal noise power spectral density at 290 K, in dBm/Hz
pub const THERMAL_NOISE_DBM_HZ: f64 = -174.0;

/// Speed of light in m/s
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Convert a power ratio in dB to linear scale
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear power ratio to dB
pub fn linear_to_db(linear: f64) -> f64 {
    10.0 * linear.log10()
}

/// Convert a power in dBm to Watts
pub fn dbm_to_watts(dbm: f64) -> f64 {
    10f64.powf((dbm - 30.0) / 10.0)
}

/// Convert a power in Watts to dBm
pub fn watts_to_dbm(watts: f64) -> f64 {
    10.0 * watts.log10() + 30.0
}

/// Calculate resource blocks from bandwidth and subcarrier spacing
pub fn calculate_nrb(bandwidth_hz: f64, scs_hz: f64) -> u32 {
    // Each RB has 12 subcarriers
    const SUBCARRIERS_PER_RB: f64 = 12.0;

    let nrb = (bandwidth_hz / (scs_hz * SUBCARRIERS_PER_RB)).floor();

    trace!("Calculated {} RBs for {}Hz bandwidth with {}Hz SCS",
           nrb, bandwidth_hz, scs_hz);

    nrb as u32
}

/// Normalize an azimuth in degrees into [0, 360)
pub fn wrap_azimuth_deg(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Normalize a zenith angle in degrees into [0, 180], reflecting at the boundary
pub fn wrap_zenith_deg(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped > 180.0 {
        360.0 - wrapped
    } else {
        wrapped
    }
}

/// Time utilities for slot/frame calculations
pub mod time {
    use std::time::Duration;

    /// Subframe duration (1 ms) in nanoseconds
    pub const SUBFRAME_NS: u64 = 1_000_000;

    /// Slot duration for a numerology index (1 ms / 2^n)
    pub fn slot_duration(numerology: u8) -> Duration {
        Duration::from_nanos(SUBFRAME_NS >> numerology)
    }

    /// Number of slots per subframe
    pub fn slots_per_subframe(numerology: u8) -> u8 {
        1u8 << numerology
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conversions() {
        assert!((db_to_linear(10.0) - 10.0).abs() < 1e-12);
        assert!((linear_to_db(100.0) - 20.0).abs() < 1e-12);
        assert!((dbm_to_watts(30.0) - 1.0).abs() < 1e-12);
        assert!((watts_to_dbm(0.001) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_nrb() {
        // 100 MHz bandwidth with 120 kHz SCS
        assert_eq!(calculate_nrb(100e6, 120e3), 69);

        // 400 MHz bandwidth with 120 kHz SCS
        assert_eq!(calculate_nrb(400e6, 120e3), 277);
    }

    #[test]
    fn test_angle_wrapping() {
        assert!((wrap_azimuth_deg(-90.0) - 270.0).abs() < 1e-12);
        assert!((wrap_azimuth_deg(720.5) - 0.5).abs() < 1e-9);
        assert!((wrap_zenith_deg(190.0) - 170.0).abs() < 1e-12);
        assert!((wrap_zenith_deg(-10.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_slot_duration() {
        assert_eq!(time::slot_duration(0).as_nanos(), 1_000_000);
        assert_eq!(time::slot_duration(3).as_nanos(), 125_000);
        assert_eq!(time::slots_per_subframe(5), 32);
    }
}
