//! Oxygen absorption around the 60 GHz band (TR 38.901 Table 7.6.1-1)

use crate::LayerError;

const FIRST_GHZ: f64 = 52.0;

/// Lowest tabulated frequency in Hz
pub const MIN_FREQUENCY_HZ: f64 = 52e9;

/// Highest tabulated frequency in Hz
pub const MAX_FREQUENCY_HZ: f64 = 68e9;

/// Specific attenuation in dB/km at 52, 53, ... 68 GHz
const ATTENUATION_DB_PER_KM: [f64; 17] = [
    1.5, 3.0, 5.7, 9.0, 11.5, 13.3, 14.3, 14.9, 15.1, 14.6, 14.3, 12.2, 8.1, 4.8, 2.3, 1.1, 0.6,
];

/// Highest tabulated frequency in GHz
const LAST_GHZ: f64 = FIRST_GHZ + (ATTENUATION_DB_PER_KM.len() - 1) as f64;

/// Whether `frequency_hz` falls inside the tabulated range
pub fn in_range(frequency_hz: f64) -> bool {
    let ghz = frequency_hz / 1e9;
    (FIRST_GHZ..=LAST_GHZ).contains(&ghz)
}

/// Specific attenuation in dB/km, quadratically interpolated
pub fn specific_attenuation(frequency_hz: f64) -> Result<f64, LayerError> {
    if !in_range(frequency_hz) {
        return Err(LayerError::ChannelModel(format!(
            "Oxygen absorption undefined at {:.2} GHz (valid {}-{} GHz)",
            frequency_hz / 1e9, FIRST_GHZ, LAST_GHZ
        )));
    }
    let x = frequency_hz / 1e9 - FIRST_GHZ;
    let last = ATTENUATION_DB_PER_KM.len() - 1;
    // Three-point Lagrange window centered on the nearest sample
    let center = (x.round() as usize).clamp(1, last - 1);
    let (x0, x1, x2) = ((center - 1) as f64, center as f64, (center + 1) as f64);
    let (y0, y1, y2) = (
        ATTENUATION_DB_PER_KM[center - 1],
        ATTENUATION_DB_PER_KM[center],
        ATTENUATION_DB_PER_KM[center + 1],
    );
    Ok(y0 * (x - x1) * (x - x2) / ((x0 - x1) * (x0 - x2))
        + y1 * (x - x0) * (x - x2) / ((x1 - x0) * (x1 - x2))
        + y2 * (x - x0) * (x - x1) / ((x2 - x0) * (x2 - x1)))
}

/// Total absorption in dB over a path of `distance_m`
pub fn attenuation_db(frequency_hz: f64, distance_m: f64) -> Result<f64, LayerError> {
    Ok(specific_attenuation(frequency_hz)? * distance_m / 1000.0)
}
