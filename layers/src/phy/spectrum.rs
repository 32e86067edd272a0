//! Spectrum-domain signal representation
//!
//! A [`SpectrumValue`] holds one power spectral density sample (W/Hz) per
//! resource block of the carrier described by its [`SpectrumModel`].

use crate::LayerError;
use common::utils::{db_to_linear, dbm_to_watts, THERMAL_NOISE_DBM_HZ};
use std::ops::{AddAssign, Mul, SubAssign};
use std::sync::Arc;

/// Band layout of a carrier: one band per resource block
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumModel {
    band_centers_hz: Vec<f64>,
    band_width_hz: f64,
}

impl SpectrumModel {
    pub fn new(center_frequency_hz: f64, num_rb: u32, rb_bandwidth_hz: f64) -> Arc<Self> {
        let lowest = center_frequency_hz - num_rb as f64 * rb_bandwidth_hz / 2.0;
        let band_centers_hz = (0..num_rb)
            .map(|rb| lowest + rb_bandwidth_hz * (rb as f64 + 0.5))
            .collect();
        Arc::new(Self {
            band_centers_hz,
            band_width_hz: rb_bandwidth_hz,
        })
    }

    pub fn num_bands(&self) -> usize {
        self.band_centers_hz.len()
    }

    pub fn band_centers(&self) -> &[f64] {
        &self.band_centers_hz
    }

    pub fn band_width(&self) -> f64 {
        self.band_width_hz
    }
}

/// Per-band power spectral density
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumValue {
    model: Arc<SpectrumModel>,
    values: Vec<f64>,
}

impl SpectrumValue {
    pub fn zeros(model: Arc<SpectrumModel>) -> Self {
        let values = vec![0.0; model.num_bands()];
        Self { model, values }
    }

    pub fn from_values(model: Arc<SpectrumModel>, values: Vec<f64>) -> Result<Self, LayerError> {
        if values.len() != model.num_bands() {
            return Err(LayerError::InvalidConfiguration(format!(
                "PSD has {} values for {} bands", values.len(), model.num_bands()
            )));
        }
        Ok(Self { model, values })
    }

    pub fn model(&self) -> &Arc<SpectrumModel> {
        &self.model
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Total power in Watts
    pub fn integral(&self) -> f64 {
        self.values.iter().sum::<f64>() * self.model.band_width()
    }

    /// Arithmetic mean over bands
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Band-wise ratio `self / denominator`
    pub fn ratio(&self, denominator: &SpectrumValue) -> SpectrumValue {
        let values = self
            .values
            .iter()
            .zip(&denominator.values)
            .map(|(num, den)| if *den > 0.0 { num / den } else { 0.0 })
            .collect();
        SpectrumValue { model: self.model.clone(), values }
    }

    /// Clamp every band to be non-negative
    pub fn clamp_non_negative(&mut self) {
        for value in &mut self.values {
            if *value < 0.0 {
                *value = 0.0;
            }
        }
    }
}

impl AddAssign<&SpectrumValue> for SpectrumValue {
    fn add_assign(&mut self, rhs: &SpectrumValue) {
        for (lhs, rhs) in self.values.iter_mut().zip(&rhs.values) {
            *lhs += rhs;
        }
    }
}

impl SubAssign<&SpectrumValue> for SpectrumValue {
    fn sub_assign(&mut self, rhs: &SpectrumValue) {
        for (lhs, rhs) in self.values.iter_mut().zip(&rhs.values) {
            *lhs -= rhs;
        }
    }
}

impl Mul<f64> for &SpectrumValue {
    type Output = SpectrumValue;
    fn mul(self, rhs: f64) -> SpectrumValue {
        SpectrumValue {
            model: self.model.clone(),
            values: self.values.iter().map(|v| v * rhs).collect(),
        }
    }
}

/// Transmit PSD spreading `power_dbm` evenly over the bands in `rb_mask`
pub fn create_tx_psd(model: Arc<SpectrumModel>, power_dbm: f64, rb_mask: &[usize]) -> SpectrumValue {
    let mut psd = SpectrumValue::zeros(model);
    let active: Vec<usize> = rb_mask
        .iter()
        .copied()
        .filter(|&rb| rb < psd.values.len())
        .collect();
    if active.is_empty() {
        return psd;
    }
    let per_band = dbm_to_watts(power_dbm) / (active.len() as f64 * psd.model.band_width());
    for rb in active {
        psd.values[rb] = per_band;
    }
    psd
}

/// Thermal noise PSD raised by the receiver noise figure
pub fn create_noise_psd(model: Arc<SpectrumModel>, noise_figure_db: f64) -> SpectrumValue {
    let per_hz = dbm_to_watts(THERMAL_NOISE_DBM_HZ) * db_to_linear(noise_figure_db);
    let values = vec![per_hz; model.num_bands()];
    SpectrumValue { model, values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::watts_to_dbm;

    #[test]
    fn test_band_layout() {
        let model = SpectrumModel::new(60e9, 4, 1e6);
        assert_eq!(model.num_bands(), 4);
        assert!((model.band_centers()[0] - (60e9 - 1.5e6)).abs() < 1e-3);
        assert!((model.band_centers()[3] - (60e9 + 1.5e6)).abs() < 1e-3);
    }

    #[test]
    fn test_tx_psd_integrates_to_power() {
        let model = SpectrumModel::new(60e9, 10, 1.44e6);
        let all: Vec<usize> = (0..10).collect();
        let psd = create_tx_psd(model.clone(), 23.0, &all);
        assert!((watts_to_dbm(psd.integral()) - 23.0).abs() < 1e-9);

        let half = create_tx_psd(model, 23.0, &[0, 1, 2, 3, 4]);
        assert!((watts_to_dbm(half.integral()) - 23.0).abs() < 1e-9);
        assert_eq!(half.values()[7], 0.0);
    }

    #[test]
    fn test_noise_psd() {
        let model = SpectrumModel::new(60e9, 10, 1e6);
        let noise = create_noise_psd(model, 5.0);
        // -174 dBm/Hz + 5 dB over 10 MHz
        assert!((watts_to_dbm(noise.integral()) - (-174.0 + 5.0 + 70.0)).abs() < 1e-9);
    }

    #[test]
    fn test_arithmetic() {
        let model = SpectrumModel::new(60e9, 2, 1e6);
        let mut a = SpectrumValue::from_values(model.clone(), vec![1.0, 2.0]).unwrap();
        let b = SpectrumValue::from_values(model.clone(), vec![0.5, 4.0]).unwrap();
        a += &b;
        assert_eq!(a.values(), &[1.5, 6.0]);
        a -= &b;
        assert_eq!(a.values(), &[1.0, 2.0]);
        assert_eq!((&a * 2.0).values(), &[2.0, 4.0]);
        assert_eq!(a.ratio(&b).values(), &[2.0, 0.5]);
        assert!(SpectrumValue::from_values(model, vec![1.0]).is_err());
    }
}
