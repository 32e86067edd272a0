//! Transport block error models
//!
//! The PHY hands the per-band SINR of a reception to an [`ErrorModel`] and
//! draws against the returned block error rate.

use crate::amc::NrAmc;
use common::utils::linear_to_db;

/// Earlier transmission attempts of the same transport block
///
/// Sidelink transmissions are never retransmitted, so the PHY always passes
/// an empty history; the type keeps the decode interface complete.
#[derive(Debug, Clone, PartialEq)]
pub struct HarqInfo {
    pub effective_sinr: f64,
    pub mcs: u8,
}

/// Block error rate oracle
pub trait ErrorModel {
    /// Block error rate in [0, 1] of a transport block of `size_bytes` sent at
    /// `mcs` over the bands in `rb_mask`
    fn decode_stats(
        &self,
        sinr: &[f64],
        rb_mask: &[usize],
        size_bytes: u32,
        mcs: u8,
        harq_history: &[HarqInfo],
    ) -> f64;
}

/// Every block decodes
#[derive(Debug, Clone, Copy, Default)]
pub struct IdealErrorModel;

impl ErrorModel for IdealErrorModel {
    fn decode_stats(&self, _: &[f64], _: &[usize], _: u32, _: u8, _: &[HarqInfo]) -> f64 {
        0.0
    }
}

/// Logistic BLER curve around the Shannon requirement of each MCS
#[derive(Debug, Clone)]
pub struct NrErrorModel {
    /// Implementation loss added to the Shannon SINR requirement, dB
    pub implementation_margin_db: f64,
    /// Curve steepness, 1/dB
    pub slope_per_db: f64,
}

impl Default for NrErrorModel {
    fn default() -> Self {
        Self {
            implementation_margin_db: 1.5,
            slope_per_db: 1.5,
        }
    }
}

impl NrErrorModel {
    /// SINR in dB at which the BLER of `mcs` is 50%
    pub fn threshold_db(&self, mcs: u8) -> f64 {
        let efficiency = NrAmc::mcs_efficiency(mcs);
        linear_to_db(2f64.powf(efficiency) - 1.0) + self.implementation_margin_db
    }

    /// Mean linear SINR over the allocated bands
    fn effective_sinr(sinr: &[f64], rb_mask: &[usize]) -> f64 {
        let used: Vec<f64> = if rb_mask.is_empty() {
            sinr.to_vec()
        } else {
            rb_mask.iter().filter_map(|&rb| sinr.get(rb).copied()).collect()
        };
        if used.is_empty() {
            return 0.0;
        }
        used.iter().sum::<f64>() / used.len() as f64
    }
}

impl ErrorModel for NrErrorModel {
    fn decode_stats(
        &self,
        sinr: &[f64],
        rb_mask: &[usize],
        size_bytes: u32,
        mcs: u8,
        _harq_history: &[HarqInfo],
    ) -> f64 {
        if size_bytes == 0 {
            return 0.0;
        }
        let effective = Self::effective_sinr(sinr, rb_mask);
        if effective <= 0.0 {
            return 1.0;
        }
        let excess_db = linear_to_db(effective) - self.threshold_db(mcs);
        1.0 / (1.0 + (self.slope_per_db * excess_db).exp())
    }
}
