//! Adaptive Modulation and Coding
//!
//! MCS and CQI tables follow 3GPP TS 38.214 (MCS index table 1, CQI table 1).
//! Transport block sizes are derived from the resource-element count of an
//! allocation spanning every RB of the carrier.

use tracing::trace;

/// Highest MCS index of MCS table 1
pub const MAX_MCS: u8 = 28;

/// Highest CQI index of CQI table 1
pub const MAX_CQI: u8 = 15;

/// Transport block CRC length in bytes
const TB_CRC_BYTES: u32 = 3;

const SUBCARRIERS_PER_RB: u32 = 12;

/// (modulation order, target code rate x 1024) per MCS, TS 38.214 Table 5.1.3.1-1
const MCS_TABLE: [(u8, u16); 29] = [
    (2, 120), (2, 157), (2, 193), (2, 251), (2, 308), (2, 379), (2, 449), (2, 526),
    (2, 602), (2, 679), (4, 340), (4, 378), (4, 434), (4, 490), (4, 553), (4, 616),
    (4, 658), (6, 438), (6, 466), (6, 517), (6, 567), (6, 616), (6, 666), (6, 719),
    (6, 772), (6, 822), (6, 873), (6, 910), (6, 948),
];

/// Spectral efficiency (bit/s/Hz) per CQI, TS 38.214 Table 5.2.2.1-2; index 0 is out of range
const CQI_EFFICIENCY: [f64; 16] = [
    0.0, 0.1523, 0.2344, 0.3770, 0.6016, 0.8770, 1.1758, 1.4766, 1.9141, 2.4063,
    2.7305, 3.3223, 3.9023, 4.5234, 5.1152, 5.5547,
];

/// Target bit error rate used for the Shannon-gap CQI mapping
const TARGET_BER: f64 = 0.00005;

/// Link adaptation capability consumed by the MAC scheduler
pub trait Amc {
    /// Transport block size in bytes for `mcs` over `symbols` OFDM symbols
    fn tb_size_bytes(&self, mcs: u8, symbols: u8) -> u32;

    /// Fewest symbols whose transport block carries `bytes` at `mcs`
    fn min_symbols_for_size(&self, bytes: u32, mcs: u8) -> u8;

    /// Highest MCS whose spectral efficiency does not exceed the CQI's
    fn mcs_from_cqi(&self, cqi: u8) -> u8;

    /// Wideband CQI from a linear per-band SINR vector
    fn cqi_from_sinr(&self, sinr: &[f64]) -> u8;
}

/// NR link adaptation over a carrier of `num_rb` resource blocks
#[derive(Debug, Clone)]
pub struct NrAmc {
    num_rb: u32,
    symbols_per_slot: u8,
}

impl NrAmc {
    pub fn new(num_rb: u32, symbols_per_slot: u8) -> Self {
        Self { num_rb, symbols_per_slot }
    }

    /// Spectral efficiency of an MCS (bits per resource element)
    pub fn mcs_efficiency(mcs: u8) -> f64 {
        let (qm, rate) = MCS_TABLE[mcs.min(MAX_MCS) as usize];
        qm as f64 * rate as f64 / 1024.0
    }
}

impl Amc for NrAmc {
    fn tb_size_bytes(&self, mcs: u8, symbols: u8) -> u32 {
        let resource_elements = self.num_rb * SUBCARRIERS_PER_RB * symbols as u32;
        let bits = (resource_elements as f64 * Self::mcs_efficiency(mcs)).floor() as u32;
        (bits / 8).saturating_sub(TB_CRC_BYTES)
    }

    fn min_symbols_for_size(&self, bytes: u32, mcs: u8) -> u8 {
        if bytes == 0 {
            return 0;
        }
        (1..=self.symbols_per_slot)
            .find(|&symbols| self.tb_size_bytes(mcs, symbols) >= bytes)
            .unwrap_or(self.symbols_per_slot)
    }

    fn mcs_from_cqi(&self, cqi: u8) -> u8 {
        if cqi == 0 {
            return 0;
        }
        let efficiency = CQI_EFFICIENCY[cqi.min(MAX_CQI) as usize];
        (0..=MAX_MCS)
            .rev()
            .find(|&mcs| Self::mcs_efficiency(mcs) <= efficiency)
            .unwrap_or(0)
    }

    fn cqi_from_sinr(&self, sinr: &[f64]) -> u8 {
        if sinr.is_empty() {
            return 0;
        }
        let gap = -(5.0 * TARGET_BER).ln() / 1.5;
        let efficiency = sinr
            .iter()
            .map(|s| (1.0 + s.max(0.0) / gap).log2())
            .sum::<f64>()
            / sinr.len() as f64;

        let cqi = (1..=MAX_CQI)
            .rev()
            .find(|&cqi| CQI_EFFICIENCY[cqi as usize] <= efficiency)
            .unwrap_or(0);
        trace!("Wideband spectral efficiency {:.3} -> CQI {}", efficiency, cqi);
        cqi
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb_size_grows_with_mcs_and_symbols() {
        let amc = NrAmc::new(69, 14);
        assert!(amc.tb_size_bytes(0, 14) > amc.tb_size_bytes(0, 7));
        assert!(amc.tb_size_bytes(28, 14) > amc.tb_size_bytes(0, 14));
        assert_eq!(amc.tb_size_bytes(0, 0), 0);
        // 69 RB * 12 * 1 symbol * 2 * 120/1024 = 194 bits -> 24 bytes - CRC
        assert_eq!(amc.tb_size_bytes(0, 1), 21);
    }

    #[test]
    fn test_min_symbols_for_size() {
        let amc = NrAmc::new(69, 14);
        assert_eq!(amc.min_symbols_for_size(0, 5), 0);
        assert_eq!(amc.min_symbols_for_size(21, 0), 1);
        assert_eq!(amc.min_symbols_for_size(22, 0), 2);
        let full = amc.tb_size_bytes(10, 14);
        assert_eq!(amc.min_symbols_for_size(full, 10), 14);
        assert_eq!(amc.min_symbols_for_size(full * 4, 10), 14);
    }

    #[test]
    fn test_cqi_and_mcs_mapping() {
        let amc = NrAmc::new(69, 14);
        assert_eq!(amc.cqi_from_sinr(&[]), 0);
        assert_eq!(amc.cqi_from_sinr(&[1e-6; 4]), 0);
        assert_eq!(amc.cqi_from_sinr(&[1e6; 4]), MAX_CQI);
        assert_eq!(amc.mcs_from_cqi(0), 0);
        assert_eq!(amc.mcs_from_cqi(MAX_CQI), MAX_MCS);

        let low = amc.mcs_from_cqi(amc.cqi_from_sinr(&[2.0; 8]));
        let high = amc.mcs_from_cqi(amc.cqi_from_sinr(&[200.0; 8]));
        assert!(high > low);
    }
}
