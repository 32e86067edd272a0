//! Large-scale parameter tables (TR 38.901 Table 7.5-6, UMi street canyon)
//!
//! TR 37.885 reuses the street-canyon fast-fading tables for both V2V urban
//! and highway deployments, so the tables depend only on the propagation
//! condition and the carrier frequency. Blocked-NLOS (NLOSv) links draw from
//! the LOS table but carry no Rician component.

use crate::LayerError;
use interfaces::ChannelCondition;
use rand::RngCore;
use rand_distr::{Distribution, StandardNormal};

/// Rays per cluster
pub const RAYS_PER_CLUSTER: usize = 20;

/// Ray offset angles within a cluster, normalized to unit cluster spread
pub const RAY_OFFSETS: [f64; RAYS_PER_CLUSTER] = [
    0.0447, -0.0447, 0.1413, -0.1413, 0.2492, -0.2492, 0.3715, -0.3715, 0.5129, -0.5129,
    0.6797, -0.6797, 0.8844, -0.8844, 1.1481, -1.1481, 1.5195, -1.5195, 2.1551, -2.1551,
];

/// Ray index sets and power shares of the three sub-clusters
pub const SUB_CLUSTERS: [(&[usize], f64); 3] = [
    (&[0, 1, 2, 3, 4, 5, 6, 7, 18, 19], 10.0 / 20.0),
    (&[8, 9, 10, 11, 16, 17], 6.0 / 20.0),
    (&[12, 13, 14, 15], 4.0 / 20.0),
];

/// Relative delay of each sub-cluster, in units of the cluster delay spread
pub const SUB_CLUSTER_DELAYS: [f64; 3] = [0.0, 1.28, 2.56];

/// Log-normal draw `mean + std * x`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lsp {
    pub mean: f64,
    pub std: f64,
}

impl Lsp {
    fn new(mean: f64, std: f64) -> Self {
        Self { mean, std }
    }

    fn at(&self, x: f64) -> f64 {
        self.mean + self.std * x
    }
}

/// One draw of the correlated large-scale parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LargeScaleParams {
    pub shadowing_db: f64,
    /// Rician K-factor in dB, LOS links only
    pub k_factor_db: Option<f64>,
    /// Seconds
    pub delay_spread: f64,
    /// Degrees
    pub asd: f64,
    pub asa: f64,
    pub zsd: f64,
    pub zsa: f64,
}

/// Fast-fading parameters for one propagation condition
#[derive(Debug, Clone)]
pub struct ScenarioTable {
    pub los: bool,
    pub shadowing_std_db: f64,
    pub k_factor: Option<Lsp>,
    pub lg_ds: Lsp,
    pub lg_asd: Lsp,
    pub lg_asa: Lsp,
    pub lg_zsd: Lsp,
    pub lg_zsa: Lsp,
    pub delay_scaling: f64,
    pub num_clusters: usize,
    /// Cluster delay spread, seconds
    pub cluster_ds: f64,
    /// Cluster angular spreads, degrees
    pub cluster_asd: f64,
    pub cluster_asa: f64,
    pub cluster_zsa: f64,
    pub per_cluster_shadowing_db: f64,
    sqrt_correlation: Vec<Vec<f64>>,
}

impl ScenarioTable {
    /// Table for a condition at a carrier frequency in Hz
    pub fn new(condition: ChannelCondition, carrier_hz: f64) -> Result<Self, LayerError> {
        let lf = (1.0 + carrier_hz / 1e9).log10();
        let table = match condition {
            ChannelCondition::Los | ChannelCondition::BlockedNlos => {
                let lg_zsa = Lsp::new(-0.1 * lf + 0.73, -0.04 * lf + 0.34);
                // Order: SF, K, DS, ASD, ASA, ZSD, ZSA
                let correlation = vec![
                    vec![1.0, 0.5, -0.4, -0.5, -0.4, 0.0, 0.0],
                    vec![0.5, 1.0, -0.7, -0.2, -0.3, 0.0, 0.0],
                    vec![-0.4, -0.7, 1.0, 0.5, 0.8, 0.0, 0.2],
                    vec![-0.5, -0.2, 0.5, 1.0, 0.4, 0.5, 0.3],
                    vec![-0.4, -0.3, 0.8, 0.4, 1.0, 0.0, 0.0],
                    vec![0.0, 0.0, 0.0, 0.5, 0.0, 1.0, 0.0],
                    vec![0.0, 0.0, 0.2, 0.3, 0.0, 0.0, 1.0],
                ];
                Self {
                    los: condition == ChannelCondition::Los,
                    shadowing_std_db: 4.0,
                    k_factor: Some(Lsp::new(9.0, 5.0)),
                    lg_ds: Lsp::new(-0.24 * lf - 7.14, 0.38),
                    lg_asd: Lsp::new(-0.05 * lf + 1.21, 0.41),
                    lg_asa: Lsp::new(-0.08 * lf + 1.73, 0.014 * lf + 0.28),
                    lg_zsd: lg_zsa,
                    lg_zsa,
                    delay_scaling: 3.0,
                    num_clusters: 12,
                    cluster_ds: 5e-9,
                    cluster_asd: 3.0,
                    cluster_asa: 17.0,
                    cluster_zsa: 7.0,
                    per_cluster_shadowing_db: 3.0,
                    sqrt_correlation: cholesky(&correlation)?,
                }
            }
            ChannelCondition::Nlos => {
                let lg_zsa = Lsp::new(-0.04 * lf + 0.92, -0.07 * lf + 0.41);
                // Order: SF, DS, ASD, ASA, ZSD, ZSA
                let correlation = vec![
                    vec![1.0, -0.7, 0.0, -0.4, 0.0, 0.0],
                    vec![-0.7, 1.0, 0.0, 0.4, -0.5, 0.0],
                    vec![0.0, 0.0, 1.0, 0.0, 0.5, 0.5],
                    vec![-0.4, 0.4, 0.0, 1.0, 0.0, 0.2],
                    vec![0.0, -0.5, 0.5, 0.0, 1.0, 0.0],
                    vec![0.0, 0.0, 0.5, 0.2, 0.0, 1.0],
                ];
                Self {
                    los: false,
                    shadowing_std_db: 7.82,
                    k_factor: None,
                    lg_ds: Lsp::new(-0.24 * lf - 6.83, 0.16 * lf + 0.28),
                    lg_asd: Lsp::new(-0.23 * lf + 1.53, 0.11 * lf + 0.33),
                    lg_asa: Lsp::new(-0.08 * lf + 1.81, 0.05 * lf + 0.3),
                    lg_zsd: lg_zsa,
                    lg_zsa,
                    delay_scaling: 2.1,
                    num_clusters: 19,
                    cluster_ds: 11e-9,
                    cluster_asd: 10.0,
                    cluster_asa: 22.0,
                    cluster_zsa: 7.0,
                    per_cluster_shadowing_db: 3.0,
                    sqrt_correlation: cholesky(&correlation)?,
                }
            }
        };
        Ok(table)
    }

    /// Cluster zenith spread of departure, degrees
    pub fn cluster_zsd(&self) -> f64 {
        0.375 * 10f64.powf(self.lg_zsd.mean)
    }

    /// Draw a correlated set of large-scale parameters
    pub fn draw(&self, rng: &mut dyn RngCore) -> LargeScaleParams {
        let n = self.sqrt_correlation.len();
        let iid: Vec<f64> = (0..n).map(|_| StandardNormal.sample(rng)).collect();
        let correlated: Vec<f64> = self
            .sqrt_correlation
            .iter()
            .map(|row| row.iter().zip(&iid).map(|(l, z)| l * z).sum())
            .collect();

        // Offset of DS and later entries depends on whether K is present
        let (k_factor_db, rest) = match self.k_factor {
            Some(k) if self.los => (Some(k.at(correlated[1])), &correlated[2..]),
            Some(_) => (None, &correlated[2..]),
            None => (None, &correlated[1..]),
        };

        LargeScaleParams {
            shadowing_db: self.shadowing_std_db * correlated[0],
            k_factor_db,
            delay_spread: 10f64.powf(self.lg_ds.at(rest[0])),
            asd: 10f64.powf(self.lg_asd.at(rest[1])).min(104.0),
            asa: 10f64.powf(self.lg_asa.at(rest[2])).min(104.0),
            zsd: 10f64.powf(self.lg_zsd.at(rest[3])).min(52.0),
            zsa: 10f64.powf(self.lg_zsa.at(rest[4])).min(52.0),
        }
    }
}

/// Azimuth scaling factor C_NLOS for a cluster count
pub fn azimuth_scaling(num_clusters: usize) -> f64 {
    const TABLE: [(usize, f64); 12] = [
        (4, 0.779), (5, 0.860), (8, 1.018), (10, 1.090), (11, 1.123), (12, 1.146),
        (14, 1.190), (15, 1.211), (16, 1.226), (19, 1.273), (20, 1.289), (25, 1.358),
    ];
    lookup(&TABLE, num_clusters)
}

/// Zenith scaling factor C_NLOS for a cluster count
pub fn zenith_scaling(num_clusters: usize) -> f64 {
    const TABLE: [(usize, f64); 8] = [
        (8, 0.889), (10, 0.957), (11, 1.031), (12, 1.104),
        (15, 1.1088), (19, 1.184), (20, 1.178), (25, 1.282),
    ];
    lookup(&TABLE, num_clusters)
}

fn lookup(table: &[(usize, f64)], key: usize) -> f64 {
    table
        .iter()
        .rev()
        .find(|(n, _)| *n <= key)
        .or_else(|| table.first())
        .map_or(1.0, |(_, value)| *value)
}

/// LOS adjustment of the azimuth scaling factor
pub fn los_azimuth_factor(k_db: f64) -> f64 {
    1.1035 - 0.028 * k_db - 0.002 * k_db.powi(2) + 0.0001 * k_db.powi(3)
}

/// LOS adjustment of the zenith scaling factor
pub fn los_zenith_factor(k_db: f64) -> f64 {
    1.3086 + 0.0339 * k_db - 0.0077 * k_db.powi(2) + 0.0002 * k_db.powi(3)
}

/// LOS delay scaling C_tau
pub fn los_delay_factor(k_db: f64) -> f64 {
    0.7705 - 0.0433 * k_db + 0.0002 * k_db.powi(2) + 0.000017 * k_db.powi(3)
}

/// Lower-triangular factor L with L * L^T = matrix
pub fn cholesky(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, LayerError> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let pivot = matrix[i][i] - sum;
                if pivot <= 0.0 {
                    return Err(LayerError::ChannelModel(format!(
                        "Correlation matrix is not positive definite (pivot {} at row {})", pivot, i
                    )));
                }
                lower[i][j] = pivot.sqrt();
            } else {
                lower[i][j] = (matrix[i][j] - sum) / lower[j][j];
            }
        }
    }
    Ok(lower)
}
