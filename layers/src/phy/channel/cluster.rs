//! Multi-cluster channel realizations (TR 38.901 §7.5 and §7.6.3.2)
//!
//! A realization is generated once per link and then evolved in small steps
//! while the link keeps its propagation condition. The per-element
//! coefficient tensor is rebuilt from the cluster list whenever the geometry
//! or the active panels change.

use super::blockage::{BlockageConfig, BlockerState};
use super::params::{
    azimuth_scaling, los_azimuth_factor, los_delay_factor, los_zenith_factor, zenith_scaling,
    ScenarioTable, RAYS_PER_CLUSTER, RAY_OFFSETS, SUB_CLUSTERS, SUB_CLUSTER_DELAYS,
};
use crate::phy::antenna::AntennaArray;
use common::utils::{db_to_linear, wrap_azimuth_deg, wrap_zenith_deg, SPEED_OF_LIGHT};
use common::Vector3;
use interfaces::ChannelCondition;
use ndarray::Array3;
use num_complex::Complex64;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};
use std::f64::consts::PI;
use std::time::Duration;

/// Relative power below which clusters are discarded
const CLUSTER_FLOOR_DB: f64 = -25.0;

/// Correlation distance of the cluster random walk, meters
const WALK_CORRELATION_DISTANCE: f64 = 10.0;

/// Positions and velocities of both ends, in the stored link direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkGeometry {
    pub tx_position: Vector3,
    pub rx_position: Vector3,
    pub tx_velocity: Vector3,
    pub rx_velocity: Vector3,
}

impl LinkGeometry {
    pub fn distance(&self) -> f64 {
        self.tx_position.distance(&self.rx_position)
    }

    /// (AoD, ZoD, AoA, ZoA) of the direct path, degrees
    pub fn los_angles(&self) -> (f64, f64, f64, f64) {
        let d = self.rx_position - self.tx_position;
        let range = d.norm().max(f64::EPSILON);
        let aod = d.y.atan2(d.x).to_degrees();
        let zod = (d.z / range).clamp(-1.0, 1.0).acos().to_degrees();
        (wrap_azimuth_deg(aod), zod, wrap_azimuth_deg(aod + 180.0), 180.0 - zod)
    }

    /// Receiver heading in degrees (zero when parked)
    pub fn rx_heading(&self) -> f64 {
        if self.rx_velocity.norm_2d() > 0.0 {
            self.rx_velocity.y.atan2(self.rx_velocity.x).to_degrees()
        } else {
            0.0
        }
    }
}

/// Angular offsets of one ray from its cluster center (degrees) and its initial phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub aoa: f64,
    pub zoa: f64,
    pub aod: f64,
    pub zod: f64,
    pub phase: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Delay relative to the first arrival, before the sub-cluster offset, seconds
    pub delay: f64,
    pub sub_cluster_delay: f64,
    /// Normalized power including the sub-cluster share
    pub power: f64,
    pub share: f64,
    pub aoa: f64,
    pub zoa: f64,
    pub aod: f64,
    pub zod: f64,
    pub rays: Vec<Ray>,
    /// Standard-normal variate of the per-cluster shadowing
    pub shadowing: f64,
    /// Standard-normal variate driving the moving-scatterer Doppler
    pub scatterer: f64,
}

impl Cluster {
    pub fn total_delay(&self) -> f64 {
        self.delay + self.sub_cluster_delay
    }

    fn arrival_direction(&self) -> Vector3 {
        Vector3::from_spherical(self.aoa.to_radians(), self.zoa.to_radians())
    }

    fn departure_direction(&self) -> Vector3 {
        Vector3::from_spherical(self.aod.to_radians(), self.zod.to_radians())
    }
}

/// Stochastic state of one link
#[derive(Debug, Clone)]
pub struct ChannelParams {
    pub condition: ChannelCondition,
    pub k_factor_db: Option<f64>,
    pub delay_spread: f64,
    pub delay_scaling: f64,
    pub per_cluster_shadowing_db: f64,
    /// Scaling of stored delays back to the unscaled power-delay profile
    pub power_delay_factor: f64,
    pub clusters: Vec<Cluster>,
    pub geometry: LinkGeometry,
    pub generated_at: Duration,
    pub updated_at: Duration,
    pub blockers: Option<BlockerState>,
    /// [rx element, tx element, cluster]
    pub coefficients: Array3<Complex64>,
    pub tx_sector: u8,
    pub rx_sector: u8,
}

/// Logistic approximation of the standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    1.0 / (1.0 + (-(0.07056 * x.powi(3) + 1.5976 * x)).exp())
}

impl ChannelParams {
    /// Draw a fresh realization
    pub fn generate(
        table: &ScenarioTable,
        condition: ChannelCondition,
        geometry: LinkGeometry,
        blockage: Option<&BlockageConfig>,
        now: Duration,
        rng: &mut dyn RngCore,
    ) -> Self {
        let lsp = table.draw(rng);
        let k_linear = lsp.k_factor_db.map(db_to_linear);
        let ds = lsp.delay_spread;
        let r_tau = table.delay_scaling;

        // Delays
        let mut delays: Vec<f64> = (0..table.num_clusters)
            .map(|_| -r_tau * ds * (1.0 - rng.gen::<f64>()).ln())
            .collect();
        delays.sort_by(f64::total_cmp);
        let first = delays.first().copied().unwrap_or(0.0);
        for delay in &mut delays {
            *delay -= first;
        }

        // Powers
        let shadowing: Vec<f64> = delays.iter().map(|_| StandardNormal.sample(rng)).collect();
        let powers = cluster_powers(&delays, &shadowing, ds, r_tau, table.per_cluster_shadowing_db);
        let angle_powers: Vec<f64> = match k_linear {
            Some(k) => powers
                .iter()
                .enumerate()
                .map(|(n, p)| p / (k + 1.0) + if n == 0 { k / (k + 1.0) } else { 0.0 })
                .collect(),
            None => powers.clone(),
        };
        let peak = angle_powers.iter().copied().fold(0.0, f64::max);
        let floor = peak * db_to_linear(CLUSTER_FLOOR_DB);
        let kept: Vec<usize> = (0..angle_powers.len()).filter(|&n| angle_powers[n] >= floor).collect();

        let power_delay_factor = match lsp.k_factor_db {
            Some(k_db) => los_delay_factor(k_db),
            None => 1.0,
        };

        // Angles
        let (los_aod, los_zod, los_aoa, los_zoa) = geometry.los_angles();
        let (c_phi, c_theta) = match lsp.k_factor_db {
            Some(k_db) => (
                azimuth_scaling(table.num_clusters) * los_azimuth_factor(k_db),
                zenith_scaling(table.num_clusters) * los_zenith_factor(k_db),
            ),
            None => (azimuth_scaling(table.num_clusters), zenith_scaling(table.num_clusters)),
        };
        let relative: Vec<f64> = kept.iter().map(|&n| angle_powers[n] / peak).collect();
        let azimuth_spread = |spread: f64| -> Vec<f64> {
            relative
                .iter()
                .map(|p| 2.0 * (spread / 1.4) * (-p.ln()).max(0.0).sqrt() / c_phi)
                .collect()
        };
        let zenith_spread = |spread: f64| -> Vec<f64> {
            relative.iter().map(|p| -spread * p.ln() / c_theta).collect()
        };
        let los = lsp.k_factor_db.is_some();
        let aoa = place_angles(&azimuth_spread(lsp.asa), lsp.asa, los_aoa, los, rng);
        let aod = place_angles(&azimuth_spread(lsp.asd), lsp.asd, los_aod, los, rng);
        let zoa = place_angles(&zenith_spread(lsp.zsa), lsp.zsa, los_zoa, los, rng);
        let zod = place_angles(&zenith_spread(lsp.zsd), lsp.zsd, los_zod, los, rng);

        let cluster_zsd = table.cluster_zsd();
        let mut clusters: Vec<Cluster> = kept
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                let rays = couple_rays(
                    [table.cluster_asa, table.cluster_zsa, table.cluster_asd, cluster_zsd],
                    rng,
                );
                Cluster {
                    delay: delays[n] / power_delay_factor,
                    sub_cluster_delay: 0.0,
                    power: powers[n],
                    share: 1.0,
                    aoa: wrap_azimuth_deg(aoa[i]),
                    zoa: wrap_zenith_deg(zoa[i]),
                    aod: wrap_azimuth_deg(aod[i]),
                    zod: wrap_zenith_deg(zod[i]),
                    rays,
                    shadowing: shadowing[n],
                    scatterer: StandardNormal.sample(rng),
                }
            })
            .collect();

        split_strongest(&mut clusters, table.cluster_ds);

        Self {
            condition,
            k_factor_db: lsp.k_factor_db,
            delay_spread: ds,
            delay_scaling: r_tau,
            per_cluster_shadowing_db: table.per_cluster_shadowing_db,
            power_delay_factor,
            clusters,
            geometry,
            generated_at: now,
            updated_at: now,
            blockers: blockage.map(|config| BlockerState::draw(config, rng)),
            coefficients: Array3::zeros((0, 0, 0)),
            tx_sector: 0,
            rx_sector: 0,
        }
    }

    pub fn is_los(&self) -> bool {
        self.k_factor_db.is_some()
    }

    /// Evolve the realization to a new geometry (procedure A)
    pub fn update(
        &mut self,
        geometry: LinkGeometry,
        now: Duration,
        blockage: Option<&BlockageConfig>,
        rng: &mut dyn RngCore,
    ) {
        let dt = now.saturating_sub(self.updated_at).as_secs_f64();
        if dt <= 0.0 {
            self.geometry = geometry;
            return;
        }
        let previous = self.geometry;
        let old_range = previous.distance();
        let new_range = geometry.distance();
        let los = self.is_los();
        let (los_aod, los_zod, los_aoa, los_zoa) = geometry.los_angles();

        let relative_speed = (previous.rx_velocity - previous.tx_velocity).norm();
        let correlation = (-relative_speed * dt / WALK_CORRELATION_DISTANCE).exp();
        let innovation = (1.0 - correlation * correlation).sqrt();

        for (index, cluster) in self.clusters.iter_mut().enumerate() {
            if los && index == 0 {
                cluster.aoa = los_aoa;
                cluster.zoa = los_zoa;
                cluster.aod = los_aod;
                cluster.zod = los_zod;
            } else {
                let r_rx = cluster.arrival_direction();
                let r_tx = cluster.departure_direction();
                let absolute = cluster.total_delay() + old_range / SPEED_OF_LIGHT;
                let path = (SPEED_OF_LIGHT * absolute).max(1.0);

                let drift = (r_rx.dot(&previous.rx_velocity) + r_tx.dot(&previous.tx_velocity)) / SPEED_OF_LIGHT * dt;
                let updated = absolute - drift - new_range / SPEED_OF_LIGHT;
                cluster.delay = (updated - cluster.sub_cluster_delay).max(0.0);

                let (aoa, zoa) = (cluster.aoa.to_radians(), cluster.zoa.to_radians());
                let (aod, zod) = (cluster.aod.to_radians(), cluster.zod.to_radians());
                let step_az = |v: &Vector3, az: f64, zen: f64| {
                    let phi_hat = Vector3::new(-az.sin(), az.cos(), 0.0);
                    (v.dot(&phi_hat) / (path * zen.sin().max(1e-3)) * dt).to_degrees()
                };
                let step_zen = |v: &Vector3, az: f64, zen: f64| {
                    let theta_hat = Vector3::new(zen.cos() * az.cos(), zen.cos() * az.sin(), -zen.sin());
                    (v.dot(&theta_hat) / path * dt).to_degrees()
                };
                cluster.aoa = wrap_azimuth_deg(cluster.aoa - step_az(&previous.rx_velocity, aoa, zoa));
                cluster.zoa = wrap_zenith_deg(cluster.zoa - step_zen(&previous.rx_velocity, aoa, zoa));
                cluster.aod = wrap_azimuth_deg(cluster.aod - step_az(&previous.tx_velocity, aod, zod));
                cluster.zod = wrap_zenith_deg(cluster.zod - step_zen(&previous.tx_velocity, aod, zod));
            }

            let walk_shadow: f64 = StandardNormal.sample(rng);
            let walk_scatter: f64 = StandardNormal.sample(rng);
            cluster.shadowing = correlation * cluster.shadowing + innovation * walk_shadow;
            cluster.scatterer = correlation * cluster.scatterer + innovation * walk_scatter;
        }
        // Sub-clusters of one parent share its variates and angles
        self.sync_sub_clusters();

        // Powers follow the evolved delays
        let delays: Vec<f64> = self.clusters.iter().map(|c| c.delay * self.power_delay_factor).collect();
        let shadowing: Vec<f64> = self.clusters.iter().map(|c| c.shadowing).collect();
        let base = cluster_powers_unsorted(
            &delays, &shadowing, self.delay_spread, self.delay_scaling, self.per_cluster_shadowing_db,
        );
        let total: f64 = base.iter().zip(&self.clusters).map(|(p, c)| p * c.share).sum();
        if total > 0.0 {
            for (cluster, p) in self.clusters.iter_mut().zip(base) {
                cluster.power = p * cluster.share / total;
            }
        }

        if let (Some(blockers), Some(config)) = (self.blockers.as_mut(), blockage) {
            let moved = previous.rx_position.distance(&geometry.rx_position);
            blockers.evolve(config, moved, dt, rng);
        }

        self.geometry = geometry;
        self.updated_at = now;
    }

    /// Rebuild the per-element coefficient tensor for the given panels
    pub fn compute_coefficients(
        &mut self,
        tx: &AntennaArray,
        rx: &AntennaArray,
        tx_sector: u8,
        rx_sector: u8,
        wavelength: f64,
        blockage: Option<&BlockageConfig>,
    ) {
        let (num_rx, num_tx) = (rx.num_elements(), tx.num_elements());
        let mut h = Array3::<Complex64>::zeros((num_rx, num_tx, self.clusters.len()));
        let k = self.k_factor_db.map(db_to_linear);
        let nlos_scale = k.map_or(1.0, |k| (1.0 / (k + 1.0)).sqrt());
        let heading = self.geometry.rx_heading();

        let block_amplitude = |aoa: f64, zoa: f64| -> f64 {
            match (&self.blockers, blockage) {
                (Some(blockers), Some(config)) => {
                    let loss = blockers.attenuation_db(config, aoa, wrap_azimuth_deg(aoa - heading), zoa, wavelength);
                    10f64.powf(-loss / 20.0)
                }
                _ => 1.0,
            }
        };
        let response = |array: &AntennaArray, sector: u8, az: f64, zen: f64| -> Vec<Complex64> {
            let (az, zen) = (az.to_radians(), zen.to_radians());
            let direction = Vector3::from_spherical(az, zen);
            let field = array.field_pattern(az, zen, sector);
            (0..array.num_elements())
                .map(|e| {
                    let phase = 2.0 * PI * direction.dot(&array.element_location(e, sector));
                    Complex64::from_polar(field, phase)
                })
                .collect()
        };

        for (n, cluster) in self.clusters.iter().enumerate() {
            let amplitude = (cluster.power / cluster.rays.len().max(1) as f64).sqrt()
                * nlos_scale
                * block_amplitude(cluster.aoa, cluster.zoa);
            for ray in &cluster.rays {
                let rx_resp = response(
                    rx, rx_sector,
                    wrap_azimuth_deg(cluster.aoa + ray.aoa),
                    wrap_zenith_deg(cluster.zoa + ray.zoa),
                );
                let tx_resp = response(
                    tx, tx_sector,
                    wrap_azimuth_deg(cluster.aod + ray.aod),
                    wrap_zenith_deg(cluster.zod + ray.zod),
                );
                let coefficient = Complex64::from_polar(amplitude, ray.phase);
                for (u, r) in rx_resp.iter().enumerate() {
                    let rc = coefficient * r;
                    for (s, t) in tx_resp.iter().enumerate() {
                        h[[u, s, n]] += rc * t;
                    }
                }
            }
        }

        if let (Some(k), false) = (k, self.clusters.is_empty()) {
            let (aod, zod, aoa, zoa) = self.geometry.los_angles();
            let rx_resp = response(rx, rx_sector, aoa, zoa);
            let tx_resp = response(tx, tx_sector, aod, zod);
            let phase = -2.0 * PI * self.geometry.distance() / wavelength;
            let coefficient = Complex64::from_polar((k / (k + 1.0)).sqrt() * block_amplitude(aoa, zoa), phase);
            for (u, r) in rx_resp.iter().enumerate() {
                for (s, t) in tx_resp.iter().enumerate() {
                    h[[u, s, 0]] += coefficient * r * t;
                }
            }
        }

        self.coefficients = h;
        self.tx_sector = tx_sector;
        self.rx_sector = rx_sector;
    }

    /// Per-cluster gain seen through the transmit and receive weights
    pub fn long_term(&self, tx_weights: &[Complex64], rx_weights: &[Complex64]) -> Vec<Complex64> {
        let (num_rx, num_tx, num_clusters) = self.coefficients.dim();
        (0..num_clusters)
            .map(|n| {
                (0..num_rx.min(rx_weights.len()))
                    .map(|u| {
                        let row: Complex64 = (0..num_tx.min(tx_weights.len()))
                            .map(|s| self.coefficients[[u, s, n]] * tx_weights[s])
                            .sum();
                        rx_weights[u] * row
                    })
                    .sum()
            })
            .collect()
    }

    /// Doppler shift of each cluster in Hz
    pub fn doppler_shifts(&self, wavelength: f64, scatterer_speed: f64) -> Vec<f64> {
        let g = &self.geometry;
        self.clusters
            .iter()
            .enumerate()
            .map(|(n, cluster)| {
                let geometric = cluster.arrival_direction().dot(&g.rx_velocity)
                    + cluster.departure_direction().dot(&g.tx_velocity);
                let scatterer = if self.is_los() && n == 0 {
                    0.0
                } else {
                    2.0 * (2.0 * normal_cdf(cluster.scatterer) - 1.0) * scatterer_speed
                };
                (geometric + scatterer) / wavelength
            })
            .collect()
    }

    /// Copy the walked variates of each split parent onto its siblings
    fn sync_sub_clusters(&mut self) {
        let mut index = 0;
        while index < self.clusters.len() {
            if self.clusters[index].share < 1.0 && self.clusters[index].sub_cluster_delay == 0.0 {
                let parent = self.clusters[index].clone();
                for sibling in self.clusters.iter_mut().skip(index + 1).take(SUB_CLUSTERS.len() - 1) {
                    sibling.delay = parent.delay;
                    sibling.shadowing = parent.shadowing;
                    sibling.scatterer = parent.scatterer;
                    sibling.aoa = parent.aoa;
                    sibling.zoa = parent.zoa;
                    sibling.aod = parent.aod;
                    sibling.zod = parent.zod;
                }
                index += SUB_CLUSTERS.len();
            } else {
                index += 1;
            }
        }
    }
}

/// Exponential power-delay profile with per-cluster shadowing, normalized
fn cluster_powers(delays: &[f64], shadowing: &[f64], ds: f64, r_tau: f64, zeta_db: f64) -> Vec<f64> {
    let raw = cluster_powers_unsorted(delays, shadowing, ds, r_tau, zeta_db);
    let total: f64 = raw.iter().sum();
    raw.into_iter().map(|p| p / total).collect()
}

fn cluster_powers_unsorted(delays: &[f64], shadowing: &[f64], ds: f64, r_tau: f64, zeta_db: f64) -> Vec<f64> {
    delays
        .iter()
        .zip(shadowing)
        .map(|(tau, z)| (-tau * (r_tau - 1.0) / (r_tau * ds)).exp() * 10f64.powf(-zeta_db * z / 10.0))
        .collect()
}

/// Signed cluster angles around a reference direction; with `los` the first
/// cluster is pinned to the reference
fn place_angles(spread: &[f64], lsp_spread: f64, reference: f64, los: bool, rng: &mut dyn RngCore) -> Vec<f64> {
    let jitter_std = lsp_spread / 7.0;
    let raw: Vec<f64> = spread
        .iter()
        .map(|a| {
            let sign = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            let jitter: f64 = StandardNormal.sample(rng);
            sign * a + jitter_std * jitter
        })
        .collect();
    let anchor = if los { raw.first().copied().unwrap_or(0.0) } else { 0.0 };
    raw.into_iter().map(|a| a - anchor + reference).collect()
}

/// Ray offsets with independent random coupling of the four angle sets
fn couple_rays(cluster_spreads: [f64; 4], rng: &mut dyn RngCore) -> Vec<Ray> {
    let mut orders: [Vec<usize>; 4] = std::array::from_fn(|_| (0..RAYS_PER_CLUSTER).collect());
    for order in &mut orders {
        order.shuffle(rng);
    }
    (0..RAYS_PER_CLUSTER)
        .map(|m| Ray {
            aoa: cluster_spreads[0] * RAY_OFFSETS[orders[0][m]],
            zoa: cluster_spreads[1] * RAY_OFFSETS[orders[1][m]],
            aod: cluster_spreads[2] * RAY_OFFSETS[orders[2][m]],
            zod: cluster_spreads[3] * RAY_OFFSETS[orders[3][m]],
            phase: rng.gen_range(-PI..PI),
        })
        .collect()
}

/// Replace the two strongest clusters with three delay-shifted sub-clusters each
fn split_strongest(clusters: &mut Vec<Cluster>, cluster_ds: f64) {
    let mut order: Vec<usize> = (0..clusters.len()).collect();
    order.sort_by(|a, b| clusters[*b].power.total_cmp(&clusters[*a].power));
    let strongest: Vec<usize> = order.into_iter().take(2).collect();

    let mut split = Vec::with_capacity(clusters.len() + 2 * (SUB_CLUSTERS.len() - 1));
    for (index, cluster) in clusters.drain(..).enumerate() {
        if !strongest.contains(&index) {
            split.push(cluster);
            continue;
        }
        for ((rays, share), offset) in SUB_CLUSTERS.iter().zip(SUB_CLUSTER_DELAYS) {
            split.push(Cluster {
                sub_cluster_delay: offset * cluster_ds,
                power: cluster.power * share,
                share: *share,
                rays: rays.iter().map(|&m| cluster.rays[m]).collect(),
                ..cluster.clone()
            });
        }
    }
    *clusters = split;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::antenna::{AntennaConfig, ElementPattern};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn geometry() -> LinkGeometry {
        LinkGeometry {
            tx_position: Vector3::new(0.0, 0.0, 1.5),
            rx_position: Vector3::new(50.0, 0.0, 1.5),
            tx_velocity: Vector3::new(20.0, 0.0, 0.0),
            rx_velocity: Vector3::new(20.0, 0.0, 0.0),
        }
    }

    fn antenna() -> AntennaArray {
        AntennaArray::new(AntennaConfig {
            num_elements: 4,
            pattern: ElementPattern::Isotropic,
            ..Default::default()
        })
        .unwrap()
    }

    fn realization(condition: ChannelCondition, seed: u64) -> ChannelParams {
        let table = ScenarioTable::new(condition, 63e9).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        ChannelParams::generate(&table, condition, geometry(), None, Duration::ZERO, &mut rng)
    }

    #[test]
    fn test_normal_cdf_approximation() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((normal_cdf(1.96) - 0.975).abs() < 2e-3);
        assert!((normal_cdf(-1.0) - 0.1587).abs() < 2e-3);
    }

    #[test]
    fn test_generated_clusters() {
        for seed in 0..20 {
            let params = realization(ChannelCondition::Nlos, seed);
            let total: f64 = params.clusters.iter().map(|c| c.power).sum();
            assert!(total <= 1.0 + 1e-9);
            assert!(params.clusters.iter().all(|c| c.delay >= 0.0));
            assert!(params.clusters.iter().all(|c| (0.0..360.0).contains(&c.aoa)));
            assert!(params.clusters.iter().all(|c| (0.0..=180.0).contains(&c.zoa)));
            // Two strongest clusters became three sub-clusters each
            let subs = params.clusters.iter().filter(|c| c.share < 1.0).count();
            assert!(subs == 3 || subs == 6);
            assert!(params.clusters.iter().filter(|c| c.share < 1.0).all(|c| c.rays.len() < RAYS_PER_CLUSTER));
        }
    }

    #[test]
    fn test_los_first_cluster_points_along_path() {
        let params = realization(ChannelCondition::Los, 11);
        assert!(params.is_los());
        let (_, _, los_aoa, _) = geometry().los_angles();
        assert!(params.clusters.iter().any(|c| (c.aoa - los_aoa).abs() < 1e-9 && c.delay == 0.0));
    }

    #[test]
    fn test_beam_contraction_gain_bounded() {
        let mut params = realization(ChannelCondition::Los, 5);
        let (tx, rx) = (antenna(), antenna());
        params.compute_coefficients(&tx, &rx, 0, 2, 0.00476, None);
        assert_eq!(params.coefficients.dim(), (4, 4, params.clusters.len()));

        let uniform = vec![Complex64::new(0.5, 0.0); 4];
        let gains = params.long_term(&uniform, &uniform);
        assert_eq!(gains.len(), params.clusters.len());
        assert!(gains.iter().all(|g| g.norm().is_finite()));
    }

    #[test]
    fn test_update_keeps_structure() {
        let mut params = realization(ChannelCondition::Nlos, 9);
        let before = params.clusters.len();
        let mut moved = geometry();
        moved.tx_position = moved.tx_position + moved.tx_velocity * 0.01;
        moved.rx_position = moved.rx_position + moved.rx_velocity * 0.01;
        let mut rng = StdRng::seed_from_u64(1);
        params.update(moved, Duration::from_millis(10), None, &mut rng);
        assert_eq!(params.clusters.len(), before);
        assert_eq!(params.updated_at, Duration::from_millis(10));
        let total: f64 = params.clusters.iter().map(|c| c.power).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(params.clusters.iter().all(|c| c.delay >= 0.0));
    }

    #[test]
    fn test_doppler_of_parked_link_is_scatterer_only() {
        let table = ScenarioTable::new(ChannelCondition::Los, 63e9).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let mut still = geometry();
        still.tx_velocity = Vector3::ZERO;
        still.rx_velocity = Vector3::ZERO;
        let params = ChannelParams::generate(&table, ChannelCondition::Los, still, None, Duration::ZERO, &mut rng);
        let shifts = params.doppler_shifts(0.00476, 0.0);
        assert!(shifts.iter().all(|f| f.abs() < 1e-9));
    }
}
