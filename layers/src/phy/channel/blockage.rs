//! Geometric blockage (TR 38.901 §7.6.4.1, model A)
//!
//! A fixed self-blocking region around the device body plus a number of
//! randomly placed non-self blockers. Blocker positions are kept per link and
//! decorrelate with the distance travelled (or with the blocker speed).

use common::utils::wrap_azimuth_deg;
use rand::{Rng, RngCore};
use rand_distr::{Distribution, StandardNormal};

const SELF_BLOCK_AZIMUTH: f64 = 260.0;
const SELF_BLOCK_AZIMUTH_WIDTH: f64 = 120.0;
const SELF_BLOCK_ZENITH: f64 = 100.0;
const SELF_BLOCK_ZENITH_WIDTH: f64 = 80.0;
const SELF_BLOCK_LOSS_DB: f64 = 30.0;

/// Distance from the receiver to a non-self blocker, meters
const BLOCKER_DISTANCE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub struct BlockageConfig {
    pub num_blockers: usize,
    /// Blocker speed in m/s; zero ties decorrelation to device motion only
    pub blocker_speed: f64,
    pub correlation_distance: f64,
    pub self_blocking: bool,
}

impl Default for BlockageConfig {
    fn default() -> Self {
        Self {
            num_blockers: 4,
            blocker_speed: 0.0,
            correlation_distance: 10.0,
            self_blocking: true,
        }
    }
}

/// Angular extent of one blocker as seen from the receiver, degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockingRegion {
    pub azimuth: f64,
    pub azimuth_width: f64,
    pub zenith: f64,
    pub zenith_width: f64,
}

impl BlockingRegion {
    fn contains(&self, azimuth: f64, zenith: f64) -> bool {
        angle_difference(azimuth, self.azimuth).abs() < self.azimuth_width / 2.0
            && (zenith - self.zenith).abs() < self.zenith_width / 2.0
    }
}

/// Blockers attached to one link
#[derive(Debug, Clone, PartialEq)]
pub struct BlockerState {
    regions: Vec<BlockingRegion>,
}

impl BlockerState {
    pub fn draw(config: &BlockageConfig, rng: &mut dyn RngCore) -> Self {
        let regions = (0..config.num_blockers)
            .map(|_| BlockingRegion {
                azimuth: rng.gen_range(0.0..360.0),
                azimuth_width: rng.gen_range(15.0..45.0),
                zenith: 90.0,
                zenith_width: rng.gen_range(5.0..15.0),
            })
            .collect();
        Self { regions }
    }

    pub fn regions(&self) -> &[BlockingRegion] {
        &self.regions
    }

    /// Move blockers after the receiver travelled `moved` meters during `elapsed_s`
    pub fn evolve(&mut self, config: &BlockageConfig, moved: f64, elapsed_s: f64, rng: &mut dyn RngCore) {
        let shift = if config.blocker_speed > 0.0 {
            config.blocker_speed * elapsed_s
        } else {
            moved
        };
        let correlation = (-shift / config.correlation_distance).exp();
        let spread = (1.0 - correlation * correlation).sqrt();
        for region in &mut self.regions {
            let step: f64 = StandardNormal.sample(rng);
            region.azimuth = wrap_azimuth_deg(region.azimuth + spread * step * region.azimuth_width);
        }
    }

    /// Attenuation in dB of a cluster arriving from (`azimuth`, `zenith`), degrees,
    /// with `local_azimuth` measured from the device heading
    pub fn attenuation_db(
        &self,
        config: &BlockageConfig,
        azimuth: f64,
        local_azimuth: f64,
        zenith: f64,
        wavelength: f64,
    ) -> f64 {
        let mut loss = 0.0;
        if config.self_blocking {
            let body = BlockingRegion {
                azimuth: SELF_BLOCK_AZIMUTH,
                azimuth_width: SELF_BLOCK_AZIMUTH_WIDTH,
                zenith: SELF_BLOCK_ZENITH,
                zenith_width: SELF_BLOCK_ZENITH_WIDTH,
            };
            if body.contains(local_azimuth, zenith) {
                loss += SELF_BLOCK_LOSS_DB;
            }
        }
        for region in self.regions.iter().filter(|r| r.contains(azimuth, zenith)) {
            loss += diffraction_loss_db(region, azimuth, zenith, wavelength);
        }
        loss
    }
}

/// Knife-edge loss of a cluster inside a blocking region
fn diffraction_loss_db(region: &BlockingRegion, azimuth: f64, zenith: f64, wavelength: f64) -> f64 {
    let edge = |offset_deg: f64| {
        let angle = offset_deg.to_radians().abs().min(89.0f64.to_radians());
        let term = std::f64::consts::PI / wavelength * BLOCKER_DISTANCE * (1.0 / angle.cos() - 1.0);
        (std::f64::consts::FRAC_PI_2 * term.sqrt()).atan() / std::f64::consts::PI
    };
    let delta_az = angle_difference(azimuth, region.azimuth);
    let delta_zen = zenith - region.zenith;
    let f_a = edge(delta_az - region.azimuth_width / 2.0) + edge(delta_az + region.azimuth_width / 2.0);
    let f_z = edge(delta_zen - region.zenith_width / 2.0) + edge(delta_zen + region.zenith_width / 2.0);
    let residual = (1.0 - f_a * f_z).max(1e-6);
    -20.0 * residual.log10()
}

/// Signed difference a - b wrapped into (-180, 180]
fn angle_difference(a: f64, b: f64) -> f64 {
    let d = wrap_azimuth_deg(a - b);
    if d > 180.0 { d - 360.0 } else { d }
}
