//! Uniform planar antenna arrays and analog beamforming
//!
//! An array is a square panel of N elements (N a perfect square) spaced half
//! a wavelength apart. The horizontal plane is split into `num_sectors`
//! equal sectors; pointing at a peer rotates the panel to the sector holding
//! the bearing and applies the conjugate steering phases.

use crate::LayerError;
use common::utils::wrap_azimuth_deg;
use common::{NodeId, Vector3};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use tracing::{debug, trace};

/// Radiation pattern of a single array element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementPattern {
    Isotropic,
    /// TR 38.901 Table 7.3-1 element
    ThreeGppMmWave,
    /// Wider horizontal beam used for vehicle-mounted panels
    ThreeGppV2v,
}

impl ElementPattern {
    /// (vertical HPBW, horizontal HPBW, side-lobe limit, front-back ratio, max gain), degrees/dB
    fn parameters(&self) -> Option<(f64, f64, f64, f64, f64)> {
        match self {
            ElementPattern::Isotropic => None,
            ElementPattern::ThreeGppMmWave => Some((65.0, 65.0, 30.0, 30.0, 8.0)),
            ElementPattern::ThreeGppV2v => Some((65.0, 90.0, 30.0, 30.0, 5.0)),
        }
    }

    /// Element gain in dBi; `azimuth_deg` is relative to boresight in [-180, 180]
    pub fn gain_db(&self, azimuth_deg: f64, zenith_deg: f64) -> f64 {
        let Some((theta_3db, phi_3db, sla_v, a_max, g_max)) = self.parameters() else {
            return 0.0;
        };
        let vertical = -(12.0 * ((zenith_deg - 90.0) / theta_3db).powi(2)).min(sla_v);
        let horizontal = -(12.0 * (azimuth_deg / phi_3db).powi(2)).min(a_max);
        -(-(vertical + horizontal)).min(a_max) + g_max
    }
}

/// Static description of an array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntennaConfig {
    pub num_elements: usize,
    pub num_sectors: u8,
    pub element_spacing: f64,
    pub pattern: ElementPattern,
    pub omni: bool,
}

impl Default for AntennaConfig {
    fn default() -> Self {
        Self {
            num_elements: 16,
            num_sectors: 4,
            element_spacing: 0.5,
            pattern: ElementPattern::ThreeGppV2v,
            omni: false,
        }
    }
}

/// Weights selected toward one peer
#[derive(Debug, Clone, PartialEq)]
pub struct BeamformingVector {
    pub weights: Vec<Complex64>,
    pub sector: u8,
}

/// Planar array with per-peer weight memory
#[derive(Debug, Clone)]
pub struct AntennaArray {
    config: AntennaConfig,
    side: usize,
    beams: HashMap<NodeId, BeamformingVector>,
    current: Option<NodeId>,
}

impl AntennaArray {
    pub fn new(config: AntennaConfig) -> Result<Self, LayerError> {
        let side = (config.num_elements as f64).sqrt().round() as usize;
        if config.num_elements == 0 || side * side != config.num_elements {
            return Err(LayerError::InvalidConfiguration(format!(
                "Antenna element count {} is not a perfect square", config.num_elements
            )));
        }
        if config.num_sectors == 0 {
            return Err(LayerError::InvalidConfiguration("Antenna needs at least one sector".into()));
        }
        Ok(Self {
            config,
            side,
            beams: HashMap::new(),
            current: None,
        })
    }

    pub fn config(&self) -> &AntennaConfig {
        &self.config
    }

    pub fn num_elements(&self) -> usize {
        self.config.num_elements
    }

    pub fn is_omni(&self) -> bool {
        self.config.omni
    }

    pub fn set_omni(&mut self, omni: bool) {
        self.config.omni = omni;
    }

    /// Boresight azimuth of a sector, radians
    pub fn sector_orientation(&self, sector: u8) -> f64 {
        (sector as f64 * 360.0 / self.config.num_sectors as f64).to_radians()
    }

    /// Sector whose boresight is closest to `azimuth_deg`
    pub fn sector_for(&self, azimuth_deg: f64) -> u8 {
        let width = 360.0 / self.config.num_sectors as f64;
        let index = (wrap_azimuth_deg(azimuth_deg + width / 2.0) / width).floor() as u8;
        index % self.config.num_sectors
    }

    /// Sector of the active beam (0 before any beam is selected)
    pub fn current_sector(&self) -> u8 {
        self.current_beam().map_or(0, |beam| beam.sector)
    }

    /// Element position in wavelengths for the panel rotated to `sector`
    pub fn element_location(&self, element: usize, sector: u8) -> Vector3 {
        let orientation = self.sector_orientation(sector);
        let column = (element % self.side) as f64 * self.config.element_spacing;
        let row = (element / self.side) as f64 * self.config.element_spacing;
        Vector3::new(-orientation.sin() * column, orientation.cos() * column, row)
    }

    /// Field amplitude of one element toward global angles (radians)
    pub fn field_pattern(&self, azimuth: f64, zenith: f64, sector: u8) -> f64 {
        let local = wrap_azimuth_deg((azimuth - self.sector_orientation(sector)).to_degrees());
        let local = if local > 180.0 { local - 360.0 } else { local };
        10f64.powf(self.config.pattern.gain_db(local, zenith.to_degrees()) / 20.0)
    }

    /// Compute and store weights toward `peer`, located along `bearing`
    /// (peer position minus own position; velocity is ignored)
    pub fn set_beamforming_vector(&mut self, peer: NodeId, bearing: Vector3) {
        let azimuth = bearing.y.atan2(bearing.x);
        let range = bearing.norm();
        let zenith = if range > 0.0 { (bearing.z / range).clamp(-1.0, 1.0).acos() } else { PI / 2.0 };
        let sector = self.sector_for(azimuth.to_degrees());

        let direction = Vector3::from_spherical(azimuth, zenith);
        let norm = 1.0 / (self.config.num_elements as f64).sqrt();
        let weights = (0..self.config.num_elements)
            .map(|element| {
                let phase = -2.0 * PI * direction.dot(&self.element_location(element, sector));
                Complex64::from_polar(norm, phase)
            })
            .collect();

        trace!("Beam toward {}: azimuth={:.1} deg, zenith={:.1} deg, sector={}",
               peer, azimuth.to_degrees(), zenith.to_degrees(), sector);
        self.beams.insert(peer, BeamformingVector { weights, sector });
        self.current = Some(peer);
    }

    /// Reactivate previously computed weights toward `peer`
    pub fn change_beamforming_vector(&mut self, peer: NodeId) -> Result<(), LayerError> {
        if !self.beams.contains_key(&peer) {
            return Err(LayerError::InvalidState(format!("No beam stored toward {}", peer)));
        }
        debug!("Switching beam to {}", peer);
        self.current = Some(peer);
        Ok(())
    }

    pub fn beam_toward(&self, peer: NodeId) -> Option<&BeamformingVector> {
        self.beams.get(&peer)
    }

    pub fn current_beam(&self) -> Option<&BeamformingVector> {
        self.current.and_then(|peer| self.beams.get(&peer))
    }

    pub fn current_target(&self) -> Option<NodeId> {
        self.current
    }
}
