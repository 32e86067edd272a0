//! 3GPP beamforming channel model
//!
//! Turns a transmitted PSD into the PSD seen behind the receiver's analog
//! beam. Path loss is applied elsewhere; this model contributes the
//! small-scale fading, the array gains of both panels and the optional
//! blockage and oxygen absorption. Realizations live in a per-pair cache and
//! are regenerated only when the propagation condition changes or the
//! configured update period runs out.

pub mod blockage;
pub mod cache;
pub mod cluster;
pub mod oxygen;
pub mod params;

pub use blockage::BlockageConfig;
pub use cache::{ChannelCache, ChannelHandle, PairKey};
pub use cluster::{ChannelParams, LinkGeometry};

use crate::phy::antenna::AntennaArray;
use crate::phy::spectrum::SpectrumValue;
use crate::LayerError;
use common::utils::{db_to_linear, SPEED_OF_LIGHT};
use common::{NodeId, Vector3};
use interfaces::ChannelCondition;
use num_complex::Complex64;
use params::ScenarioTable;
use rand::RngCore;
use std::f64::consts::PI;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelModelConfig {
    /// Lifetime of a realization before it is redrawn; `None` keeps it
    /// until the propagation condition changes
    pub update_period: Option<Duration>,
    /// Minimum spacing of consistency updates
    pub consistency_interval: Duration,
    pub blockage: Option<BlockageConfig>,
    pub oxygen_absorption: bool,
    /// Speed of moving scatterers in m/s
    pub scatterer_speed: f64,
}

impl Default for ChannelModelConfig {
    fn default() -> Self {
        Self {
            update_period: None,
            consistency_interval: Duration::from_millis(1),
            blockage: None,
            oxygen_absorption: false,
            scatterer_speed: 0.0,
        }
    }
}

/// One end of a link at the time of transmission
#[derive(Debug, Clone, Copy)]
pub struct LinkEnd<'a> {
    pub node: NodeId,
    pub position: Vector3,
    pub velocity: Vector3,
    pub antenna: &'a AntennaArray,
}

/// Stochastic channel shared by all links of a session
#[derive(Debug)]
pub struct BeamformingChannelModel {
    config: ChannelModelConfig,
    wavelength: f64,
    los: ScenarioTable,
    nlos: ScenarioTable,
    nlosv: ScenarioTable,
    cache: ChannelCache<ChannelParams>,
}

impl BeamformingChannelModel {
    pub fn new(config: ChannelModelConfig, carrier_hz: f64) -> Result<Self, LayerError> {
        if config.oxygen_absorption && !oxygen::in_range(carrier_hz) {
            return Err(LayerError::InvalidConfiguration(format!(
                "Oxygen absorption enabled at {:.2} GHz, outside the tabulated band", carrier_hz / 1e9
            )));
        }
        Ok(Self {
            wavelength: SPEED_OF_LIGHT / carrier_hz,
            los: ScenarioTable::new(ChannelCondition::Los, carrier_hz)?,
            nlos: ScenarioTable::new(ChannelCondition::Nlos, carrier_hz)?,
            nlosv: ScenarioTable::new(ChannelCondition::BlockedNlos, carrier_hz)?,
            cache: ChannelCache::new(),
            config,
        })
    }

    pub fn config(&self) -> &ChannelModelConfig {
        &self.config
    }

    pub fn cache(&self) -> &ChannelCache<ChannelParams> {
        &self.cache
    }

    /// Apply fading and beamforming gain to `psd` travelling from `tx` to `rx`
    pub fn apply(
        &mut self,
        psd: &SpectrumValue,
        tx: &LinkEnd<'_>,
        rx: &LinkEnd<'_>,
        condition: ChannelCondition,
        now: Duration,
        rng: &mut dyn RngCore,
    ) -> Result<SpectrumValue, LayerError> {
        if tx.antenna.is_omni() || rx.antenna.is_omni() {
            return Ok(psd.clone());
        }
        let tx_beam = tx.antenna.current_beam().ok_or_else(|| {
            LayerError::ChannelModel(format!("{} transmits without a beam", tx.node))
        })?;
        let rx_beam = rx.antenna.current_beam().ok_or_else(|| {
            LayerError::ChannelModel(format!("{} receives without a beam", rx.node))
        })?;

        let (handle, reversed) = self.realization(tx, rx, condition, now, rng)?;
        let params = self.cache.get(handle).ok_or_else(|| {
            LayerError::ChannelModel("Channel handle points outside the cache".into())
        })?;

        // Stored direction decides which weights face which tensor axis
        let (tx_weights, rx_weights) = if reversed {
            (&rx_beam.weights, &tx_beam.weights)
        } else {
            (&tx_beam.weights, &rx_beam.weights)
        };
        let gains = params.long_term(tx_weights, rx_weights);
        let dopplers = params.doppler_shifts(self.wavelength, self.config.scatterer_speed);
        let elapsed = now.saturating_sub(params.generated_at).as_secs_f64();
        let distance = params.geometry.distance();

        let mut received = psd.clone();
        for (value, &frequency) in received.values_mut().iter_mut().zip(psd.model().band_centers()) {
            let mut sum = Complex64::new(0.0, 0.0);
            for ((gain, doppler), cluster) in gains.iter().zip(&dopplers).zip(&params.clusters) {
                let delay = cluster.total_delay();
                let mut term = gain
                    * Complex64::from_polar(1.0, 2.0 * PI * doppler * elapsed)
                    * Complex64::from_polar(1.0, -2.0 * PI * frequency * delay);
                if self.config.oxygen_absorption {
                    let f = frequency.clamp(oxygen::MIN_FREQUENCY_HZ, oxygen::MAX_FREQUENCY_HZ);
                    let loss = oxygen::attenuation_db(f, distance + SPEED_OF_LIGHT * delay)?;
                    term /= db_to_linear(loss).sqrt();
                }
                sum += term;
            }
            *value *= sum.norm_sqr();
        }

        trace!("Beamforming gain {} -> {}: {:.2} dB over {} clusters",
               tx.node, rx.node,
               10.0 * (received.integral() / psd.integral().max(f64::MIN_POSITIVE)).log10(),
               params.clusters.len());
        Ok(received)
    }

    /// Fetch, redraw or evolve the realization of a link
    fn realization(
        &mut self,
        tx: &LinkEnd<'_>,
        rx: &LinkEnd<'_>,
        condition: ChannelCondition,
        now: Duration,
        rng: &mut dyn RngCore,
    ) -> Result<(ChannelHandle, bool), LayerError> {
        let reusable = match self.cache.lookup(tx.node, rx.node) {
            Some((handle, reversed)) => {
                let params = self.cache.get(handle).ok_or_else(|| {
                    LayerError::ChannelModel("Channel handle points outside the cache".into())
                })?;
                let expired = self
                    .config
                    .update_period
                    .is_some_and(|period| now.saturating_sub(params.generated_at) >= period);
                (params.condition == condition && !expired).then_some((handle, reversed))
            }
            None => None,
        };

        let (handle, reversed) = match reusable {
            Some(found) => found,
            None => {
                let table = match condition {
                    ChannelCondition::Los => &self.los,
                    ChannelCondition::Nlos => &self.nlos,
                    ChannelCondition::BlockedNlos => &self.nlosv,
                };
                let geometry = LinkGeometry {
                    tx_position: tx.position,
                    rx_position: rx.position,
                    tx_velocity: tx.velocity,
                    rx_velocity: rx.velocity,
                };
                let params = ChannelParams::generate(
                    table, condition, geometry, self.config.blockage.as_ref(), now, rng,
                );
                debug!("New {:?} channel {} -> {}: {} clusters, DS={:.1} ns",
                       condition, tx.node, rx.node, params.clusters.len(), params.delay_spread * 1e9);
                (self.cache.insert(tx.node, rx.node, params), false)
            }
        };

        let (stored_tx, stored_rx) = if reversed { (rx, tx) } else { (tx, rx) };
        let geometry = LinkGeometry {
            tx_position: stored_tx.position,
            rx_position: stored_rx.position,
            tx_velocity: stored_tx.velocity,
            rx_velocity: stored_rx.velocity,
        };
        let blockage = self.config.blockage.as_ref();
        let params = self.cache.get_mut(handle).ok_or_else(|| {
            LayerError::ChannelModel("Channel handle points outside the cache".into())
        })?;

        let mut dirty = params.coefficients.is_empty();
        if now > params.updated_at && now - params.updated_at >= self.config.consistency_interval {
            params.update(geometry, now, blockage, rng);
            dirty = true;
        }
        let tx_sector = stored_tx.antenna.current_sector();
        let rx_sector = stored_rx.antenna.current_sector();
        let shape = (
            stored_rx.antenna.num_elements(),
            stored_tx.antenna.num_elements(),
            params.clusters.len(),
        );
        if dirty || params.tx_sector != tx_sector || params.rx_sector != rx_sector || params.coefficients.dim() != shape {
            params.compute_coefficients(
                stored_tx.antenna, stored_rx.antenna, tx_sector, rx_sector, self.wavelength, blockage,
            );
        }
        Ok((handle, reversed))
    }
}
