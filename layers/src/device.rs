//! Sidelink device: MAC, PHY and RLC bearers of one vehicle
//!
//! The device owns its layers and routes the PHY events of its node through
//! them. Anything that has to leave the device (a signal for the channel,
//! trace records, delivered SDUs) is returned to the caller in a
//! [`DeviceOutput`].

use crate::mac::{MacConfig, SidelinkMac};
use crate::phy::{
    AntennaArray, FrameTiming, PhyConfig, PhyEvent, SidelinkPhy, SignalParams,
};
use crate::rlc::{Bearers, RlcConfig, RlcUmEntity};
use crate::trace::{SchedulingTrace, SinrReport};
use crate::LayerError;
use bytes::Bytes;
use common::{NodeId, Rnti};
use interfaces::{Amc, ErrorModel, Scheduler};
use rand::RngCore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Per-device counters
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct DeviceStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub dropped_packets: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub decoded_blocks: u64,
    pub corrupted_blocks: u64,
    sinr_sum_db: f64,
}

impl DeviceStats {
    /// Mean SINR in dB over every captured block, if any
    pub fn mean_sinr_db(&self) -> Option<f64> {
        let blocks = self.decoded_blocks + self.corrupted_blocks;
        (blocks > 0).then(|| self.sinr_sum_db / blocks as f64)
    }
}

/// What a handled event produced for the rest of the session
#[derive(Debug, Default)]
pub struct DeviceOutput {
    pub signal: Option<SignalParams>,
    pub scheduling: Vec<SchedulingTrace>,
    pub sinr: Vec<SinrReport>,
    /// Complete SDUs with their source
    pub delivered: Vec<(Rnti, Bytes)>,
}

pub struct SidelinkDevice {
    node: NodeId,
    rnti: Rnti,
    mac: SidelinkMac,
    phy: SidelinkPhy,
    bearers: Bearers,
    rlc_config: RlcConfig,
    stats: DeviceStats,
}

impl SidelinkDevice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node: NodeId,
        rnti: Rnti,
        timing: Arc<FrameTiming>,
        mac_config: MacConfig,
        phy_config: PhyConfig,
        rlc_config: RlcConfig,
        antenna: AntennaArray,
        amc: Box<dyn Amc>,
        error_model: Box<dyn ErrorModel>,
    ) -> Self {
        let mut mac = SidelinkMac::new(mac_config, timing.clone(), amc);
        mac.set_rnti(rnti);
        let mut phy = SidelinkPhy::new(phy_config, timing, node, antenna, error_model);
        phy.set_rnti(rnti);
        Self {
            node,
            rnti,
            mac,
            phy,
            bearers: Bearers::new(),
            rlc_config,
            stats: DeviceStats::default(),
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn mac(&self) -> &SidelinkMac {
        &self.mac
    }

    pub fn mac_mut(&mut self) -> &mut SidelinkMac {
        &mut self.mac
    }

    pub fn phy(&self) -> &SidelinkPhy {
        &self.phy
    }

    pub fn phy_mut(&mut self) -> &mut SidelinkPhy {
        &mut self.phy
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    /// Open a bearer on `lcid` towards `destination`
    pub fn add_bearer(&mut self, lcid: u8, destination: Rnti) {
        self.mac.add_logical_channel(lcid);
        self.bearers
            .insert(RlcUmEntity::new(self.rlc_config.clone(), lcid, destination));
    }

    /// Hand an application packet to the bearer towards `destination`
    pub fn send(&mut self, destination: Rnti, payload: Bytes) -> Result<bool, LayerError> {
        let size = payload.len() as u64;
        let bearer = self
            .bearers
            .towards(destination)
            .ok_or(LayerError::UnknownDevice(destination))?;
        let queued = bearer.send_sdu(payload, self.mac.sap_provider())?;
        if queued {
            self.stats.tx_packets += 1;
            self.stats.tx_bytes += size;
        } else {
            self.stats.dropped_packets += 1;
        }
        Ok(queued)
    }

    /// A signal reaches this device's antenna
    pub fn start_rx(
        &mut self,
        signal: SignalParams,
        sched: &mut dyn Scheduler<PhyEvent>,
    ) -> Result<(), LayerError> {
        self.phy.spectrum_mut().start_rx(signal, sched)
    }

    pub fn handle_phy_event(
        &mut self,
        event: PhyEvent,
        sched: &mut dyn Scheduler<PhyEvent>,
        rng: &mut dyn RngCore,
    ) -> Result<DeviceOutput, LayerError> {
        let mut output = DeviceOutput::default();
        match event {
            PhyEvent::SlotTick => {
                self.phy.start_slot(&mut self.mac, &mut self.bearers, sched)?;
                output.scheduling = self.mac.take_traces();
            }
            PhyEvent::SendData(tx) => {
                output.signal = Some(self.phy.send_data(tx, sched)?);
            }
            PhyEvent::EndTx => {
                trace!("Device {}: end of transmission", self.rnti);
                self.phy.spectrum_mut().end_tx()?;
            }
            PhyEvent::EndRxData => {
                let now = sched.now();
                let reports = self
                    .phy
                    .end_rx_data(now, rng, &mut self.mac, &mut self.bearers)?;
                for report in &reports {
                    if report.corrupted {
                        self.stats.corrupted_blocks += 1;
                    } else {
                        self.stats.decoded_blocks += 1;
                    }
                    self.stats.sinr_sum_db += report.avg_sinr_db;
                }
                output.sinr = reports;
                output.delivered = self.collect_delivered(now);
            }
        }
        Ok(output)
    }

    fn collect_delivered(&mut self, now: Duration) -> Vec<(Rnti, Bytes)> {
        let delivered: Vec<(Rnti, Bytes)> = self
            .bearers
            .iter_mut()
            .flat_map(|bearer| bearer.take_delivered())
            .collect();
        for (source, sdu) in &delivered {
            debug!(
                "Device {}: {} byte packet from {} at {:?}",
                self.rnti,
                sdu.len(),
                source,
                now
            );
            self.stats.rx_packets += 1;
            self.stats.rx_bytes += sdu.len() as u64;
        }
        delivered
    }

    /// Cancel everything this device has pending on the scheduler
    pub fn reset(&mut self, sched: &mut dyn Scheduler<PhyEvent>) {
        self.phy.reset(sched);
    }
}
