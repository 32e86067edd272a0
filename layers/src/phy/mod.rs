//! Physical Layer (PHY) Submodules
//!
//! Slot-driven sidelink PHY on top of a spectrum-domain model: frame timing,
//! power spectral densities, interference accumulation, antenna arrays, the
//! 3GPP beamformed channel and the per-device receiver state machine.

pub mod antenna;
pub mod channel;
pub mod frame_structure;
pub mod interference;
pub mod spectrum;
pub mod spectrum_phy;

pub use antenna::{AntennaArray, AntennaConfig, ElementPattern};
pub use frame_structure::{FrameTiming, FrameTimingBuilder};
pub use spectrum::{SpectrumModel, SpectrumValue};
pub use spectrum_phy::{RxOutcome, RxState, SidelinkTb, SignalKind, SignalParams, SpectrumPhy};

use crate::mac::{AllocationKind, MacSapUser, MacService, SlotAllocation};
use crate::packet::PacketBurst;
use crate::trace::SinrReport;
use crate::LayerError;
use common::{NodeId, Rnti, SfnSf};
use interfaces::{ErrorModel, EventId, Scheduler};
use rand::RngCore;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// PHY layer configuration
#[derive(Debug, Clone)]
pub struct PhyConfig {
    /// Transmit power in dBm, spread over every RB
    pub tx_power_dbm: f64,
    /// Receiver noise figure in dB
    pub noise_figure_db: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 30.0,
            noise_figure_db: 5.0,
        }
    }
}

/// Transport block waiting for its symbols inside the current slot
#[derive(Debug, Clone)]
pub struct PendingTransmission {
    pub burst: PacketBurst,
    pub allocation: SlotAllocation,
}

/// Callbacks a PHY arms on the simulation scheduler
#[derive(Debug, Clone)]
pub enum PhyEvent {
    SlotTick,
    SendData(PendingTransmission),
    EndTx,
    EndRxData,
}

/// Services the PHY offers to the MAC
pub trait PhyService {
    /// Queue a transport block for the slot being indicated
    fn add_transport_block(
        &mut self,
        burst: PacketBurst,
        allocation: SlotAllocation,
    ) -> Result<(), LayerError>;

    /// Point the receive beam at `peer` ahead of its slot
    fn prepare_for_reception(&mut self, peer: Rnti) -> Result<(), LayerError>;
}

/// Slot-driven sidelink PHY of one device
pub struct SidelinkPhy {
    config: PhyConfig,
    timing: Arc<FrameTiming>,
    spectrum_model: Arc<SpectrumModel>,
    rnti: Rnti,
    node: NodeId,
    device_map: HashMap<Rnti, NodeId>,
    pending: VecDeque<PendingTransmission>,
    sfn: SfnSf,
    spectrum: SpectrumPhy,
    slot_event: Option<EventId>,
    /// SendData events of the current slot, in firing order
    send_events: VecDeque<EventId>,
}

impl SidelinkPhy {
    pub fn new(
        config: PhyConfig,
        timing: Arc<FrameTiming>,
        node: NodeId,
        antenna: AntennaArray,
        error_model: Box<dyn ErrorModel>,
    ) -> Self {
        let spectrum_model = SpectrumModel::new(
            timing.center_frequency_hz(),
            timing.num_rb(),
            timing.rb_bandwidth_hz(),
        );
        let noise = spectrum::create_noise_psd(spectrum_model.clone(), config.noise_figure_db);
        info!(
            "PHY {}: {} RBs at {:.2} GHz, {} dBm, NF {} dB",
            node,
            timing.num_rb(),
            timing.center_frequency_hz() / 1e9,
            config.tx_power_dbm,
            config.noise_figure_db
        );
        Self {
            config,
            timing,
            spectrum_model,
            rnti: Rnti(0),
            node,
            device_map: HashMap::new(),
            pending: VecDeque::new(),
            sfn: SfnSf::default(),
            spectrum: SpectrumPhy::new(antenna, noise, error_model),
            slot_event: None,
            send_events: VecDeque::new(),
        }
    }

    pub fn rnti(&self) -> Rnti {
        self.rnti
    }

    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.rnti = rnti;
        self.spectrum.set_rnti(rnti);
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn sfn(&self) -> SfnSf {
        self.sfn
    }

    pub fn timing(&self) -> &Arc<FrameTiming> {
        &self.timing
    }

    pub fn spectrum_model(&self) -> &Arc<SpectrumModel> {
        &self.spectrum_model
    }

    pub fn spectrum(&self) -> &SpectrumPhy {
        &self.spectrum
    }

    pub fn spectrum_mut(&mut self) -> &mut SpectrumPhy {
        &mut self.spectrum
    }

    /// Make `rnti` reachable as a destination
    pub fn add_device(&mut self, rnti: Rnti, node: NodeId) {
        self.device_map.insert(rnti, node);
    }

    fn node_of(&self, rnti: Rnti) -> Result<NodeId, LayerError> {
        self.device_map
            .get(&rnti)
            .copied()
            .ok_or(LayerError::UnknownDevice(rnti))
    }

    /// Arm the first slot
    pub fn start(&mut self, sched: &mut dyn Scheduler<PhyEvent>) {
        self.slot_event = Some(sched.schedule_in(Duration::ZERO, PhyEvent::SlotTick));
    }

    /// Run one slot: indicate the MAC, place its blocks in time, re-arm
    pub fn start_slot(
        &mut self,
        mac: &mut dyn MacService,
        upper: &mut dyn MacSapUser,
        sched: &mut dyn Scheduler<PhyEvent>,
    ) -> Result<(), LayerError> {
        trace!(
            "PHY {}: frame={} subframe={} slot={}",
            self.rnti,
            self.sfn.frame,
            self.sfn.subframe,
            self.sfn.slot
        );
        let sfn = self.sfn;
        self.send_events.clear();
        mac.slot_indication(sfn, self, upper)?;

        let symbol_period = self.timing.symbol_period();
        let mut used_symbols = 0u32;
        while let Some(tx) = self.pending.pop_front() {
            if tx.allocation.kind != AllocationKind::Data {
                return Err(LayerError::UnsupportedAllocation(format!(
                    "PHY {}: {:?} allocation in slot {}",
                    self.rnti, tx.allocation.kind, sfn
                )));
            }
            used_symbols += tx.allocation.num_symbols as u32;
            if used_symbols > self.timing.symbols_per_slot() as u32 {
                return Err(LayerError::InvalidState(format!(
                    "PHY {}: {} symbols scheduled in a {} symbol slot",
                    self.rnti,
                    used_symbols,
                    self.timing.symbols_per_slot()
                )));
            }
            let offset = symbol_period * tx.allocation.symbol_start as u32;
            // Allocations come in ascending symbol order, so ids fire front first
            self.send_events
                .push_back(sched.schedule_in(offset, PhyEvent::SendData(tx)));
        }

        self.sfn.advance(
            self.timing.slots_per_subframe(),
            self.timing.subframes_per_frame(),
        );
        self.slot_event = Some(sched.schedule_in(self.timing.slot_period(), PhyEvent::SlotTick));
        Ok(())
    }

    /// Beam toward the destination and put the block on air
    pub fn send_data(
        &mut self,
        tx: PendingTransmission,
        sched: &mut dyn Scheduler<PhyEvent>,
    ) -> Result<SignalParams, LayerError> {
        self.send_events.pop_front();
        let allocation = tx.allocation;
        let destination = self.node_of(allocation.destination)?;
        self.spectrum.antenna_mut().change_beamforming_vector(destination)?;

        let rb_mask: Vec<usize> = (0..self.spectrum_model.num_bands()).collect();
        let psd = spectrum::create_tx_psd(
            self.spectrum_model.clone(),
            self.config.tx_power_dbm,
            &rb_mask,
        );
        self.spectrum.set_tx_psd(psd);

        let duration = self.timing.symbol_period() * allocation.num_symbols as u32;
        debug!(
            "PHY {}: sending {} bytes to {} on symbols [{}, +{}) mcs={}",
            self.rnti,
            allocation.tb_size,
            allocation.destination,
            allocation.symbol_start,
            allocation.num_symbols,
            allocation.mcs
        );
        let tb = SidelinkTb {
            source: self.rnti,
            destination: allocation.destination,
            burst: tx.burst,
            mcs: allocation.mcs,
            tb_size: allocation.tb_size,
            num_symbols: allocation.num_symbols,
            rb_mask,
        };
        self.spectrum.start_tx_data_frames(self.node, tb, duration, sched)
    }

    /// Close the reception window and hand survivors and SINR to the MAC
    pub fn end_rx_data(
        &mut self,
        now: Duration,
        rng: &mut dyn RngCore,
        mac: &mut dyn MacService,
        upper: &mut dyn MacSapUser,
    ) -> Result<Vec<SinrReport>, LayerError> {
        let outcome = self.spectrum.end_rx_data(now, rng)?;
        for (peer, sinr) in &outcome.sinr {
            mac.sinr_report(*peer, sinr);
        }
        for pdu in outcome.delivered {
            mac.receive_phy_pdu(pdu, upper)?;
        }
        Ok(outcome.reports)
    }

    /// Stop slot ticking and abort any transmission or reception
    pub fn reset(&mut self, sched: &mut dyn Scheduler<PhyEvent>) {
        for event in self.slot_event.take().into_iter().chain(self.send_events.drain(..)) {
            sched.cancel(event);
        }
        self.pending.clear();
        self.spectrum.reset(sched);
    }
}

impl PhyService for SidelinkPhy {
    fn add_transport_block(
        &mut self,
        burst: PacketBurst,
        allocation: SlotAllocation,
    ) -> Result<(), LayerError> {
        self.pending.push_back(PendingTransmission { burst, allocation });
        Ok(())
    }

    fn prepare_for_reception(&mut self, peer: Rnti) -> Result<(), LayerError> {
        let node = self.node_of(peer)?;
        self.spectrum.antenna_mut().change_beamforming_vector(node)
    }
}
