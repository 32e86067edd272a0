//! Medium Access Control (MAC) Layer Implementation
//!
//! Sidelink MAC driven by slot indications from the PHY. The allocation
//! pattern decides, per slot, whether this device transmits, prepares to
//! receive from a peer or stays idle. Owned slots are split across logical
//! channels by the round-robin scheduler.

pub mod pattern;
pub mod scheduler;

use crate::packet::{MacPdu, PacketBurst, RlcPdu, SlMacTag};
use crate::phy::frame_structure::FrameTiming;
use crate::phy::spectrum::SpectrumValue;
use crate::phy::PhyService;
use crate::trace::SchedulingTrace;
use crate::LayerError;
use common::{Rnti, SfnSf};
use interfaces::Amc;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace};

pub use pattern::{AllocationPattern, PatternPolicy};
pub use scheduler::{AllocationKind, RoundRobinScheduler, ScheduledTransmission, SlotAllocation};

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Select the MCS from the peer's latest CQI instead of `fixed_mcs`
    pub amc_enabled: bool,
    pub fixed_mcs: u8,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            amc_enabled: false,
            fixed_mcs: 0,
        }
    }
}

/// Backlog of one logical channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferStatusReport {
    pub lcid: u8,
    pub destination: Rnti,
    pub status_bytes: u32,
    pub retx_bytes: u32,
    pub tx_bytes: u32,
}

impl BufferStatusReport {
    pub fn total_bytes(&self) -> u32 {
        self.status_bytes + self.retx_bytes + self.tx_bytes
    }
}

/// Grant handed to an upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOpportunity {
    pub bytes: u32,
    pub destination: Rnti,
    pub lcid: u8,
}

/// Services the MAC offers to the RLC
pub trait MacSapProvider {
    fn transmit_pdu(&mut self, pdu: RlcPdu, lcid: u8, destination: Rnti) -> Result<(), LayerError>;

    fn report_buffer_status(&mut self, report: BufferStatusReport) -> Result<(), LayerError>;
}

/// Callbacks the MAC makes into the RLC
pub trait MacSapUser {
    fn notify_tx_opportunity(
        &mut self,
        opportunity: TxOpportunity,
        provider: &mut dyn MacSapProvider,
    ) -> Result<(), LayerError>;

    fn receive_pdu(&mut self, pdu: RlcPdu, source: Rnti, lcid: u8) -> Result<(), LayerError>;
}

/// Services the MAC offers to the PHY
pub trait MacService {
    /// Start of a slot: decide TX, RX preparation or idle
    fn slot_indication(
        &mut self,
        sfn: SfnSf,
        phy: &mut dyn PhyService,
        upper: &mut dyn MacSapUser,
    ) -> Result<(), LayerError>;

    /// A PDU addressed to this device survived decoding
    fn receive_phy_pdu(&mut self, pdu: MacPdu, upper: &mut dyn MacSapUser) -> Result<(), LayerError>;

    /// Per-band linear SINR of a reception from `peer`
    fn sinr_report(&mut self, peer: Rnti, sinr: &SpectrumValue);
}

/// Buffer status reports and per-destination transmit buffers
#[derive(Debug)]
pub struct MacBuffers {
    rnti: Rnti,
    bsr: BTreeMap<u8, BufferStatusReport>,
    tx_buffers: HashMap<Rnti, VecDeque<MacPdu>>,
}

impl MacBuffers {
    pub fn new(rnti: Rnti) -> Self {
        Self {
            rnti,
            bsr: BTreeMap::new(),
            tx_buffers: HashMap::new(),
        }
    }

    pub fn report(&self, lcid: u8) -> Option<&BufferStatusReport> {
        self.bsr.get(&lcid)
    }

    /// Channels with a non-empty report, in LCID order
    pub fn active_channels(&self) -> Vec<u8> {
        self.bsr
            .iter()
            .filter(|(_, report)| report.total_bytes() > 0)
            .map(|(&lcid, _)| lcid)
            .collect()
    }

    /// Debit `bytes` from status, then retransmission, then new data
    pub fn debit(&mut self, lcid: u8, bytes: u32) {
        let Some(report) = self.bsr.get_mut(&lcid) else {
            return;
        };
        let mut left = bytes;
        for queue in [
            &mut report.status_bytes,
            &mut report.retx_bytes,
            &mut report.tx_bytes,
        ] {
            let taken = left.min(*queue);
            *queue -= taken;
            left -= taken;
        }
        if report.total_bytes() == 0 {
            self.bsr.remove(&lcid);
        }
    }

    /// PDUs of `lcid` queued for `destination`, in FIFO order, as one burst
    pub fn take_burst(&mut self, destination: Rnti, lcid: u8) -> PacketBurst {
        let Some(queue) = self.tx_buffers.get_mut(&destination) else {
            return PacketBurst::new();
        };
        let (taken, kept): (VecDeque<MacPdu>, VecDeque<MacPdu>) =
            queue.drain(..).partition(|pdu| pdu.tag.lcid == lcid);
        *queue = kept;
        PacketBurst::from(Vec::from(taken))
    }

    pub fn pending_pdus(&self, destination: Rnti) -> usize {
        self.tx_buffers.get(&destination).map_or(0, VecDeque::len)
    }
}

impl MacSapProvider for MacBuffers {
    fn transmit_pdu(&mut self, pdu: RlcPdu, lcid: u8, destination: Rnti) -> Result<(), LayerError> {
        let tag = SlMacTag {
            source: self.rnti,
            destination,
            lcid,
        };
        self.tx_buffers
            .entry(destination)
            .or_default()
            .push_back(MacPdu { tag, rlc: pdu });
        Ok(())
    }

    fn report_buffer_status(&mut self, report: BufferStatusReport) -> Result<(), LayerError> {
        trace!(
            "MAC: BSR lcid={} dest={} bytes={}",
            report.lcid,
            report.destination,
            report.total_bytes()
        );
        self.bsr.insert(report.lcid, report);
        Ok(())
    }
}

/// Sidelink MAC of one device
pub struct SidelinkMac {
    config: MacConfig,
    timing: Arc<FrameTiming>,
    amc: Box<dyn Amc>,
    rnti: Option<Rnti>,
    pattern: Option<AllocationPattern>,
    buffers: MacBuffers,
    logical_channels: BTreeSet<u8>,
    scheduler: RoundRobinScheduler,
    cqi_history: HashMap<Rnti, Vec<u8>>,
    traces: Vec<SchedulingTrace>,
}

impl SidelinkMac {
    pub fn new(config: MacConfig, timing: Arc<FrameTiming>, amc: Box<dyn Amc>) -> Self {
        let scheduler = RoundRobinScheduler::new(timing.symbols_per_slot());
        Self {
            config,
            timing,
            amc,
            rnti: None,
            pattern: None,
            buffers: MacBuffers::new(Rnti(0)),
            logical_channels: BTreeSet::new(),
            scheduler,
            cqi_history: HashMap::new(),
            traces: Vec::new(),
        }
    }

    pub fn rnti(&self) -> Option<Rnti> {
        self.rnti
    }

    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.rnti = Some(rnti);
        self.buffers.rnti = rnti;
    }

    pub fn set_pattern(&mut self, pattern: AllocationPattern) -> Result<(), LayerError> {
        let expected = self.timing.slots_per_subframe() as usize;
        if pattern.len() != expected {
            return Err(LayerError::InvalidConfiguration(format!(
                "Allocation pattern has {} slots, subframe has {}",
                pattern.len(),
                expected
            )));
        }
        info!("MAC {:?}: allocation pattern {:?}", self.rnti, pattern.slots());
        self.pattern = Some(pattern);
        Ok(())
    }

    pub fn pattern(&self) -> Option<&AllocationPattern> {
        self.pattern.as_ref()
    }

    pub fn add_logical_channel(&mut self, lcid: u8) {
        self.logical_channels.insert(lcid);
    }

    /// Provider handle for the RLC entities of this device
    pub fn sap_provider(&mut self) -> &mut MacBuffers {
        &mut self.buffers
    }

    pub fn cqi_history(&self, peer: Rnti) -> &[u8] {
        self.cqi_history.get(&peer).map_or(&[], Vec::as_slice)
    }

    /// Append the CQI of a reception from `peer`
    pub fn record_sinr(&mut self, peer: Rnti, sinr: &[f64]) {
        let cqi = self.amc.cqi_from_sinr(sinr);
        trace!("MAC {:?}: CQI {} from {}", self.rnti, cqi, peer);
        self.cqi_history.entry(peer).or_default().push(cqi);
    }

    /// MCS towards `destination`
    pub fn select_mcs(&self, destination: Rnti) -> u8 {
        select_mcs(&self.config, &self.cqi_history, self.amc.as_ref(), destination)
    }

    /// Scheduling decisions taken since the last call
    pub fn take_traces(&mut self) -> Vec<SchedulingTrace> {
        std::mem::take(&mut self.traces)
    }

    /// Allocate the symbols of an owned slot
    pub fn schedule_resources(
        &mut self,
        sfn: SfnSf,
        upper: &mut dyn MacSapUser,
    ) -> Result<Vec<ScheduledTransmission>, LayerError> {
        let rnti = self
            .rnti
            .ok_or_else(|| LayerError::NotInitialized("MAC RNTI".into()))?;
        let (config, history, amc) = (&self.config, &self.cqi_history, self.amc.as_ref());
        let mcs_for = |destination| select_mcs(config, history, amc, destination);
        let transmissions = self
            .scheduler
            .schedule(&mut self.buffers, amc, &mcs_for, upper)?;

        for tx in &transmissions {
            let allocation = &tx.allocation;
            debug!(
                "MAC {}: frame={} subframe={} slot={} -> {} symbols [{}..{}) mcs={} tb_size={}",
                rnti,
                sfn.frame,
                sfn.subframe,
                sfn.slot,
                allocation.destination,
                allocation.symbol_start,
                allocation.symbol_start + allocation.num_symbols,
                allocation.mcs,
                allocation.tb_size
            );
            self.traces.push(SchedulingTrace {
                frame: sfn.frame,
                subframe: sfn.subframe,
                slot: sfn.slot,
                symbol_start: allocation.symbol_start,
                num_symbols: allocation.num_symbols,
                mcs: allocation.mcs,
                tb_size: allocation.tb_size,
                tx_rnti: rnti,
                rx_rnti: allocation.destination,
            });
        }
        Ok(transmissions)
    }
}

fn select_mcs(
    config: &MacConfig,
    history: &HashMap<Rnti, Vec<u8>>,
    amc: &dyn Amc,
    destination: Rnti,
) -> u8 {
    if !config.amc_enabled {
        return config.fixed_mcs;
    }
    history
        .get(&destination)
        .and_then(|cqis| cqis.last())
        .map_or(0, |&cqi| amc.mcs_from_cqi(cqi))
}

impl MacService for SidelinkMac {
    fn slot_indication(
        &mut self,
        sfn: SfnSf,
        phy: &mut dyn PhyService,
        upper: &mut dyn MacSapUser,
    ) -> Result<(), LayerError> {
        let rnti = self
            .rnti
            .ok_or_else(|| LayerError::NotInitialized("MAC RNTI".into()))?;
        let owner = self
            .pattern
            .as_ref()
            .ok_or_else(|| LayerError::NotInitialized("MAC allocation pattern".into()))?
            .owner(sfn.slot);

        match owner {
            Some(owner) if owner == rnti => {
                for tx in self.schedule_resources(sfn, upper)? {
                    if tx.burst.is_empty() {
                        trace!("MAC {}: nothing queued for {}", rnti, tx.allocation.destination);
                        continue;
                    }
                    phy.add_transport_block(tx.burst, tx.allocation)?;
                }
            }
            Some(peer) => phy.prepare_for_reception(peer)?,
            None => trace!("MAC {}: slot {} unassigned", rnti, sfn),
        }
        Ok(())
    }

    fn receive_phy_pdu(&mut self, pdu: MacPdu, upper: &mut dyn MacSapUser) -> Result<(), LayerError> {
        let lcid = pdu.tag.lcid;
        if !self.logical_channels.contains(&lcid) {
            return Err(LayerError::UnknownLogicalChannel(lcid));
        }
        upper.receive_pdu(pdu.rlc, pdu.tag.source, lcid)
    }

    fn sinr_report(&mut self, peer: Rnti, sinr: &SpectrumValue) {
        self.record_sinr(peer, sinr.values());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::frame_structure::FrameTimingBuilder;
    use bytes::Bytes;
    use interfaces::NrAmc;

    #[derive(Default)]
    struct RecordingPhy {
        blocks: Vec<(PacketBurst, SlotAllocation)>,
        prepared: Vec<Rnti>,
    }

    impl PhyService for RecordingPhy {
        fn add_transport_block(
            &mut self,
            burst: PacketBurst,
            allocation: SlotAllocation,
        ) -> Result<(), LayerError> {
            self.blocks.push((burst, allocation));
            Ok(())
        }

        fn prepare_for_reception(&mut self, peer: Rnti) -> Result<(), LayerError> {
            self.prepared.push(peer);
            Ok(())
        }
    }

    /// Upper layer that fills each opportunity and records receptions
    #[derive(Default)]
    struct FillingUpper {
        received: Vec<(RlcPdu, Rnti, u8)>,
    }

    impl MacSapUser for FillingUpper {
        fn notify_tx_opportunity(
            &mut self,
            opportunity: TxOpportunity,
            provider: &mut dyn MacSapProvider,
        ) -> Result<(), LayerError> {
            let pdu = RlcPdu {
                sn: 0,
                offset: 0,
                sdu_len: opportunity.bytes,
                data: Bytes::from(vec![1u8; opportunity.bytes as usize]),
            };
            provider.transmit_pdu(pdu, opportunity.lcid, opportunity.destination)
        }

        fn receive_pdu(&mut self, pdu: RlcPdu, source: Rnti, lcid: u8) -> Result<(), LayerError> {
            self.received.push((pdu, source, lcid));
            Ok(())
        }
    }

    fn timing() -> Arc<FrameTiming> {
        Arc::new(
            FrameTimingBuilder::new()
                .set_bandwidth(100e6)
                .unwrap()
                .set_center_frequency(28e9)
                .unwrap()
                .set_numerology(2)
                .unwrap()
                .build()
                .unwrap(),
        )
    }

    fn mac(config: MacConfig) -> SidelinkMac {
        let timing = timing();
        let amc = NrAmc::new(timing.num_rb(), timing.symbols_per_slot());
        let mut mac = SidelinkMac::new(config, timing, Box::new(amc));
        mac.set_rnti(Rnti(1));
        mac.set_pattern(AllocationPattern::from_slots(vec![
            Some(Rnti(1)),
            Some(Rnti(2)),
            None,
            None,
        ]))
        .unwrap();
        mac.add_logical_channel(4);
        mac
    }

    fn queue(mac: &mut SidelinkMac, bytes: u32) {
        mac.sap_provider()
            .report_buffer_status(BufferStatusReport {
                lcid: 4,
                destination: Rnti(2),
                status_bytes: 0,
                retx_bytes: 0,
                tx_bytes: bytes,
            })
            .unwrap();
    }

    #[test]
    fn test_slot_dispatch() {
        let mut mac = mac(MacConfig::default());
        let mut phy = RecordingPhy::default();
        let mut upper = FillingUpper::default();
        queue(&mut mac, 500);

        mac.slot_indication(SfnSf::new(0, 0, 1), &mut phy, &mut upper).unwrap();
        assert_eq!(phy.prepared, vec![Rnti(2)]);
        assert!(phy.blocks.is_empty());

        mac.slot_indication(SfnSf::new(0, 0, 2), &mut phy, &mut upper).unwrap();
        assert_eq!(phy.prepared.len(), 1);

        mac.slot_indication(SfnSf::new(0, 0, 0), &mut phy, &mut upper).unwrap();
        assert_eq!(phy.blocks.len(), 1);
        let (burst, allocation) = &phy.blocks[0];
        assert_eq!(burst.size_bytes(), 500);
        assert_eq!(burst.pdus()[0].tag.source, Rnti(1));
        assert_eq!(allocation.destination, Rnti(2));

        let traces = mac.take_traces();
        assert_eq!(traces.len(), 1);
        assert_eq!((traces[0].tx_rnti, traces[0].rx_rnti), (Rnti(1), Rnti(2)));
        assert!(mac.take_traces().is_empty());
    }

    #[test]
    fn test_fixed_mcs_ignores_sinr() {
        let config = MacConfig { amc_enabled: false, fixed_mcs: 17 };
        let mut mac = mac(config);
        let mut phy = RecordingPhy::default();
        let mut upper = FillingUpper::default();
        for (i, sinr) in [1e-3, 1.0, 1e4].into_iter().enumerate() {
            mac.record_sinr(Rnti(2), &[sinr; 8]);
            queue(&mut mac, 1000);
            mac.slot_indication(SfnSf::new(i as u32, 0, 0), &mut phy, &mut upper).unwrap();
        }
        assert_eq!(mac.cqi_history(Rnti(2)).len(), 3);
        assert!(phy.blocks.iter().all(|(_, allocation)| allocation.mcs == 17));
    }

    #[test]
    fn test_amc_follows_latest_cqi() {
        let mut mac = mac(MacConfig { amc_enabled: true, fixed_mcs: 17 });
        assert_eq!(mac.select_mcs(Rnti(2)), 0);
        mac.record_sinr(Rnti(2), &[1e6; 8]);
        assert_eq!(mac.select_mcs(Rnti(2)), interfaces::amc::MAX_MCS);
        mac.record_sinr(Rnti(2), &[1e-6; 8]);
        assert_eq!(mac.select_mcs(Rnti(2)), 0);
    }

    #[test]
    fn test_not_initialized() {
        let timing = timing();
        let amc = NrAmc::new(timing.num_rb(), timing.symbols_per_slot());
        let mut mac = SidelinkMac::new(MacConfig::default(), timing, Box::new(amc));
        let mut phy = RecordingPhy::default();
        let mut upper = FillingUpper::default();
        let sfn = SfnSf::default();
        assert!(matches!(
            mac.slot_indication(sfn, &mut phy, &mut upper),
            Err(LayerError::NotInitialized(_))
        ));
        mac.set_rnti(Rnti(1));
        assert!(matches!(
            mac.slot_indication(sfn, &mut phy, &mut upper),
            Err(LayerError::NotInitialized(_))
        ));
    }

    #[test]
    fn test_pattern_length_must_match() {
        let mut mac = mac(MacConfig::default());
        let pattern = AllocationPattern::from_slots(vec![Some(Rnti(1)); 8]);
        assert!(matches!(
            mac.set_pattern(pattern),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_receive_checks_logical_channel() {
        let mut mac = mac(MacConfig::default());
        let mut upper = FillingUpper::default();
        let pdu = |lcid| MacPdu {
            tag: SlMacTag { source: Rnti(2), destination: Rnti(1), lcid },
            rlc: RlcPdu { sn: 0, offset: 0, sdu_len: 3, data: Bytes::from_static(b"abc") },
        };
        mac.receive_phy_pdu(pdu(4), &mut upper).unwrap();
        assert_eq!(upper.received.len(), 1);
        assert_eq!(
            mac.receive_phy_pdu(pdu(9), &mut upper),
            Err(LayerError::UnknownLogicalChannel(9))
        );
    }

    #[test]
    fn test_burst_takes_only_allocated_channel() {
        let mut buffers = MacBuffers::new(Rnti(1));
        let pdu = |sn| RlcPdu { sn, offset: 0, sdu_len: 10, data: Bytes::from(vec![0u8; 10]) };
        buffers.transmit_pdu(pdu(0), 1, Rnti(2)).unwrap();
        buffers.transmit_pdu(pdu(0), 2, Rnti(2)).unwrap();
        buffers.transmit_pdu(pdu(1), 1, Rnti(2)).unwrap();

        let burst = buffers.take_burst(Rnti(2), 1);
        let sns: Vec<(u8, u32)> = burst.pdus().iter().map(|pdu| (pdu.tag.lcid, pdu.rlc.sn)).collect();
        assert_eq!(sns, vec![(1, 0), (1, 1)]);
        assert_eq!(buffers.pending_pdus(Rnti(2)), 1);

        assert_eq!(buffers.take_burst(Rnti(2), 2).len(), 1);
        assert!(buffers.take_burst(Rnti(2), 2).is_empty());
        assert!(buffers.take_burst(Rnti(3), 1).is_empty());
    }
}
