//! Radio Link Control (RLC) Layer Implementation
//!
//! Unacknowledged mode bearers sitting on top of the sidelink MAC. Each bearer
//! serves one ordered (source, destination) pair: it queues SDUs, reports its
//! backlog to the MAC, segments exactly to the byte budget of each transmit
//! opportunity and reassembles in-order segments on the receiving side.

use crate::mac::{BufferStatusReport, MacSapProvider, MacSapUser, TxOpportunity};
use crate::packet::RlcPdu;
use crate::LayerError;
use bytes::{Bytes, BytesMut};
use common::Rnti;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace, warn};

/// RLC bearer configuration
#[derive(Debug, Clone)]
pub struct RlcConfig {
    /// Transmission buffer limit in bytes; SDUs beyond it are dropped
    pub max_tx_buffer_bytes: u32,
}

impl Default for RlcConfig {
    fn default() -> Self {
        Self {
            max_tx_buffer_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug)]
struct Reassembly {
    sn: u32,
    sdu_len: u32,
    buffer: BytesMut,
}

/// Unacknowledged mode RLC entity
#[derive(Debug)]
pub struct RlcUmEntity {
    config: RlcConfig,
    lcid: u8,
    /// Peer this bearer transmits to
    destination: Rnti,
    next_sn: u32,
    tx_queue: VecDeque<(u32, Bytes)>,
    /// Bytes of the head SDU already segmented
    head_offset: u32,
    rx: Option<Reassembly>,
    delivered: Vec<(Rnti, Bytes)>,
    dropped_sdus: u64,
    discarded_segments: u64,
}

impl RlcUmEntity {
    pub fn new(config: RlcConfig, lcid: u8, destination: Rnti) -> Self {
        Self {
            config,
            lcid,
            destination,
            next_sn: 0,
            tx_queue: VecDeque::new(),
            head_offset: 0,
            rx: None,
            delivered: Vec::new(),
            dropped_sdus: 0,
            discarded_segments: 0,
        }
    }

    pub fn lcid(&self) -> u8 {
        self.lcid
    }

    pub fn destination(&self) -> Rnti {
        self.destination
    }

    /// Bytes still waiting for a transmit opportunity
    pub fn tx_buffer_bytes(&self) -> u32 {
        let queued: u32 = self.tx_queue.iter().map(|(_, sdu)| sdu.len() as u32).sum();
        queued - self.head_offset
    }

    pub fn dropped_sdus(&self) -> u64 {
        self.dropped_sdus
    }

    pub fn discarded_segments(&self) -> u64 {
        self.discarded_segments
    }

    /// Queue an SDU and report the new backlog; returns false if it was dropped
    pub fn send_sdu(
        &mut self,
        sdu: Bytes,
        provider: &mut dyn MacSapProvider,
    ) -> Result<bool, LayerError> {
        if sdu.is_empty() {
            return Err(LayerError::InvalidState("Empty RLC SDU".into()));
        }
        let backlog = self.tx_buffer_bytes();
        if backlog + sdu.len() as u32 > self.config.max_tx_buffer_bytes {
            warn!(
                "RLC LCID {}: tx buffer full ({} bytes), dropping {} byte SDU",
                self.lcid,
                backlog,
                sdu.len()
            );
            self.dropped_sdus += 1;
            return Ok(false);
        }

        let sn = self.next_sn;
        self.next_sn = self.next_sn.wrapping_add(1);
        trace!("RLC LCID {}: queued SDU sn={} ({} bytes)", self.lcid, sn, sdu.len());
        self.tx_queue.push_back((sn, sdu));

        provider.report_buffer_status(BufferStatusReport {
            lcid: self.lcid,
            destination: self.destination,
            status_bytes: 0,
            retx_bytes: 0,
            tx_bytes: self.tx_buffer_bytes(),
        })?;
        Ok(true)
    }

    /// Fill a transmit opportunity with segments of the queued SDUs
    pub fn notify_tx_opportunity(
        &mut self,
        opportunity: TxOpportunity,
        provider: &mut dyn MacSapProvider,
    ) -> Result<(), LayerError> {
        let mut budget = opportunity.bytes;
        while budget > 0 {
            let Some((sn, sdu)) = self.tx_queue.front() else {
                break;
            };
            let sdu_len = sdu.len() as u32;
            let take = budget.min(sdu_len - self.head_offset);
            let data = sdu.slice(self.head_offset as usize..(self.head_offset + take) as usize);
            let pdu = RlcPdu {
                sn: *sn,
                offset: self.head_offset,
                sdu_len,
                data,
            };
            trace!(
                "RLC LCID {}: segment sn={} offset={} len={}",
                self.lcid,
                pdu.sn,
                pdu.offset,
                take
            );
            provider.transmit_pdu(pdu, self.lcid, opportunity.destination)?;

            budget -= take;
            self.head_offset += take;
            if self.head_offset == sdu_len {
                self.tx_queue.pop_front();
                self.head_offset = 0;
            }
        }
        if budget > 0 {
            debug!("RLC LCID {}: {} bytes of opportunity unused", self.lcid, budget);
        }
        Ok(())
    }

    /// Reassemble a received segment, discarding the partial SDU on any gap
    pub fn receive_pdu(&mut self, pdu: RlcPdu, source: Rnti) {
        let continues = self
            .rx
            .as_ref()
            .is_some_and(|rx| rx.sn == pdu.sn && rx.buffer.len() as u32 == pdu.offset);
        if !continues {
            if let Some(partial) = self.rx.take() {
                debug!(
                    "RLC LCID {}: gap before sn={} offset={}, discarding partial SDU sn={}",
                    self.lcid, pdu.sn, pdu.offset, partial.sn
                );
                self.discarded_segments += 1;
            }
            if pdu.offset != 0 {
                self.discarded_segments += 1;
                return;
            }
            self.rx = Some(Reassembly {
                sn: pdu.sn,
                sdu_len: pdu.sdu_len,
                buffer: BytesMut::with_capacity(pdu.sdu_len as usize),
            });
        }

        if let Some(rx) = self.rx.as_mut() {
            rx.buffer.extend_from_slice(&pdu.data);
            if rx.buffer.len() as u32 >= rx.sdu_len {
                let sdu = std::mem::take(&mut rx.buffer).freeze();
                trace!("RLC LCID {}: delivered SDU sn={} ({} bytes)", self.lcid, rx.sn, sdu.len());
                self.delivered.push((source, sdu));
                self.rx = None;
            }
        }
    }

    /// Complete SDUs received since the last call, with their source
    pub fn take_delivered(&mut self) -> Vec<(Rnti, Bytes)> {
        std::mem::take(&mut self.delivered)
    }
}

/// Bearers of one device, keyed by logical channel
#[derive(Debug, Default)]
pub struct Bearers {
    entities: BTreeMap<u8, RlcUmEntity>,
}

impl Bearers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: RlcUmEntity) {
        self.entities.insert(entity.lcid(), entity);
    }

    pub fn get_mut(&mut self, lcid: u8) -> Option<&mut RlcUmEntity> {
        self.entities.get_mut(&lcid)
    }

    /// Bearer transmitting towards `destination`
    pub fn towards(&mut self, destination: Rnti) -> Option<&mut RlcUmEntity> {
        self.entities
            .values_mut()
            .find(|entity| entity.destination() == destination)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RlcUmEntity> {
        self.entities.values_mut()
    }
}

impl MacSapUser for Bearers {
    fn notify_tx_opportunity(
        &mut self,
        opportunity: TxOpportunity,
        provider: &mut dyn MacSapProvider,
    ) -> Result<(), LayerError> {
        self.entities
            .get_mut(&opportunity.lcid)
            .ok_or(LayerError::UnknownLogicalChannel(opportunity.lcid))?
            .notify_tx_opportunity(opportunity, provider)
    }

    fn receive_pdu(&mut self, pdu: RlcPdu, source: Rnti, lcid: u8) -> Result<(), LayerError> {
        self.entities
            .get_mut(&lcid)
            .ok_or(LayerError::UnknownLogicalChannel(lcid))?
            .receive_pdu(pdu, source);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        reports: Vec<BufferStatusReport>,
        pdus: Vec<(RlcPdu, u8, Rnti)>,
    }

    impl MacSapProvider for Recorder {
        fn transmit_pdu(&mut self, pdu: RlcPdu, lcid: u8, destination: Rnti) -> Result<(), LayerError> {
            self.pdus.push((pdu, lcid, destination));
            Ok(())
        }

        fn report_buffer_status(&mut self, report: BufferStatusReport) -> Result<(), LayerError> {
            self.reports.push(report);
            Ok(())
        }
    }

    fn opportunity(bytes: u32) -> TxOpportunity {
        TxOpportunity { bytes, destination: Rnti(2), lcid: 4 }
    }

    #[test]
    fn test_report_on_new_sdu() {
        let mut mac = Recorder::default();
        let mut rlc = RlcUmEntity::new(RlcConfig::default(), 4, Rnti(2));
        assert!(rlc.send_sdu(Bytes::from(vec![1u8; 100]), &mut mac).unwrap());
        assert!(rlc.send_sdu(Bytes::from(vec![2u8; 50]), &mut mac).unwrap());
        assert_eq!(mac.reports.len(), 2);
        assert_eq!(mac.reports[1].tx_bytes, 150);
        assert_eq!(mac.reports[1].destination, Rnti(2));
    }

    #[test]
    fn test_segments_to_exact_budget() {
        let mut mac = Recorder::default();
        let mut rlc = RlcUmEntity::new(RlcConfig::default(), 4, Rnti(2));
        rlc.send_sdu(Bytes::from(vec![1u8; 100]), &mut mac).unwrap();
        rlc.send_sdu(Bytes::from(vec![2u8; 50]), &mut mac).unwrap();

        rlc.notify_tx_opportunity(opportunity(120), &mut mac).unwrap();
        let sizes: Vec<u32> = mac.pdus.iter().map(|(pdu, _, _)| pdu.size()).collect();
        assert_eq!(sizes, vec![100, 20]);
        assert_eq!(rlc.tx_buffer_bytes(), 30);

        rlc.notify_tx_opportunity(opportunity(500), &mut mac).unwrap();
        let last = &mac.pdus.last().unwrap().0;
        assert_eq!((last.sn, last.offset, last.size()), (1, 20, 30));
        assert!(last.is_last_segment());
        assert_eq!(rlc.tx_buffer_bytes(), 0);
    }

    #[test]
    fn test_reassembly_and_gap_discard() {
        let mut mac = Recorder::default();
        let mut tx = RlcUmEntity::new(RlcConfig::default(), 4, Rnti(2));
        let mut rx = RlcUmEntity::new(RlcConfig::default(), 4, Rnti(1));
        tx.send_sdu(Bytes::from(vec![7u8; 60]), &mut mac).unwrap();
        tx.send_sdu(Bytes::from(vec![8u8; 60]), &mut mac).unwrap();
        tx.notify_tx_opportunity(opportunity(30), &mut mac).unwrap();
        tx.notify_tx_opportunity(opportunity(90), &mut mac).unwrap();

        // Segments: sn0[0..30], sn0[30..60], sn1[0..60]
        let mut pdus = mac.pdus.into_iter().map(|(pdu, _, _)| pdu);
        let first = pdus.next().unwrap();
        let _lost = pdus.next().unwrap();
        let third = pdus.next().unwrap();

        rx.receive_pdu(first, Rnti(1));
        rx.receive_pdu(third, Rnti(1));
        let delivered = rx.take_delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1, Bytes::from(vec![8u8; 60]));
        assert_eq!(rx.discarded_segments(), 1);
    }

    #[test]
    fn test_buffer_limit_drops() {
        let mut mac = Recorder::default();
        let config = RlcConfig { max_tx_buffer_bytes: 100 };
        let mut rlc = RlcUmEntity::new(config, 4, Rnti(2));
        assert!(rlc.send_sdu(Bytes::from(vec![0u8; 80]), &mut mac).unwrap());
        assert!(!rlc.send_sdu(Bytes::from(vec![0u8; 40]), &mut mac).unwrap());
        assert_eq!(rlc.dropped_sdus(), 1);
        assert_eq!(mac.reports.len(), 1);
    }

    #[test]
    fn test_bearers_dispatch_by_lcid() {
        let mut mac = Recorder::default();
        let mut bearers = Bearers::new();
        bearers.insert(RlcUmEntity::new(RlcConfig::default(), 4, Rnti(2)));
        assert_eq!(
            bearers.notify_tx_opportunity(TxOpportunity { bytes: 10, destination: Rnti(2), lcid: 9 }, &mut mac),
            Err(LayerError::UnknownLogicalChannel(9))
        );
        assert!(bearers.towards(Rnti(2)).is_some());
        assert!(bearers.towards(Rnti(3)).is_none());
    }
}
