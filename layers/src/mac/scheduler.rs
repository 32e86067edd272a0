//! MAC Scheduler Implementation
//!
//! Round-robin allocation of the symbols of an owned slot across the logical
//! channels with pending data. Every channel gets an equal share of symbols,
//! sized down to what its buffer actually needs.

use super::{MacBuffers, MacSapUser, TxOpportunity};
use crate::packet::PacketBurst;
use crate::LayerError;
use common::Rnti;
use interfaces::Amc;
use tracing::{debug, trace};

/// Physical channel an allocation is meant for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Data,
    /// Never produced by the sidelink scheduler; the PHY rejects it
    Control,
}

/// One scheduled transmission within a slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotAllocation {
    pub destination: Rnti,
    pub lcid: u8,
    pub symbol_start: u8,
    pub num_symbols: u8,
    pub mcs: u8,
    /// Bytes granted to the logical channel
    pub tb_size: u32,
    pub kind: AllocationKind,
}

/// Allocation together with the PDUs it carries
#[derive(Debug, Clone)]
pub struct ScheduledTransmission {
    pub allocation: SlotAllocation,
    pub burst: PacketBurst,
}

/// Round-robin scheduler with a cursor kept across slots
#[derive(Debug, Clone)]
pub struct RoundRobinScheduler {
    symbols_per_slot: u8,
    /// Channel the next slot starts after
    cursor: Option<u8>,
}

impl RoundRobinScheduler {
    pub fn new(symbols_per_slot: u8) -> Self {
        Self {
            symbols_per_slot,
            cursor: None,
        }
    }

    /// Split one slot across the channels of `buffers` that have data
    pub fn schedule(
        &mut self,
        buffers: &mut MacBuffers,
        amc: &dyn Amc,
        mcs_for: &dyn Fn(Rnti) -> u8,
        upper: &mut dyn MacSapUser,
    ) -> Result<Vec<ScheduledTransmission>, LayerError> {
        let active = buffers.active_channels();
        if active.is_empty() {
            trace!("Scheduler: no pending data");
            return Ok(Vec::new());
        }

        let start = self
            .cursor
            .and_then(|cursor| active.iter().position(|&lcid| lcid > cursor))
            .unwrap_or(0);

        let mut remaining = self.symbols_per_slot;
        let mut per_channel = (self.symbols_per_slot / active.len() as u8).max(1);
        let mut symbol_start = 0u8;
        let mut served = Vec::with_capacity(active.len());
        let mut transmissions = Vec::new();

        for i in 0..active.len() {
            if remaining == 0 {
                break;
            }
            let lcid = active[(start + i) % active.len()];
            let Some(report) = buffers.report(lcid).cloned() else {
                continue;
            };
            per_channel = per_channel.min(remaining);

            let mcs = mcs_for(report.destination);
            let budget = amc.tb_size_bytes(mcs, per_channel);
            let assigned = report.total_bytes().min(budget);
            if assigned == 0 {
                debug!(
                    "Scheduler: LCID {} gets no bytes from {} symbols at MCS {}",
                    lcid, per_channel, mcs
                );
                continue;
            }
            let num_symbols = amc.min_symbols_for_size(assigned, mcs).clamp(1, per_channel);

            upper.notify_tx_opportunity(
                TxOpportunity {
                    bytes: assigned,
                    destination: report.destination,
                    lcid,
                },
                buffers,
            )?;
            buffers.debit(lcid, assigned);
            let burst = buffers.take_burst(report.destination, lcid);

            trace!(
                "Scheduler: LCID {} -> {} symbols [{}, +{}) mcs={} bytes={}",
                lcid,
                report.destination,
                symbol_start,
                num_symbols,
                mcs,
                assigned
            );
            transmissions.push(ScheduledTransmission {
                allocation: SlotAllocation {
                    destination: report.destination,
                    lcid,
                    symbol_start,
                    num_symbols,
                    mcs,
                    tb_size: assigned,
                    kind: AllocationKind::Data,
                },
                burst,
            });
            served.push(lcid);
            symbol_start += num_symbols;
            remaining -= num_symbols;
        }

        // Resume after the last served channel when some were left out,
        // otherwise rotate the starting channel by one
        self.cursor = if served.len() < active.len() {
            served.last().copied().or(self.cursor)
        } else {
            served.first().copied()
        };

        Ok(transmissions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::{BufferStatusReport, MacSapProvider};
    use crate::packet::RlcPdu;
    use bytes::Bytes;
    use interfaces::NrAmc;

    /// Upper layer answering every opportunity with one PDU of the granted size
    #[derive(Default)]
    struct Backlogged {
        opportunities: Vec<TxOpportunity>,
    }

    impl MacSapUser for Backlogged {
        fn notify_tx_opportunity(
            &mut self,
            opportunity: TxOpportunity,
            provider: &mut dyn MacSapProvider,
        ) -> Result<(), LayerError> {
            self.opportunities.push(opportunity);
            let pdu = RlcPdu {
                sn: 0,
                offset: 0,
                sdu_len: opportunity.bytes,
                data: Bytes::from(vec![0u8; opportunity.bytes as usize]),
            };
            provider.transmit_pdu(pdu, opportunity.lcid, opportunity.destination)
        }

        fn receive_pdu(&mut self, _: RlcPdu, _: Rnti, _: u8) -> Result<(), LayerError> {
            Ok(())
        }
    }

    fn backlog(buffers: &mut MacBuffers, lcid: u8, destination: Rnti, bytes: u32) {
        buffers
            .report_buffer_status(BufferStatusReport {
                lcid,
                destination,
                status_bytes: 0,
                retx_bytes: 0,
                tx_bytes: bytes,
            })
            .unwrap();
    }

    fn order(transmissions: &[ScheduledTransmission]) -> Vec<u8> {
        transmissions.iter().map(|t| t.allocation.lcid).collect()
    }

    #[test]
    fn test_serving_order_alternates_across_slots() {
        let amc = NrAmc::new(66, 14);
        let mut buffers = MacBuffers::new(Rnti(1));
        let mut upper = Backlogged::default();
        let mut scheduler = RoundRobinScheduler::new(14);

        let mut orders = Vec::new();
        for _ in 0..3 {
            backlog(&mut buffers, 4, Rnti(2), 1_000_000);
            backlog(&mut buffers, 5, Rnti(3), 1_000_000);
            let txs = scheduler.schedule(&mut buffers, &amc, &|_| 0, &mut upper).unwrap();
            assert_eq!(txs.len(), 2);
            assert_eq!(txs[0].allocation.num_symbols, 7);
            assert_eq!(txs[1].allocation.symbol_start, 7);
            orders.push(order(&txs));
        }
        assert_eq!(orders, vec![vec![4, 5], vec![5, 4], vec![4, 5]]);
    }

    #[test]
    fn test_empty_buffers_schedule_nothing() {
        let amc = NrAmc::new(66, 14);
        let mut buffers = MacBuffers::new(Rnti(1));
        let mut upper = Backlogged::default();
        let mut scheduler = RoundRobinScheduler::new(14);
        for _ in 0..2 {
            let txs = scheduler.schedule(&mut buffers, &amc, &|_| 5, &mut upper).unwrap();
            assert!(txs.is_empty());
        }
        assert!(upper.opportunities.is_empty());
    }

    #[test]
    fn test_grant_sized_to_backlog() {
        let amc = NrAmc::new(66, 14);
        let mut buffers = MacBuffers::new(Rnti(1));
        let mut upper = Backlogged::default();
        let mut scheduler = RoundRobinScheduler::new(14);
        backlog(&mut buffers, 4, Rnti(2), 30);

        let txs = scheduler.schedule(&mut buffers, &amc, &|_| 0, &mut upper).unwrap();
        assert_eq!(txs.len(), 1);
        let allocation = &txs[0].allocation;
        assert_eq!(allocation.tb_size, 30);
        assert_eq!(allocation.num_symbols, amc.min_symbols_for_size(30, 0));
        assert_eq!(allocation.kind, AllocationKind::Data);
        assert_eq!(txs[0].burst.size_bytes(), 30);
        assert_eq!(upper.opportunities[0].bytes, 30);
        // Drained entry is gone
        assert!(buffers.active_channels().is_empty());
    }

    #[test]
    fn test_debit_priority_status_then_retx_then_tx() {
        let mut buffers = MacBuffers::new(Rnti(1));
        buffers
            .report_buffer_status(BufferStatusReport {
                lcid: 4,
                destination: Rnti(2),
                status_bytes: 10,
                retx_bytes: 20,
                tx_bytes: 30,
            })
            .unwrap();
        buffers.debit(4, 25);
        let report = buffers.report(4).unwrap();
        assert_eq!((report.status_bytes, report.retx_bytes, report.tx_bytes), (0, 5, 30));
        buffers.debit(4, 35);
        assert!(buffers.report(4).is_none());
    }

    #[test]
    fn test_more_channels_than_symbols() {
        let amc = NrAmc::new(66, 14);
        let mut buffers = MacBuffers::new(Rnti(1));
        let mut upper = Backlogged::default();
        let mut scheduler = RoundRobinScheduler::new(14);
        for lcid in 1..=20u8 {
            backlog(&mut buffers, lcid, Rnti(2), 1_000_000);
        }

        let first = scheduler.schedule(&mut buffers, &amc, &|_| 0, &mut upper).unwrap();
        assert_eq!(order(&first), (1..=14).collect::<Vec<u8>>());
        assert!(first.iter().all(|t| t.allocation.num_symbols == 1));

        let second = scheduler.schedule(&mut buffers, &amc, &|_| 0, &mut upper).unwrap();
        assert_eq!(order(&second)[..6], [15, 16, 17, 18, 19, 20]);
    }

    #[test]
    fn test_zero_byte_share_is_skipped() {
        // One RB: seven symbols carry nothing at MCS 0
        let amc = NrAmc::new(1, 14);
        let mut buffers = MacBuffers::new(Rnti(1));
        let mut upper = Backlogged::default();
        let mut scheduler = RoundRobinScheduler::new(14);
        let mcs_for = |rnti: Rnti| if rnti == Rnti(2) { 28 } else { 0 };
        assert_eq!(amc.tb_size_bytes(0, 7), 0);

        for _ in 0..2 {
            backlog(&mut buffers, 4, Rnti(2), 1_000_000);
            backlog(&mut buffers, 5, Rnti(3), 500);
            let txs = scheduler.schedule(&mut buffers, &amc, &mcs_for, &mut upper).unwrap();
            assert_eq!(order(&txs), vec![4]);
            assert_eq!(txs[0].allocation.symbol_start, 0);
            assert_eq!(txs[0].allocation.num_symbols, 7);
            assert_eq!(buffers.report(5).unwrap().total_bytes(), 500);
        }
        assert!(upper.opportunities.iter().all(|o| o.lcid == 4));
    }
}
