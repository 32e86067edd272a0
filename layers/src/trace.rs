//! Trace records and sinks
//!
//! Layers produce plain records; the simulation session fans them out to
//! whatever sinks were connected (log files, statistics, tests).

use common::Rnti;
use serde::Serialize;

/// One scheduling decision of a sidelink MAC
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulingTrace {
    pub frame: u32,
    pub subframe: u8,
    pub slot: u8,
    pub symbol_start: u8,
    pub num_symbols: u8,
    pub mcs: u8,
    pub tb_size: u32,
    pub tx_rnti: Rnti,
    pub rx_rnti: Rnti,
}

/// SINR and outcome of one received transport block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinrReport {
    pub time_ns: u64,
    /// Receiving device
    pub rnti: Rnti,
    /// Transmitting device
    pub peer: Rnti,
    pub avg_sinr_db: f64,
    pub num_symbols: u8,
    pub tb_size: u32,
    pub mcs: u8,
    pub corrupted: bool,
}

/// Application-level packet delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketTrace {
    pub time_ns: u64,
    pub source: Rnti,
    pub destination: Rnti,
    pub size: u32,
}

type Sink<T> = Box<dyn FnMut(&T)>;

/// Connected trace callbacks
#[derive(Default)]
pub struct TraceSinks {
    scheduling: Vec<Sink<SchedulingTrace>>,
    sinr: Vec<Sink<SinrReport>>,
    tx_packet: Vec<Sink<PacketTrace>>,
    rx_packet: Vec<Sink<PacketTrace>>,
}

impl TraceSinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_scheduling(&mut self, sink: impl FnMut(&SchedulingTrace) + 'static) {
        self.scheduling.push(Box::new(sink));
    }

    pub fn connect_sinr(&mut self, sink: impl FnMut(&SinrReport) + 'static) {
        self.sinr.push(Box::new(sink));
    }

    pub fn connect_tx_packet(&mut self, sink: impl FnMut(&PacketTrace) + 'static) {
        self.tx_packet.push(Box::new(sink));
    }

    pub fn connect_rx_packet(&mut self, sink: impl FnMut(&PacketTrace) + 'static) {
        self.rx_packet.push(Box::new(sink));
    }

    pub fn scheduling(&mut self, record: &SchedulingTrace) {
        self.scheduling.iter_mut().for_each(|sink| sink(record));
    }

    pub fn sinr(&mut self, record: &SinrReport) {
        self.sinr.iter_mut().for_each(|sink| sink(record));
    }

    pub fn tx_packet(&mut self, record: &PacketTrace) {
        self.tx_packet.iter_mut().for_each(|sink| sink(record));
    }

    pub fn rx_packet(&mut self, record: &PacketTrace) {
        self.rx_packet.iter_mut().for_each(|sink| sink(record));
    }
}

impl std::fmt::Debug for TraceSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceSinks")
            .field("scheduling", &self.scheduling.len())
            .field("sinr", &self.sinr.len())
            .field("tx_packet", &self.tx_packet.len())
            .field("rx_packet", &self.rx_packet.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_fan_out() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut sinks = TraceSinks::new();
        for _ in 0..2 {
            let seen = seen.clone();
            sinks.connect_sinr(move |r| seen.borrow_mut().push(r.avg_sinr_db));
        }
        sinks.sinr(&SinrReport {
            time_ns: 0,
            rnti: Rnti(1),
            peer: Rnti(2),
            avg_sinr_db: 12.5,
            num_symbols: 14,
            tb_size: 100,
            mcs: 4,
            corrupted: false,
        });
        assert_eq!(*seen.borrow(), vec![12.5, 12.5]);
    }
}
