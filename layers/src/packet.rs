//! In-process protocol data units
//!
//! Nothing here is serialized: the MAC tags each RLC segment with its
//! addressing and the PHY moves bursts of tagged PDUs between devices.

use bytes::Bytes;
use common::Rnti;

/// Segment of one RLC SDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RlcPdu {
    /// Sequence number of the SDU this segment belongs to
    pub sn: u32,
    /// Byte offset of `data` inside the SDU
    pub offset: u32,
    /// Length of the complete SDU
    pub sdu_len: u32,
    pub data: Bytes,
}

impl RlcPdu {
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_last_segment(&self) -> bool {
        self.offset + self.size() >= self.sdu_len
    }
}

/// Addressing attached by the sidelink MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlMacTag {
    pub source: Rnti,
    pub destination: Rnti,
    pub lcid: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacPdu {
    pub tag: SlMacTag,
    pub rlc: RlcPdu,
}

impl MacPdu {
    pub fn size(&self) -> u32 {
        self.rlc.size()
    }
}

/// PDUs carried by one transport block
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketBurst {
    pdus: Vec<MacPdu>,
}

impl PacketBurst {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pdu: MacPdu) {
        self.pdus.push(pdu);
    }

    pub fn pdus(&self) -> &[MacPdu] {
        &self.pdus
    }

    pub fn into_pdus(self) -> Vec<MacPdu> {
        self.pdus
    }

    pub fn len(&self) -> usize {
        self.pdus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pdus.is_empty()
    }

    pub fn size_bytes(&self) -> u32 {
        self.pdus.iter().map(MacPdu::size).sum()
    }
}

impl From<Vec<MacPdu>> for PacketBurst {
    fn from(pdus: Vec<MacPdu>) -> Self {
        Self { pdus }
    }
}
