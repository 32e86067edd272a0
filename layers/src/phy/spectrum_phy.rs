//! Spectrum PHY: transmit/receive state machine of one device
//!
//! Every signal reaching the device passes through [`SpectrumPhy::start_rx`].
//! The first sidelink signal addressed to an idle device is captured; anything
//! else on air only adds interference. When the captured signal ends, the
//! time-averaged SINR feeds the error model and surviving PDUs go up.

use super::antenna::AntennaArray;
use super::interference::Interference;
use super::spectrum::SpectrumValue;
use super::PhyEvent;
use crate::packet::{MacPdu, PacketBurst};
use crate::trace::SinrReport;
use crate::LayerError;
use common::utils::linear_to_db;
use common::{NodeId, Rnti};
use interfaces::{ErrorModel, EventId, Scheduler};
use rand::{Rng, RngCore};
use std::time::Duration;
use tracing::{debug, trace};

/// Receiver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    Tx,
    RxData,
    /// Defined for completeness; control reception is not modelled
    RxCtrl,
}

/// Transport block carried by a sidelink signal
#[derive(Debug, Clone)]
pub struct SidelinkTb {
    pub source: Rnti,
    pub destination: Rnti,
    pub burst: PacketBurst,
    pub mcs: u8,
    pub tb_size: u32,
    pub num_symbols: u8,
    pub rb_mask: Vec<usize>,
}

#[derive(Debug, Clone)]
pub enum SignalKind {
    Sidelink(SidelinkTb),
    /// Foreign signal, only ever interference
    Other,
}

/// A signal on air as seen by one receiver
#[derive(Debug, Clone)]
pub struct SignalParams {
    pub tx_node: NodeId,
    pub psd: SpectrumValue,
    pub duration: Duration,
    pub kind: SignalKind,
}

/// Result of closing a reception window
#[derive(Debug, Default)]
pub struct RxOutcome {
    /// PDUs of every block that survived decoding
    pub delivered: Vec<MacPdu>,
    /// One report per captured block, corrupted or not
    pub reports: Vec<SinrReport>,
    /// Per-band linear SINR per transmitting peer
    pub sinr: Vec<(Rnti, SpectrumValue)>,
}

#[derive(Debug)]
struct Capture {
    start: Duration,
    duration: Duration,
    blocks: Vec<SidelinkTb>,
}

pub struct SpectrumPhy {
    rnti: Rnti,
    state: RxState,
    antenna: AntennaArray,
    interference: Interference,
    error_model: Box<dyn ErrorModel>,
    tx_psd: Option<SpectrumValue>,
    capture: Option<Capture>,
    end_tx_event: Option<EventId>,
    end_rx_event: Option<EventId>,
}

impl SpectrumPhy {
    pub fn new(
        antenna: AntennaArray,
        noise_psd: SpectrumValue,
        error_model: Box<dyn ErrorModel>,
    ) -> Self {
        let mut interference = Interference::new();
        interference.set_noise_psd(noise_psd);
        Self {
            rnti: Rnti(0),
            state: RxState::Idle,
            antenna,
            interference,
            error_model,
            tx_psd: None,
            capture: None,
            end_tx_event: None,
            end_rx_event: None,
        }
    }

    pub fn set_rnti(&mut self, rnti: Rnti) {
        self.rnti = rnti;
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn antenna(&self) -> &AntennaArray {
        &self.antenna
    }

    pub fn antenna_mut(&mut self) -> &mut AntennaArray {
        &mut self.antenna
    }

    pub fn set_tx_psd(&mut self, psd: SpectrumValue) {
        self.tx_psd = Some(psd);
    }

    /// A signal starts arriving at this device
    pub fn start_rx(
        &mut self,
        signal: SignalParams,
        sched: &mut dyn Scheduler<PhyEvent>,
    ) -> Result<(), LayerError> {
        let now = sched.now();
        let tb = match signal.kind {
            SignalKind::Other => {
                self.interference.add_signal(&signal.psd, now, signal.duration);
                return Ok(());
            }
            SignalKind::Sidelink(tb) => tb,
        };

        match self.state {
            RxState::Tx => {
                trace!("PHY {}: ignoring signal from {} while transmitting", self.rnti, tb.source);
            }
            RxState::RxCtrl => {
                return Err(LayerError::InvalidState(format!(
                    "PHY {}: control reception is not supported",
                    self.rnti
                )));
            }
            RxState::Idle | RxState::RxData => {
                self.interference.add_signal(&signal.psd, now, signal.duration);
                if tb.destination != self.rnti {
                    trace!(
                        "PHY {}: signal {} -> {} counted as interference",
                        self.rnti,
                        tb.source,
                        tb.destination
                    );
                    return Ok(());
                }

                match self.capture.as_mut() {
                    None => {
                        debug!(
                            "PHY {}: capturing {} bytes from {} for {:?}",
                            self.rnti, tb.tb_size, tb.source, signal.duration
                        );
                        self.interference.start_rx(&signal.psd, now);
                        self.end_rx_event = Some(sched.schedule_in(signal.duration, PhyEvent::EndRxData));
                        self.capture = Some(Capture {
                            start: now,
                            duration: signal.duration,
                            blocks: vec![tb],
                        });
                        self.state = RxState::RxData;
                    }
                    Some(capture) if capture.start == now && capture.duration == signal.duration => {
                        self.interference.start_rx(&signal.psd, now);
                        capture.blocks.push(tb);
                    }
                    Some(capture) => {
                        return Err(LayerError::InvalidState(format!(
                            "PHY {}: capture from {} at {:?} overlaps unsynchronized capture started at {:?}",
                            self.rnti, tb.source, now, capture.start
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Close the reception window and decide the fate of every captured block
    pub fn end_rx_data(
        &mut self,
        now: Duration,
        rng: &mut dyn RngCore,
    ) -> Result<RxOutcome, LayerError> {
        if self.state != RxState::RxData {
            return Err(LayerError::InvalidState(format!(
                "PHY {}: end of reception in state {:?}",
                self.rnti, self.state
            )));
        }
        let capture = self.capture.take().ok_or_else(|| {
            LayerError::InvalidState(format!("PHY {}: no captured transport block", self.rnti))
        })?;
        self.end_rx_event = None;
        self.state = RxState::Idle;

        let sinr = self.interference.end_rx(now)?;
        let avg_sinr_db = linear_to_db(sinr.mean());

        let mut outcome = RxOutcome::default();
        for block in capture.blocks {
            let bler = self.error_model.decode_stats(
                sinr.values(),
                &block.rb_mask,
                block.tb_size,
                block.mcs,
                &[],
            );
            let corrupted = bler > 0.0 && rng.gen::<f64>() <= bler;
            debug!(
                "PHY {}: block from {} sinr={:.2} dB mcs={} tb_size={} bler={:.3e} corrupted={}",
                self.rnti, block.source, avg_sinr_db, block.mcs, block.tb_size, bler, corrupted
            );

            outcome.reports.push(SinrReport {
                time_ns: now.as_nanos() as u64,
                rnti: self.rnti,
                peer: block.source,
                avg_sinr_db,
                num_symbols: block.num_symbols,
                tb_size: block.tb_size,
                mcs: block.mcs,
                corrupted,
            });
            outcome.sinr.push((block.source, sinr.clone()));
            if !corrupted {
                outcome
                    .delivered
                    .extend(block.burst.into_pdus().into_iter().filter(|pdu| pdu.size() > 0));
            }
        }
        Ok(outcome)
    }

    /// Put a transport block on air; the caller hands the result to the channel
    pub fn start_tx_data_frames(
        &mut self,
        tx_node: NodeId,
        tb: SidelinkTb,
        duration: Duration,
        sched: &mut dyn Scheduler<PhyEvent>,
    ) -> Result<SignalParams, LayerError> {
        if self.state != RxState::Idle {
            return Err(LayerError::InvalidState(format!(
                "PHY {}: transmission requested in state {:?}",
                self.rnti, self.state
            )));
        }
        let psd = self
            .tx_psd
            .clone()
            .ok_or_else(|| LayerError::NotInitialized(format!("PHY {}: transmit PSD", self.rnti)))?;

        self.state = RxState::Tx;
        let end = duration.saturating_sub(Duration::from_nanos(1));
        self.end_tx_event = Some(sched.schedule_in(end, PhyEvent::EndTx));
        trace!(
            "PHY {}: TX {} bytes to {} for {:?}",
            self.rnti,
            tb.tb_size,
            tb.destination,
            duration
        );
        Ok(SignalParams {
            tx_node,
            psd,
            duration,
            kind: SignalKind::Sidelink(tb),
        })
    }

    pub fn end_tx(&mut self) -> Result<(), LayerError> {
        if self.state != RxState::Tx {
            return Err(LayerError::InvalidState(format!(
                "PHY {}: end of transmission in state {:?}",
                self.rnti, self.state
            )));
        }
        self.end_tx_event = None;
        self.state = RxState::Idle;
        Ok(())
    }

    /// Drop any activity and cancel pending end-of-TX/RX events
    pub fn reset(&mut self, sched: &mut dyn Scheduler<PhyEvent>) {
        for event in [self.end_tx_event.take(), self.end_rx_event.take()]
            .into_iter()
            .flatten()
        {
            sched.cancel(event);
        }
        if self.capture.take().is_some() {
            // Closing the window discards the partial SINR
            let _ = self.interference.end_rx(sched.now());
        }
        self.state = RxState::Idle;
    }
}
