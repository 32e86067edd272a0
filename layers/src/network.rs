//! Sidelink simulation session
//!
//! Owns everything a run needs: the event queue, the seeded RNG, the RNTI
//! counter, the devices and their mobility, the spectrum channel and the
//! trace sinks. Two sessions never share state, so runs with the same seed
//! and topology replay identically.

use crate::device::{DeviceStats, SidelinkDevice};
use crate::mac::{AllocationPattern, MacConfig, PatternPolicy};
use crate::phy::channel::{BeamformingChannelModel, ChannelModelConfig, LinkEnd};
use crate::phy::{AntennaArray, AntennaConfig, FrameTiming, PhyConfig, PhyEvent, SignalParams, SpectrumValue};
use crate::rlc::RlcConfig;
use crate::trace::{PacketTrace, TraceSinks};
use crate::LayerError;
use bytes::Bytes;
use common::utils::db_to_linear;
use common::{NodeId, Rnti};
use interfaces::propagation::Endpoint;
use interfaces::{
    ErrorModel, EventId, EventQueue, IdealErrorModel, MobilityModel, NrAmc, NrErrorModel, PathLoss,
    Scheduler,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Block error model installed in every device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorModelKind {
    #[default]
    Nr,
    Ideal,
}

/// Session-wide configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub seed: u64,
    pub mac: MacConfig,
    pub phy: PhyConfig,
    pub rlc: RlcConfig,
    pub antenna: AntennaConfig,
    /// Beamformed fading; `None` leaves only path gain
    pub channel: Option<ChannelModelConfig>,
    pub error_model: ErrorModelKind,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            mac: MacConfig::default(),
            phy: PhyConfig::default(),
            rlc: RlcConfig::default(),
            antenna: AntennaConfig::default(),
            channel: Some(ChannelModelConfig::default()),
            error_model: ErrorModelKind::Nr,
        }
    }
}

/// Events of the session queue
#[derive(Debug)]
pub enum NetworkEvent {
    Phy { node: NodeId, event: PhyEvent },
    StartRx { node: NodeId, signal: SignalParams },
    AppSend { from: NodeId, to: Rnti, payload: Bytes },
}

/// Session queue seen from one device
struct DeviceScheduler<'a> {
    queue: &'a mut EventQueue<NetworkEvent>,
    node: NodeId,
}

impl Scheduler<PhyEvent> for DeviceScheduler<'_> {
    fn now(&self) -> Duration {
        self.queue.now()
    }

    fn schedule_in(&mut self, delay: Duration, event: PhyEvent) -> EventId {
        self.queue.schedule_in(delay, NetworkEvent::Phy { node: self.node, event })
    }

    fn cancel(&mut self, id: EventId) {
        self.queue.cancel(id);
    }
}

/// Path gain plus optional beamformed fading between every pair of devices
pub struct SpectrumChannel {
    path_loss: Box<dyn PathLoss>,
    beamforming: Option<BeamformingChannelModel>,
}

impl SpectrumChannel {
    pub fn new(path_loss: Box<dyn PathLoss>, beamforming: Option<BeamformingChannelModel>) -> Self {
        Self { path_loss, beamforming }
    }

    pub fn beamforming(&self) -> Option<&BeamformingChannelModel> {
        self.beamforming.as_ref()
    }

    /// PSD of `psd` as received at `rx`
    pub fn propagate(
        &mut self,
        psd: &SpectrumValue,
        tx: &LinkEnd<'_>,
        rx: &LinkEnd<'_>,
        now: Duration,
        rng: &mut dyn RngCore,
    ) -> Result<SpectrumValue, LayerError> {
        let a = Endpoint { node: tx.node, position: tx.position };
        let b = Endpoint { node: rx.node, position: rx.position };
        let condition = self.path_loss.channel_condition(&a, &b, rng);
        let gain_db = self.path_loss.path_gain_db(&a, &b, condition);
        let received = psd * db_to_linear(gain_db);

        match self.beamforming.as_mut() {
            Some(model) if rx.antenna.current_beam().is_some() => {
                model.apply(&received, tx, rx, condition, now, rng)
            }
            Some(_) => {
                trace!("Channel: {} has no beam, skipping fading", rx.node);
                Ok(received)
            }
            None => Ok(received),
        }
    }
}

fn link_end<'a>(
    devices: &'a [SidelinkDevice],
    mobility: &[Box<dyn MobilityModel>],
    node: NodeId,
    now: Duration,
) -> LinkEnd<'a> {
    LinkEnd {
        node,
        position: mobility[node.0].position(now),
        velocity: mobility[node.0].velocity(now),
        antenna: devices[node.0].phy().spectrum().antenna(),
    }
}

/// Simulation session of a sidelink network
pub struct SidelinkNetwork {
    config: NetworkConfig,
    timing: Arc<FrameTiming>,
    queue: EventQueue<NetworkEvent>,
    rng: StdRng,
    next_rnti: u16,
    next_lcid: u8,
    devices: Vec<SidelinkDevice>,
    mobility: Vec<Box<dyn MobilityModel>>,
    channel: SpectrumChannel,
    traces: TraceSinks,
    started: bool,
}

impl SidelinkNetwork {
    pub fn new(
        config: NetworkConfig,
        timing: FrameTiming,
        path_loss: Box<dyn PathLoss>,
    ) -> Result<Self, LayerError> {
        let beamforming = config
            .channel
            .clone()
            .map(|channel| BeamformingChannelModel::new(channel, timing.center_frequency_hz()))
            .transpose()?;
        info!(
            "Sidelink session: numerology {}, {} RBs, {} slots/subframe, seed {}",
            timing.numerology(),
            timing.num_rb(),
            timing.slots_per_subframe(),
            config.seed
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            timing: Arc::new(timing),
            queue: EventQueue::new(),
            next_rnti: 1,
            next_lcid: 1,
            devices: Vec::new(),
            mobility: Vec::new(),
            channel: SpectrumChannel::new(path_loss, beamforming),
            traces: TraceSinks::new(),
            started: false,
        })
    }

    pub fn timing(&self) -> &Arc<FrameTiming> {
        &self.timing
    }

    pub fn now(&self) -> Duration {
        self.queue.now()
    }

    pub fn traces_mut(&mut self) -> &mut TraceSinks {
        &mut self.traces
    }

    pub fn devices(&self) -> &[SidelinkDevice] {
        &self.devices
    }

    pub fn device(&self, node: NodeId) -> Result<&SidelinkDevice, LayerError> {
        self.devices
            .get(node.0)
            .ok_or_else(|| LayerError::InvalidConfiguration(format!("No device at {}", node)))
    }

    pub fn stats(&self, node: NodeId) -> Result<&DeviceStats, LayerError> {
        Ok(self.device(node)?.stats())
    }

    pub fn channel(&self) -> &SpectrumChannel {
        &self.channel
    }

    /// Install a device moving along `mobility`; returns its node
    pub fn add_device(&mut self, mobility: Box<dyn MobilityModel>) -> Result<NodeId, LayerError> {
        let node = NodeId(self.devices.len());
        let rnti = Rnti(self.next_rnti);
        self.next_rnti = self.next_rnti.checked_add(1).ok_or_else(|| {
            LayerError::InvalidConfiguration("RNTI space exhausted".into())
        })?;

        let antenna = AntennaArray::new(self.config.antenna.clone())?;
        let amc = NrAmc::new(self.timing.num_rb(), self.timing.symbols_per_slot());
        let error_model: Box<dyn ErrorModel> = match self.config.error_model {
            ErrorModelKind::Nr => Box::new(NrErrorModel::default()),
            ErrorModelKind::Ideal => Box::new(IdealErrorModel),
        };
        let device = SidelinkDevice::new(
            node,
            rnti,
            self.timing.clone(),
            self.config.mac.clone(),
            self.config.phy.clone(),
            self.config.rlc.clone(),
            antenna,
            Box::new(amc),
            error_model,
        );
        debug!("Session: {} installed with RNTI {}", node, rnti);
        self.devices.push(device);
        self.mobility.push(mobility);

        if self.started {
            let mut sched = DeviceScheduler { queue: &mut self.queue, node };
            self.devices[node.0].phy_mut().start(&mut sched);
        }
        Ok(node)
    }

    /// Pair every device of `group` with each other and install their pattern
    pub fn pair_devices(&mut self, group: &[NodeId], policy: PatternPolicy) -> Result<(), LayerError> {
        let rntis = group
            .iter()
            .map(|&node| self.device(node).map(SidelinkDevice::rnti))
            .collect::<Result<Vec<_>, _>>()?;
        let pattern = AllocationPattern::build(policy, &rntis, self.timing.slots_per_subframe())?;
        let now = self.queue.now();

        for (i, &a) in group.iter().enumerate() {
            for &b in &group[i + 1..] {
                let lcid = self.next_lcid;
                self.next_lcid = self.next_lcid.checked_add(1).ok_or_else(|| {
                    LayerError::InvalidConfiguration("Logical channel ids exhausted".into())
                })?;
                for (me, peer) in [(a, b), (b, a)] {
                    let bearing = self.mobility[peer.0].position(now) - self.mobility[me.0].position(now);
                    let peer_rnti = self.devices[peer.0].rnti();
                    let device = &mut self.devices[me.0];
                    device.add_bearer(lcid, peer_rnti);
                    device.phy_mut().add_device(peer_rnti, peer);
                    device
                        .phy_mut()
                        .spectrum_mut()
                        .antenna_mut()
                        .set_beamforming_vector(peer, bearing);
                }
                debug!("Session: paired {} and {} on LCID {}", a, b, lcid);
            }
        }

        for &node in group {
            self.devices[node.0].mac_mut().set_pattern(pattern.clone())?;
        }
        info!("Session: group {:?} uses pattern {:?}", rntis, pattern.slots());
        Ok(())
    }

    /// Queue an application packet from `from` to `to` at absolute time `at`
    pub fn send_packet(&mut self, at: Duration, from: NodeId, to: NodeId, payload: Bytes) -> Result<(), LayerError> {
        self.device(from)?;
        let to = self.device(to)?.rnti();
        self.queue.schedule_at(at, NetworkEvent::AppSend { from, to, payload })?;
        Ok(())
    }

    /// Start slot ticking on every device
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        for (index, device) in self.devices.iter_mut().enumerate() {
            let mut sched = DeviceScheduler { queue: &mut self.queue, node: NodeId(index) };
            device.phy_mut().start(&mut sched);
        }
    }

    /// Process events up to and including `end`; any error aborts the run
    pub fn run_until(&mut self, end: Duration) -> Result<(), LayerError> {
        self.start();
        while let Some(at) = self.queue.peek_time() {
            if at > end {
                break;
            }
            let Some((_, event)) = self.queue.pop() else {
                break;
            };
            self.handle(event)?;
        }
        Ok(())
    }

    /// Cancel all pending device activity
    pub fn reset(&mut self) {
        for (index, device) in self.devices.iter_mut().enumerate() {
            let mut sched = DeviceScheduler { queue: &mut self.queue, node: NodeId(index) };
            device.reset(&mut sched);
        }
        self.started = false;
    }

    fn handle(&mut self, event: NetworkEvent) -> Result<(), LayerError> {
        match event {
            NetworkEvent::Phy { node, event } => {
                let device = &mut self.devices[node.0];
                let mut sched = DeviceScheduler { queue: &mut self.queue, node };
                let output = device.handle_phy_event(event, &mut sched, &mut self.rng)?;

                for record in &output.scheduling {
                    self.traces.scheduling(record);
                }
                for record in &output.sinr {
                    self.traces.sinr(record);
                }
                let time_ns = self.queue.now().as_nanos() as u64;
                let destination = self.devices[node.0].rnti();
                for (source, sdu) in &output.delivered {
                    self.traces.rx_packet(&PacketTrace {
                        time_ns,
                        source: *source,
                        destination,
                        size: sdu.len() as u32,
                    });
                }
                if let Some(signal) = output.signal {
                    self.transmit(node, signal)?;
                }
            }
            NetworkEvent::StartRx { node, signal } => {
                let mut sched = DeviceScheduler { queue: &mut self.queue, node };
                self.devices[node.0].start_rx(signal, &mut sched)?;
            }
            NetworkEvent::AppSend { from, to, payload } => {
                let size = payload.len() as u32;
                let device = &mut self.devices[from.0];
                let source = device.rnti();
                if device.send(to, payload)? {
                    self.traces.tx_packet(&PacketTrace {
                        time_ns: self.queue.now().as_nanos() as u64,
                        source,
                        destination: to,
                        size,
                    });
                }
            }
        }
        Ok(())
    }

    /// Deliver a new signal to every other device
    fn transmit(&mut self, from: NodeId, signal: SignalParams) -> Result<(), LayerError> {
        let now = self.queue.now();
        let tx = link_end(&self.devices, &self.mobility, from, now);
        let mut arrivals = Vec::with_capacity(self.devices.len().saturating_sub(1));
        for index in (0..self.devices.len()).filter(|&index| index != from.0) {
            let rx = link_end(&self.devices, &self.mobility, NodeId(index), now);
            let psd = self.channel.propagate(&signal.psd, &tx, &rx, now, &mut self.rng)?;
            arrivals.push((NodeId(index), psd));
        }

        for (node, psd) in arrivals {
            trace!("Session: {} -> {} rx power {:.3e} W", from, node, psd.integral());
            let mut received = signal.clone();
            received.psd = psd;
            self.queue
                .schedule_in(Duration::ZERO, NetworkEvent::StartRx { node, signal: received });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::{FrameTimingBuilder, RxState};
    use crate::trace::{SchedulingTrace, SinrReport};
    use common::utils::linear_to_db;
    use common::Vector3;
    use interfaces::{ChannelCondition, ConstantVelocityMobility, FixedPathGain, V2vPathLoss, V2vScenario};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    const NOISE_FIGURE_DB: f64 = 5.0;
    const TX_POWER_DBM: f64 = 30.0;

    /// Path gain per unordered node pair
    struct PairGains(HashMap<(usize, usize), f64>);

    impl PathLoss for PairGains {
        fn channel_condition(&mut self, _: &Endpoint, _: &Endpoint, _: &mut dyn RngCore) -> ChannelCondition {
            ChannelCondition::Los
        }

        fn path_gain_db(&self, a: &Endpoint, b: &Endpoint, _: ChannelCondition) -> f64 {
            let key = (a.node.0.min(b.node.0), a.node.0.max(b.node.0));
            self.0.get(&key).copied().unwrap_or(-200.0)
        }
    }

    fn timing(frequency_hz: f64) -> FrameTiming {
        FrameTimingBuilder::new()
            .set_bandwidth(100e6)
            .unwrap()
            .set_center_frequency(frequency_hz)
            .unwrap()
            .set_numerology(2)
            .unwrap()
            .build()
            .unwrap()
    }

    fn ideal_config(mcs: u8) -> NetworkConfig {
        NetworkConfig {
            mac: MacConfig { amc_enabled: false, fixed_mcs: mcs },
            phy: PhyConfig { tx_power_dbm: TX_POWER_DBM, noise_figure_db: NOISE_FIGURE_DB },
            channel: None,
            ..NetworkConfig::default()
        }
    }

    fn parked(x: f64) -> Box<dyn MobilityModel> {
        Box::new(ConstantVelocityMobility::stationary(Vector3::new(x, 0.0, 1.5)))
    }

    /// Received-power over noise of a link with `gain_db`
    fn link_budget_db(network: &SidelinkNetwork, gain_db: f64) -> f64 {
        let timing = network.timing();
        let bandwidth = timing.num_rb() as f64 * timing.rb_bandwidth_hz();
        TX_POWER_DBM + gain_db - (-174.0 + NOISE_FIGURE_DB + 10.0 * bandwidth.log10())
    }

    fn record_sinr(network: &mut SidelinkNetwork) -> Rc<RefCell<Vec<SinrReport>>> {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = reports.clone();
        network
            .traces_mut()
            .connect_sinr(move |report| sink.borrow_mut().push(report.clone()));
        reports
    }

    fn send_periodic(network: &mut SidelinkNetwork, from: NodeId, to: NodeId, count: u64, size: usize) {
        for i in 0..count {
            let at = Duration::from_millis(i);
            network
                .send_packet(at, from, to, Bytes::from(vec![i as u8; size]))
                .unwrap();
        }
    }

    #[test]
    fn test_single_link_matches_link_budget() {
        let gain_db = -100.0;
        let mut network =
            SidelinkNetwork::new(ideal_config(0), timing(28e9), Box::new(FixedPathGain::new(gain_db))).unwrap();
        let a = network.add_device(parked(0.0)).unwrap();
        let b = network.add_device(parked(20.0)).unwrap();
        network.pair_devices(&[a, b], PatternPolicy::Default).unwrap();
        let reports = record_sinr(&mut network);

        send_periodic(&mut network, a, b, 10, 100);
        network.run_until(Duration::from_millis(12)).unwrap();

        let expected = link_budget_db(&network, gain_db);
        let reports = reports.borrow();
        assert!(!reports.is_empty());
        for report in reports.iter() {
            assert_eq!((report.rnti, report.peer), (Rnti(2), Rnti(1)));
            assert!((report.avg_sinr_db - expected).abs() < 1e-6);
            assert!(!report.corrupted);
        }
        assert_eq!(network.stats(a).unwrap().tx_packets, 10);
        assert_eq!(network.stats(b).unwrap().rx_packets, 10);
        assert_eq!(network.stats(b).unwrap().rx_bytes, 1000);
    }

    fn two_pairs(shared_slot: bool) -> (SidelinkNetwork, Rc<RefCell<Vec<SinrReport>>>) {
        // a -> b and c -> d, with cross links weaker by 10 dB
        let gains = HashMap::from([
            ((0, 1), -90.0),
            ((2, 3), -90.0),
            ((1, 2), -100.0),
            ((0, 3), -100.0),
            ((0, 2), -95.0),
            ((1, 3), -95.0),
        ]);
        let mut network =
            SidelinkNetwork::new(ideal_config(0), timing(28e9), Box::new(PairGains(gains))).unwrap();
        let nodes: Vec<NodeId> = (0..4).map(|i| network.add_device(parked(i as f64 * 10.0)).unwrap()).collect();
        if shared_slot {
            network.pair_devices(&nodes[..2], PatternPolicy::Default).unwrap();
            network.pair_devices(&nodes[2..], PatternPolicy::Default).unwrap();
        } else {
            network.pair_devices(&nodes, PatternPolicy::Default).unwrap();
        }
        let reports = record_sinr(&mut network);
        send_periodic(&mut network, nodes[0], nodes[1], 5, 300);
        send_periodic(&mut network, nodes[2], nodes[3], 5, 300);
        network.run_until(Duration::from_millis(8)).unwrap();
        (network, reports)
    }

    #[test]
    fn test_shared_slot_sinr_includes_interferer() {
        let (network, reports) = two_pairs(true);
        let to_linear = |db: f64| db_to_linear(link_budget_db(&network, db));
        // Useful -90 dB over interferer -100 dB plus noise
        let expected = linear_to_db(to_linear(-90.0) / (to_linear(-100.0) + 1.0));

        let reports = reports.borrow();
        assert_eq!(reports.len(), 10);
        for report in reports.iter() {
            assert!((report.avg_sinr_db - expected).abs() < 1e-2, "{} vs {}", report.avg_sinr_db, expected);
        }
    }

    #[test]
    fn test_orthogonal_slots_see_only_noise() {
        let (network, reports) = two_pairs(false);
        let expected = link_budget_db(&network, -90.0);
        let reports = reports.borrow();
        assert_eq!(reports.len(), 10);
        for report in reports.iter() {
            assert!((report.avg_sinr_db - expected).abs() < 1e-2);
        }
    }

    #[test]
    fn test_no_loss_at_any_mcs() {
        for mcs in 0..=interfaces::amc::MAX_MCS {
            let mut network =
                SidelinkNetwork::new(ideal_config(mcs), timing(28e9), Box::new(FixedPathGain::new(-40.0))).unwrap();
            let a = network.add_device(parked(0.0)).unwrap();
            let b = network.add_device(parked(5.0)).unwrap();
            network.pair_devices(&[a, b], PatternPolicy::Optimized).unwrap();
            send_periodic(&mut network, a, b, 20, 1200);
            send_periodic(&mut network, b, a, 20, 1200);
            network.run_until(Duration::from_millis(40)).unwrap();

            for (tx, rx) in [(a, b), (b, a)] {
                let sent = network.stats(tx).unwrap().tx_packets;
                let received = network.stats(rx).unwrap().rx_packets;
                assert_eq!(sent, 20, "mcs {}", mcs);
                assert_eq!(received, sent, "mcs {}", mcs);
            }
        }
    }

    #[test]
    fn test_scheduling_trace_and_fixed_mcs() {
        let mut network =
            SidelinkNetwork::new(ideal_config(12), timing(28e9), Box::new(FixedPathGain::new(-80.0))).unwrap();
        let a = network.add_device(parked(0.0)).unwrap();
        let b = network.add_device(parked(20.0)).unwrap();
        network.pair_devices(&[a, b], PatternPolicy::Default).unwrap();
        let traces: Rc<RefCell<Vec<SchedulingTrace>>> = Rc::default();
        let sink = traces.clone();
        network
            .traces_mut()
            .connect_scheduling(move |trace| sink.borrow_mut().push(trace.clone()));

        send_periodic(&mut network, a, b, 5, 500);
        network.run_until(Duration::from_millis(6)).unwrap();

        let traces = traces.borrow();
        assert!(!traces.is_empty());
        for trace in traces.iter() {
            assert_eq!(trace.mcs, 12);
            assert_eq!(trace.slot, 0);
            assert_eq!((trace.tx_rnti, trace.rx_rnti), (Rnti(1), Rnti(2)));
        }
        assert!(network.stats(b).unwrap().mean_sinr_db().is_some());
    }

    #[test]
    fn test_beamformed_vehicles_keep_running() {
        let config = NetworkConfig {
            channel: Some(ChannelModelConfig {
                update_period: Some(Duration::from_millis(5)),
                blockage: Some(Default::default()),
                ..ChannelModelConfig::default()
            }),
            ..NetworkConfig::default()
        };
        let path_loss = V2vPathLoss::new(V2vScenario::Highway, 28e9);
        let mut network = SidelinkNetwork::new(config, timing(28e9), Box::new(path_loss)).unwrap();
        let a = network.add_device(Box::new(ConstantVelocityMobility::new(
            Vector3::new(0.0, 0.0, 1.5),
            Vector3::new(25.0, 0.0, 0.0),
        )))
        .unwrap();
        let b = network.add_device(Box::new(ConstantVelocityMobility::new(
            Vector3::new(30.0, 3.0, 1.5),
            Vector3::new(20.0, 0.0, 0.0),
        )))
        .unwrap();
        network.pair_devices(&[a, b], PatternPolicy::Default).unwrap();
        let reports = record_sinr(&mut network);
        let scheduled: Rc<RefCell<usize>> = Rc::default();
        let counter = scheduled.clone();
        network
            .traces_mut()
            .connect_scheduling(move |_| *counter.borrow_mut() += 1);

        send_periodic(&mut network, a, b, 15, 200);
        network.run_until(Duration::from_millis(20)).unwrap();

        // Every transmission is captured, decoded or not
        assert!(*scheduled.borrow() > 0);
        assert_eq!(reports.borrow().len(), *scheduled.borrow());
        assert_eq!(network.channel().beamforming().unwrap().cache().len(), 1);
    }

    #[test]
    fn test_same_seed_replays() {
        let run = || {
            let config = NetworkConfig { seed: 42, ..NetworkConfig::default() };
            let path_loss = V2vPathLoss::new(V2vScenario::Urban, 28e9);
            let mut network = SidelinkNetwork::new(config, timing(28e9), Box::new(path_loss)).unwrap();
            let a = network.add_device(parked(0.0)).unwrap();
            let b = network.add_device(parked(60.0)).unwrap();
            network.pair_devices(&[a, b], PatternPolicy::Default).unwrap();
            let reports = record_sinr(&mut network);
            send_periodic(&mut network, a, b, 5, 200);
            network.run_until(Duration::from_millis(6)).unwrap();
            let sinr: Vec<f64> = reports.borrow().iter().map(|r| r.avg_sinr_db).collect();
            sinr
        };
        let first = run();
        assert!(!first.is_empty());
        assert_eq!(first, run());
    }

    #[test]
    fn test_unknown_destination_is_an_error() {
        let mut network =
            SidelinkNetwork::new(ideal_config(0), timing(28e9), Box::new(FixedPathGain::new(-80.0))).unwrap();
        let a = network.add_device(parked(0.0)).unwrap();
        let b = network.add_device(parked(20.0)).unwrap();
        // Never paired: no bearer towards b
        network.send_packet(Duration::ZERO, a, b, Bytes::from_static(b"x")).unwrap();
        assert_eq!(
            network.run_until(Duration::from_millis(1)),
            Err(LayerError::UnknownDevice(Rnti(2)))
        );
        assert!(network.send_packet(Duration::ZERO, a, NodeId(9), Bytes::new()).is_err());
    }

    #[test]
    fn test_too_many_devices_for_pattern() {
        let mut network =
            SidelinkNetwork::new(ideal_config(0), timing(28e9), Box::new(FixedPathGain::new(-80.0))).unwrap();
        let nodes: Vec<NodeId> = (0..5).map(|i| network.add_device(parked(i as f64)).unwrap()).collect();
        assert!(matches!(
            network.pair_devices(&nodes, PatternPolicy::Default),
            Err(LayerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_reset_stops_transmissions_scheduled_in_slot() {
        let mut network =
            SidelinkNetwork::new(ideal_config(0), timing(28e9), Box::new(FixedPathGain::new(-80.0))).unwrap();
        let nodes: Vec<NodeId> = (0..3).map(|i| network.add_device(parked(i as f64 * 10.0)).unwrap()).collect();
        // Slots [a, b, c, idle]
        network.pair_devices(&nodes, PatternPolicy::Default).unwrap();
        let reports = record_sinr(&mut network);
        let scheduling: Rc<RefCell<Vec<SchedulingTrace>>> = Rc::default();
        let sink = scheduling.clone();
        network
            .traces_mut()
            .connect_scheduling(move |trace| sink.borrow_mut().push(trace.clone()));

        // Enough for a to split slot 0 between b and c
        network.send_packet(Duration::ZERO, nodes[0], nodes[1], Bytes::from(vec![1u8; 4000])).unwrap();
        network.send_packet(Duration::ZERO, nodes[0], nodes[2], Bytes::from(vec![2u8; 4000])).unwrap();
        network.run_until(Duration::from_micros(5)).unwrap();
        {
            let scheduling = scheduling.borrow();
            assert_eq!(scheduling.len(), 2);
            assert_eq!(scheduling[1].rx_rnti, Rnti(3));
            assert!(scheduling[1].symbol_start > 0);
        }

        network.reset();
        for device in network.devices() {
            assert_eq!(device.phy().spectrum().state(), RxState::Idle);
        }

        // Ticking resumes on slot 1, so a owns the third slot after the restart
        let restart = network.now();
        let next_owned = restart + network.timing().slot_period() * 3;
        network.run_until(next_owned - Duration::from_nanos(1)).unwrap();
        assert!(
            reports.borrow().iter().all(|report| report.peer != Rnti(1)),
            "{:?}",
            reports.borrow()
        );

        network.run_until(next_owned + network.timing().slot_period()).unwrap();
        let from_a: Vec<SinrReport> =
            reports.borrow().iter().filter(|report| report.peer == Rnti(1)).cloned().collect();
        assert!(!from_a.is_empty());
        assert!(from_a.iter().all(|report| report.time_ns >= next_owned.as_nanos() as u64));
    }
}
