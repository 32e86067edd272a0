//! Turn a scenario description into a ready-to-run session

use crate::config::ScenarioConfig;
use anyhow::Result;
use bytes::Bytes;
use common::NodeId;
use interfaces::ConstantVelocityMobility;
use layers::SidelinkNetwork;
use tracing::{debug, info};

/// Build the session: vehicles, groups and every flow packet up to the end of the run
pub fn build_network(config: &ScenarioConfig) -> Result<SidelinkNetwork> {
    let timing = config.frame_timing()?;
    let mut network = SidelinkNetwork::new(config.network_config(), timing, config.path_loss())?;

    let mut nodes = Vec::with_capacity(config.vehicles.len());
    for index in 0..config.vehicles.len() {
        let (position, velocity) = config.vehicle(index)?;
        let node = network.add_device(Box::new(ConstantVelocityMobility::new(position, velocity)))?;
        debug!("Vehicle {} is {} at {:?}", index, node, position);
        nodes.push(node);
    }

    for group in &config.groups {
        let members: Vec<NodeId> = group.members.iter().map(|&m| nodes[m]).collect();
        network.pair_devices(&members, group.policy)?;
    }

    let end = config.duration();
    let mut packets = 0usize;
    for flow in &config.flows {
        let payload = Bytes::from(vec![0u8; flow.packet_size]);
        for at in flow.send_times(end) {
            network.send_packet(at, nodes[flow.from], nodes[flow.to], payload.clone())?;
            packets += 1;
        }
    }

    info!(
        "Scenario: {} vehicles, {} groups, {} flows, {} packets queued",
        nodes.len(),
        config.groups.len(),
        config.flows.len(),
        packets
    );
    Ok(network)
}
