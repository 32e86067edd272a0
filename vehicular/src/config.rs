//! Scenario configuration
//!
//! A scenario file describes the carrier, the layer settings, the vehicles,
//! the sidelink groups and the traffic flows of one run. TOML and YAML are
//! both accepted; every section except `vehicles` has defaults.

use anyhow::{anyhow, bail, Context, Result};
use common::Vector3;
use interfaces::{FixedPathGain, PathLoss, V2vPathLoss, V2vScenario};
use layers::mac::{MacConfig, PatternPolicy};
use layers::network::ErrorModelKind;
use layers::phy::channel::{BlockageConfig, ChannelModelConfig};
use layers::phy::{AntennaConfig, ElementPattern, FrameTiming, FrameTimingBuilder, PhyConfig};
use layers::rlc::RlcConfig;
use layers::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level scenario
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    /// Seed of the session RNG
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Simulated time in milliseconds
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    #[serde(default)]
    pub carrier: CarrierConfig,
    #[serde(default)]
    pub mac: MacSection,
    #[serde(default)]
    pub phy: PhySection,
    #[serde(default)]
    pub rlc: RlcSection,
    #[serde(default)]
    pub antenna: AntennaSection,
    #[serde(default)]
    pub channel: ChannelSection,
    #[serde(default)]
    pub error_model: ErrorModelKind,
    pub vehicles: Vec<VehicleConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
    #[serde(default)]
    pub flows: Vec<FlowConfig>,
}

fn default_seed() -> u64 {
    1
}

fn default_duration_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CarrierConfig {
    #[serde(default = "default_numerology")]
    pub numerology: u8,
    #[serde(default = "default_bandwidth_mhz")]
    pub bandwidth_mhz: f64,
    #[serde(default = "default_center_frequency_ghz")]
    pub center_frequency_ghz: f64,
    #[serde(default = "default_symbols_per_slot")]
    pub symbols_per_slot: u8,
}

fn default_numerology() -> u8 {
    2
}

fn default_bandwidth_mhz() -> f64 {
    100.0
}

fn default_center_frequency_ghz() -> f64 {
    28.0
}

fn default_symbols_per_slot() -> u8 {
    14
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            numerology: default_numerology(),
            bandwidth_mhz: default_bandwidth_mhz(),
            center_frequency_ghz: default_center_frequency_ghz(),
            symbols_per_slot: default_symbols_per_slot(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MacSection {
    /// Pick the MCS from reported SINR instead of `mcs`
    #[serde(default)]
    pub amc: bool,
    #[serde(default)]
    pub mcs: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhySection {
    #[serde(default = "default_tx_power_dbm")]
    pub tx_power_dbm: f64,
    #[serde(default = "default_noise_figure_db")]
    pub noise_figure_db: f64,
}

fn default_tx_power_dbm() -> f64 {
    30.0
}

fn default_noise_figure_db() -> f64 {
    5.0
}

impl Default for PhySection {
    fn default() -> Self {
        Self {
            tx_power_dbm: default_tx_power_dbm(),
            noise_figure_db: default_noise_figure_db(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RlcSection {
    #[serde(default = "default_max_tx_buffer_bytes")]
    pub max_tx_buffer_bytes: u32,
}

fn default_max_tx_buffer_bytes() -> u32 {
    10 * 1024 * 1024
}

impl Default for RlcSection {
    fn default() -> Self {
        Self {
            max_tx_buffer_bytes: default_max_tx_buffer_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AntennaSection {
    #[serde(default = "default_num_elements")]
    pub num_elements: usize,
    #[serde(default = "default_num_sectors")]
    pub num_sectors: u8,
    #[serde(default = "default_element_spacing")]
    pub element_spacing: f64,
    #[serde(default = "default_element_pattern")]
    pub pattern: ElementPattern,
    #[serde(default)]
    pub omni: bool,
}

fn default_num_elements() -> usize {
    16
}

fn default_num_sectors() -> u8 {
    4
}

fn default_element_spacing() -> f64 {
    0.5
}

fn default_element_pattern() -> ElementPattern {
    ElementPattern::ThreeGppV2v
}

impl Default for AntennaSection {
    fn default() -> Self {
        Self {
            num_elements: default_num_elements(),
            num_sectors: default_num_sectors(),
            element_spacing: default_element_spacing(),
            pattern: default_element_pattern(),
            omni: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelSection {
    #[serde(default = "default_scenario")]
    pub scenario: V2vScenario,
    /// Apply beamformed small-scale fading on top of path loss
    #[serde(default = "default_true")]
    pub beamforming: bool,
    /// Redraw period of channel realizations; absent keeps them until the
    /// propagation condition changes
    #[serde(default)]
    pub update_period_ms: Option<u64>,
    #[serde(default = "default_consistency_interval_ms")]
    pub consistency_interval_ms: u64,
    #[serde(default)]
    pub oxygen_absorption: bool,
    #[serde(default)]
    pub scatterer_speed: f64,
    #[serde(default)]
    pub blockage: Option<BlockageSection>,
    #[serde(default)]
    pub vehicle_blockage: Option<VehicleBlockageSection>,
    /// Replace the V2V path loss by a constant gain, dB
    #[serde(default)]
    pub fixed_path_gain_db: Option<f64>,
}

fn default_scenario() -> V2vScenario {
    V2vScenario::Highway
}

fn default_true() -> bool {
    true
}

fn default_consistency_interval_ms() -> u64 {
    1
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            scenario: default_scenario(),
            beamforming: true,
            update_period_ms: None,
            consistency_interval_ms: default_consistency_interval_ms(),
            oxygen_absorption: false,
            scatterer_speed: 0.0,
            blockage: None,
            vehicle_blockage: None,
            fixed_path_gain_db: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockageSection {
    #[serde(default = "default_num_blockers")]
    pub num_blockers: usize,
    #[serde(default)]
    pub blocker_speed: f64,
    #[serde(default = "default_correlation_distance")]
    pub correlation_distance: f64,
    #[serde(default = "default_true")]
    pub self_blocking: bool,
}

fn default_num_blockers() -> usize {
    4
}

fn default_correlation_distance() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleBlockageSection {
    /// Share of LOS links turned into NLOSv
    pub fraction: f64,
    #[serde(default = "default_vehicle_blockage_loss_db")]
    pub loss_db: f64,
}

fn default_vehicle_blockage_loss_db() -> f64 {
    9.0
}

/// One vehicle moving at constant velocity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VehicleConfig {
    /// Initial position in meters
    pub position: [f64; 3],
    /// Velocity in m/s
    #[serde(default)]
    pub velocity: [f64; 3],
}

/// Vehicles sharing one slot pattern; every pair gets a bearer
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GroupConfig {
    pub members: Vec<usize>,
    #[serde(default)]
    pub policy: PatternPolicy,
}

/// Periodic constant-size traffic from one vehicle to another
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlowConfig {
    pub from: usize,
    pub to: usize,
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: f64,
    #[serde(default)]
    pub start_ms: f64,
    /// Stop after this many packets; absent sends until the end of the run
    #[serde(default)]
    pub count: Option<u64>,
}

fn default_packet_size() -> usize {
    200
}

fn default_interval_ms() -> f64 {
    10.0
}

impl FlowConfig {
    /// Send times of this flow strictly before `end`
    pub fn send_times(&self, end: Duration) -> Vec<Duration> {
        let start = Duration::from_micros((self.start_ms * 1e3).round() as u64);
        let interval = Duration::from_micros((self.interval_ms * 1e3).round() as u64);
        let limit = self.count.unwrap_or(u64::MAX);
        let mut times = Vec::new();
        let mut at = start;
        while at < end && (times.len() as u64) < limit {
            times.push(at);
            at += interval;
        }
        times
    }
}

impl ScenarioConfig {
    /// Load from a `.yaml`/`.yml` or `.toml` file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content)?,
            _ => Self::from_toml_str(&content)?,
        };
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML scenario")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Invalid YAML scenario")?;
        config.validate()?;
        Ok(config)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Check references between vehicles, groups and flows
    pub fn validate(&self) -> Result<()> {
        if self.vehicles.is_empty() {
            bail!("Scenario has no vehicles");
        }
        for (index, group) in self.groups.iter().enumerate() {
            if group.members.is_empty() {
                bail!("Group {} is empty", index);
            }
            if let Some(&member) = group.members.iter().find(|&&m| m >= self.vehicles.len()) {
                bail!("Group {} names vehicle {} but only {} exist", index, member, self.vehicles.len());
            }
        }
        if let Some(index) = (0..self.vehicles.len())
            .find(|&v| !self.groups.iter().any(|group| group.members.contains(&v)))
        {
            bail!("Vehicle {} belongs to no group", index);
        }
        for (index, flow) in self.flows.iter().enumerate() {
            if flow.from == flow.to {
                bail!("Flow {} sends to itself", index);
            }
            if !self.paired(flow.from, flow.to) {
                bail!("Flow {}: vehicles {} and {} share no group", index, flow.from, flow.to);
            }
            if flow.packet_size == 0 {
                bail!("Flow {} has zero packet size", index);
            }
            if !(flow.interval_ms >= 1e-3) || flow.start_ms < 0.0 {
                bail!("Flow {} needs a positive interval and a non-negative start", index);
            }
        }
        if self.mac.mcs > interfaces::amc::MAX_MCS {
            bail!("MCS {} above {}", self.mac.mcs, interfaces::amc::MAX_MCS);
        }
        Ok(())
    }

    fn paired(&self, a: usize, b: usize) -> bool {
        self.groups
            .iter()
            .any(|group| group.members.contains(&a) && group.members.contains(&b))
    }

    pub fn frame_timing(&self) -> Result<FrameTiming> {
        let timing = FrameTimingBuilder::new()
            .set_bandwidth(self.carrier.bandwidth_mhz * 1e6)?
            .set_center_frequency(self.carrier.center_frequency_ghz * 1e9)?
            .set_symbols_per_slot(self.carrier.symbols_per_slot)?
            .set_numerology(self.carrier.numerology)?
            .build()?;
        Ok(timing)
    }

    pub fn network_config(&self) -> NetworkConfig {
        let channel = &self.channel;
        let beamforming = channel.beamforming.then(|| ChannelModelConfig {
            update_period: channel.update_period_ms.map(Duration::from_millis),
            consistency_interval: Duration::from_millis(channel.consistency_interval_ms),
            blockage: channel.blockage.as_ref().map(|b| BlockageConfig {
                num_blockers: b.num_blockers,
                blocker_speed: b.blocker_speed,
                correlation_distance: b.correlation_distance,
                self_blocking: b.self_blocking,
            }),
            oxygen_absorption: channel.oxygen_absorption,
            scatterer_speed: channel.scatterer_speed,
        });

        NetworkConfig {
            seed: self.seed,
            mac: MacConfig {
                amc_enabled: self.mac.amc,
                fixed_mcs: self.mac.mcs,
            },
            phy: PhyConfig {
                tx_power_dbm: self.phy.tx_power_dbm,
                noise_figure_db: self.phy.noise_figure_db,
            },
            rlc: RlcConfig {
                max_tx_buffer_bytes: self.rlc.max_tx_buffer_bytes,
            },
            antenna: AntennaConfig {
                num_elements: self.antenna.num_elements,
                num_sectors: self.antenna.num_sectors,
                element_spacing: self.antenna.element_spacing,
                pattern: self.antenna.pattern,
                omni: self.antenna.omni,
            },
            channel: beamforming,
            error_model: self.error_model,
        }
    }

    pub fn path_loss(&self) -> Box<dyn PathLoss> {
        if let Some(gain_db) = self.channel.fixed_path_gain_db {
            return Box::new(FixedPathGain::new(gain_db));
        }
        let mut model = V2vPathLoss::new(self.channel.scenario, self.carrier.center_frequency_ghz * 1e9);
        if let Some(blockage) = &self.channel.vehicle_blockage {
            model = model.with_vehicle_blockage(blockage.fraction, blockage.loss_db);
        }
        Box::new(model)
    }

    pub fn vehicle(&self, index: usize) -> Result<(Vector3, Vector3)> {
        let vehicle = self
            .vehicles
            .get(index)
            .ok_or_else(|| anyhow!("No vehicle {}", index))?;
        let [x, y, z] = vehicle.position;
        let [vx, vy, vz] = vehicle.velocity;
        Ok((Vector3::new(x, y, z), Vector3::new(vx, vy, vz)))
    }
}
