//! TOML-based topology configuration and preset definitions.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::battery::driver::SimulatedDriver;
use crate::battery::physical::DEFAULT_MAX_ATTEMPTS;
use crate::battery::BatteryStatus;
use crate::bos::Bos;
use crate::policy::{PolicyKind, SplitPlacement};

/// Top-level topology configuration parsed from TOML.
///
/// Batteries are created in file order, so every node must be declared
/// after the nodes it draws from. Load from TOML with
/// [`TopologyConfig::from_toml_file`] or start from a preset such as
/// [`TopologyConfig::demo`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    /// Node-wide settings.
    #[serde(default)]
    pub node: NodeConfig,
    /// Nodes in creation order (`[[battery]]` tables).
    #[serde(default, rename = "battery")]
    pub batteries: Vec<BatteryConfig>,
}

/// Node-wide settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Address for the node protocol listener; no listener when absent.
    pub listen: Option<String>,
    /// Staleness window and background refresh period (ms, must be > 0).
    pub sample_period_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: None,
            sample_period_ms: 1000,
        }
    }
}

impl NodeConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// One `[[battery]]` entry, tagged by `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatteryConfig {
    /// Fixed voltage, no capacity.
    Null {
        name: String,
        voltage: f64,
        #[serde(default)]
        background_refresh: bool,
    },
    /// Injected status.
    Pseudo {
        name: String,
        status: BatteryStatus,
        #[serde(default)]
        background_refresh: bool,
    },
    /// Physical battery backed by the simulated device driver.
    Simulated {
        name: String,
        status: BatteryStatus,
        /// Charge noise per hour (Ah).
        #[serde(default)]
        noise_std: f64,
        #[serde(default)]
        seed: u64,
        #[serde(default = "default_max_attempts")]
        max_attempts: u32,
        #[serde(default)]
        background_refresh: bool,
    },
    /// Proxy for battery `remote` on the peer node at `address`.
    Network {
        name: String,
        remote: String,
        address: String,
        #[serde(default)]
        background_refresh: bool,
    },
    Aggregator {
        name: String,
        sources: Vec<String>,
        voltage: f64,
        voltage_tolerance: f64,
        #[serde(default)]
        background_refresh: bool,
    },
    /// A splitter policy; `init` names its first partition.
    SplitterPolicy {
        name: String,
        policy: PolicyKind,
        source: String,
        #[serde(default)]
        init: Option<String>,
    },
    /// A partition of `policy`, split `from` another partition
    /// (proportional) or inserted at `position` (tranche).
    Splitter {
        name: String,
        policy: String,
        status: BatteryStatus,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        position: Option<isize>,
        #[serde(default)]
        background_refresh: bool,
    },
}

impl BatteryConfig {
    pub fn name(&self) -> &str {
        match self {
            Self::Null { name, .. }
            | Self::Pseudo { name, .. }
            | Self::Simulated { name, .. }
            | Self::Network { name, .. }
            | Self::Aggregator { name, .. }
            | Self::SplitterPolicy { name, .. }
            | Self::Splitter { name, .. } => name,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null { .. } => "null",
            Self::Pseudo { .. } => "pseudo",
            Self::Simulated { .. } => "simulated",
            Self::Network { .. } => "network",
            Self::Aggregator { .. } => "aggregator",
            Self::SplitterPolicy { .. } => "splitter_policy",
            Self::Splitter { .. } => "splitter",
        }
    }

    pub fn background_refresh(&self) -> bool {
        match self {
            Self::Null { background_refresh, .. }
            | Self::Pseudo { background_refresh, .. }
            | Self::Simulated { background_refresh, .. }
            | Self::Network { background_refresh, .. }
            | Self::Aggregator { background_refresh, .. }
            | Self::Splitter { background_refresh, .. } => *background_refresh,
            Self::SplitterPolicy { .. } => false,
        }
    }

    /// Extra battery names this entry declares besides its own.
    fn declared_partitions(&self) -> Option<&str> {
        match self {
            Self::SplitterPolicy { init, .. } => init.as_deref(),
            _ => None,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"battery[2].sources"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

/// What a declared name refers to, for reference checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Declared {
    Battery,
    Policy(PolicyKind),
}

fn pack(voltage: f64, soc: f64, capacity: f64, rate: f64) -> BatteryStatus {
    BatteryStatus::new(voltage, 0.0, soc, capacity, rate, rate)
}

impl TopologyConfig {
    /// Two identical packs aggregated and then split proportionally between
    /// two tenants.
    pub fn demo() -> Self {
        Self {
            node: NodeConfig::default(),
            batteries: vec![
                BatteryConfig::Pseudo {
                    name: "pack_a".to_string(),
                    status: pack(7000.0, 500.0, 1000.0, 12.0),
                    background_refresh: false,
                },
                BatteryConfig::Pseudo {
                    name: "pack_b".to_string(),
                    status: pack(7000.0, 500.0, 1000.0, 12.0),
                    background_refresh: false,
                },
                BatteryConfig::Aggregator {
                    name: "bank".to_string(),
                    sources: vec!["pack_a".to_string(), "pack_b".to_string()],
                    voltage: 7000.0,
                    voltage_tolerance: 500.0,
                    background_refresh: false,
                },
                BatteryConfig::SplitterPolicy {
                    name: "bank_split".to_string(),
                    policy: PolicyKind::Proportional,
                    source: "bank".to_string(),
                    init: Some("tenant_a".to_string()),
                },
                BatteryConfig::Splitter {
                    name: "tenant_b".to_string(),
                    policy: "bank_split".to_string(),
                    status: pack(7000.0, 250.0, 500.0, 6.0),
                    from: Some("tenant_a".to_string()),
                    position: None,
                    background_refresh: false,
                },
            ],
        }
    }

    /// A simulated cell served as a priority waterfall.
    pub fn tranche() -> Self {
        Self {
            node: NodeConfig::default(),
            batteries: vec![
                BatteryConfig::Simulated {
                    name: "cell".to_string(),
                    status: pack(3700.0, 80.0, 100.0, 12.0),
                    noise_std: 0.01,
                    seed: 42,
                    max_attempts: DEFAULT_MAX_ATTEMPTS,
                    background_refresh: true,
                },
                BatteryConfig::SplitterPolicy {
                    name: "waterfall".to_string(),
                    policy: PolicyKind::Tranche,
                    source: "cell".to_string(),
                    init: None,
                },
                BatteryConfig::Splitter {
                    name: "priority".to_string(),
                    policy: "waterfall".to_string(),
                    status: pack(3700.0, 50.0, 60.0, 5.0),
                    from: None,
                    position: Some(-1),
                    background_refresh: false,
                },
                BatteryConfig::Splitter {
                    name: "bulk".to_string(),
                    policy: "waterfall".to_string(),
                    status: pack(3700.0, 100.0, 100.0, 10.0),
                    from: None,
                    position: Some(-1),
                    background_refresh: false,
                },
            ],
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["demo", "tranche"];

    /// Loads a topology from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "demo" => Ok(Self::demo()),
            "tranche" => Ok(Self::tranche()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a topology from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "topology".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a topology from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all entries and returns a list of errors.
    ///
    /// Returns an empty vector if the topology can be built.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |field: String, message: String| errors.push(ConfigError { field, message });

        if self.node.sample_period_ms == 0 {
            push("node.sample_period_ms".into(), "must be > 0".into());
        }
        if let Some(listen) = &self.node.listen {
            if listen.parse::<SocketAddr>().is_err() {
                push(
                    "node.listen".into(),
                    format!("\"{listen}\" is not a socket address"),
                );
            }
        }

        let mut declared: HashMap<&str, Declared> = HashMap::new();
        let mut used_sources: HashSet<String> = HashSet::new();
        for (i, entry) in self.batteries.iter().enumerate() {
            let at = |field: &str| format!("battery[{i}].{field}");
            let name = entry.name();
            if name.is_empty() {
                push(at("name"), "must not be empty".into());
            }
            for declared_name in std::iter::once(name).chain(entry.declared_partitions()) {
                if declared.contains_key(declared_name) {
                    push(at("name"), format!("\"{declared_name}\" is declared twice"));
                }
            }

            let mut source_ref = |field: &str, source: &str, push: &mut dyn FnMut(String, String)| {
                match declared.get(source) {
                    Some(Declared::Battery) => {
                        if !used_sources.insert(source.to_string()) {
                            push(at(field), format!("\"{source}\" already feeds another node"));
                        }
                    }
                    Some(Declared::Policy(_)) => {
                        push(at(field), format!("\"{source}\" is a policy, not a battery"));
                    }
                    None => push(at(field), format!("\"{source}\" is not declared above")),
                }
            };

            match entry {
                BatteryConfig::Null { .. } | BatteryConfig::Network { .. } => {}
                BatteryConfig::Pseudo { status, .. } => {
                    if let Err(e) = status.validate() {
                        push(at("status"), e.to_string());
                    }
                }
                BatteryConfig::Simulated {
                    status,
                    noise_std,
                    max_attempts,
                    ..
                } => {
                    if let Err(e) = status.validate() {
                        push(at("status"), e.to_string());
                    }
                    if *noise_std < 0.0 {
                        push(at("noise_std"), "must be >= 0".into());
                    }
                    if *max_attempts == 0 {
                        push(at("max_attempts"), "must be > 0".into());
                    }
                }
                BatteryConfig::Aggregator {
                    sources,
                    voltage_tolerance,
                    ..
                } => {
                    if sources.is_empty() {
                        push(at("sources"), "must name at least one battery".into());
                    }
                    for source in sources {
                        source_ref("sources", source, &mut push);
                    }
                    if *voltage_tolerance < 0.0 {
                        push(at("voltage_tolerance"), "must be >= 0".into());
                    }
                }
                BatteryConfig::SplitterPolicy {
                    policy,
                    source,
                    init,
                    ..
                } => {
                    source_ref("source", source, &mut push);
                    if *policy == PolicyKind::Proportional && init.is_none() {
                        push(at("init"), "required for proportional policies".into());
                    }
                }
                BatteryConfig::Splitter {
                    policy,
                    status,
                    from,
                    position,
                    ..
                } => {
                    if let Err(e) = status.validate() {
                        push(at("status"), e.to_string());
                    }
                    match declared.get(policy.as_str()) {
                        Some(Declared::Policy(PolicyKind::Proportional)) => {
                            if from.is_none() || position.is_some() {
                                push(at("from"), "proportional partitions need `from` only".into());
                            }
                        }
                        Some(Declared::Policy(PolicyKind::Tranche)) => {
                            if position.is_none() || from.is_some() {
                                push(at("position"), "tranches need `position` only".into());
                            }
                            if position.is_some_and(|p| p < -1) {
                                push(at("position"), "must be >= -1".into());
                            }
                        }
                        Some(Declared::Battery) => {
                            push(at("policy"), format!("\"{policy}\" is not a policy"));
                        }
                        None => push(at("policy"), format!("\"{policy}\" is not declared above")),
                    }
                }
            }

            match entry {
                BatteryConfig::SplitterPolicy { policy, init, .. } => {
                    declared.insert(name, Declared::Policy(*policy));
                    if let Some(init) = init {
                        declared.insert(init.as_str(), Declared::Battery);
                    }
                }
                _ => {
                    declared.insert(name, Declared::Battery);
                }
            }
        }

        errors
    }

    /// Creates every configured node on `bos`, in file order.
    ///
    /// # Errors
    ///
    /// Stops at the first node that cannot be created; nodes created before
    /// it are left in place.
    pub fn build(&self, bos: &Bos) -> crate::error::Result<()> {
        for entry in &self.batteries {
            let name = entry.name();
            match entry {
                BatteryConfig::Null { voltage, .. } => {
                    bos.make_null(name, *voltage)?;
                }
                BatteryConfig::Pseudo { status, .. } => {
                    bos.make_pseudo(name, *status)?;
                }
                BatteryConfig::Simulated {
                    status,
                    noise_std,
                    seed,
                    max_attempts,
                    ..
                } => {
                    let driver = SimulatedDriver::new(*status, bos.clock().clone(), *noise_std, *seed);
                    bos.make_battery(name, Box::new(driver), *max_attempts)?;
                }
                BatteryConfig::Network {
                    remote, address, ..
                } => {
                    bos.make_network(name, remote, address.as_str())?;
                }
                BatteryConfig::Aggregator {
                    sources,
                    voltage,
                    voltage_tolerance,
                    ..
                } => {
                    bos.make_aggregator(name, sources, *voltage, *voltage_tolerance)?;
                }
                BatteryConfig::SplitterPolicy {
                    policy,
                    source,
                    init,
                    ..
                } => {
                    bos.make_splitter_policy(name, *policy, source, init.as_deref())?;
                }
                BatteryConfig::Splitter {
                    policy,
                    status,
                    from,
                    position,
                    ..
                } => {
                    let placement = match (from, position) {
                        (Some(from), _) => SplitPlacement::From(from.clone()),
                        (None, Some(pos)) => SplitPlacement::Position(*pos),
                        (None, None) => SplitPlacement::Position(-1),
                    };
                    let actual = bos.make_splitter_battery(name, policy, *status, &placement)?;
                    info!(battery = name, %actual, "partition created");
                }
            }
            if entry.background_refresh() {
                bos.start_background_refresh(name)?;
            }
        }
        Ok(())
    }
}
