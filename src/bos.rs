//! The orchestrator: owns the directory and is the only way to create or
//! destroy nodes.

use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::battery::{
    AggregatorBattery, Battery, BatteryKind, BatteryStatus, DEFAULT_SAMPLE_PERIOD, Driver,
    NetworkBattery, NullBattery, PhysicalBattery, PseudoBattery, SplitterBattery,
};
use crate::clock::{SharedClock, SystemClock};
use crate::directory::{BosDirectory, Lookup, Node, NodeInfo};
use crate::error::{BosError, Result};
use crate::policy::{
    PolicyKind, PolicyReport, ProportionalPolicy, SplitPlacement, SplitterPolicy, TranchePolicy,
};

/// Shortest pause between two background refreshes.
const MIN_REFRESH_PAUSE: Duration = Duration::from_millis(1);

/// Battery virtualization orchestrator.
///
/// Every node is created through a `make_*` method, which builds the node
/// outside the directory lock and then registers it with its parent links.
/// Nodes resolve each other by name through a [`Lookup`] that holds only a
/// weak reference to the directory.
pub struct Bos {
    /// Coarse topology lock. Not reentrant: it is held only for map reads
    /// and edits, never across a call into a node or policy, and nothing
    /// that runs under it calls back into the directory.
    directory: Arc<Mutex<BosDirectory>>,
    clock: SharedClock,
    sample_period: Duration,
    refreshers: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Default for Bos {
    fn default() -> Self {
        Self::new()
    }
}

impl Bos {
    /// Creates an empty orchestrator on the system clock.
    pub fn new() -> Self {
        Self::with_clock(SystemClock::shared(), DEFAULT_SAMPLE_PERIOD)
    }

    /// Creates an empty orchestrator on `clock`, giving every node
    /// `sample_period` as its staleness window and refresh period.
    pub fn with_clock(clock: SharedClock, sample_period: Duration) -> Self {
        Self {
            directory: Arc::new(Mutex::new(BosDirectory::new())),
            clock,
            sample_period,
            refreshers: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// Name resolver backed by this orchestrator's directory.
    pub fn lookup(&self) -> Lookup {
        let directory = Arc::downgrade(&self.directory);
        Lookup::new(move |name| directory.upgrade().and_then(|d| d.lock().get(name)))
    }

    fn ensure_unused(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(BosError::InvalidArgument("empty name".to_string()));
        }
        if self.directory.lock().contains(name) {
            return Err(BosError::NameTaken(name.to_string()));
        }
        Ok(())
    }

    fn register<B: Battery + 'static>(&self, battery: B, parents: &[String]) -> Result<Arc<B>> {
        let battery = Arc::new(battery);
        let node = Node::Battery(battery.clone());
        self.directory
            .lock()
            .add_node(battery.name(), node, parents)?;
        info!(battery = battery.name(), kind = %battery.kind(), ?parents, "registered battery");
        Ok(battery)
    }

    /// Creates a battery with a fixed voltage and no capacity.
    pub fn make_null(&self, name: &str, voltage: f64) -> Result<Arc<NullBattery>> {
        self.ensure_unused(name)?;
        let battery = NullBattery::new(name, voltage, self.clock.clone())
            .with_sample_period(self.sample_period);
        self.register(battery, &[])
    }

    /// Creates a battery reporting an injected status.
    pub fn make_pseudo(&self, name: &str, status: BatteryStatus) -> Result<Arc<PseudoBattery>> {
        self.ensure_unused(name)?;
        let battery = PseudoBattery::new(name, status, self.clock.clone())?
            .with_sample_period(self.sample_period);
        self.register(battery, &[])
    }

    /// Creates a battery backed by a device driver.
    pub fn make_battery(
        &self,
        name: &str,
        driver: Box<dyn Driver>,
        max_attempts: u32,
    ) -> Result<Arc<PhysicalBattery>> {
        self.ensure_unused(name)?;
        let battery = PhysicalBattery::new(name, driver, max_attempts, self.clock.clone())?
            .with_sample_period(self.sample_period);
        self.register(battery, &[])
    }

    /// Creates a proxy for battery `remote` on the peer node at `addr`.
    pub fn make_network(
        &self,
        name: &str,
        remote: &str,
        addr: impl ToSocketAddrs + std::fmt::Debug,
    ) -> Result<Arc<NetworkBattery>> {
        self.ensure_unused(name)?;
        let battery =
            NetworkBattery::connect(name, remote, addr, self.clock.clone(), self.sample_period)?;
        self.register(battery, &[])
    }

    /// Merges `sources` into one battery at `voltage`.
    ///
    /// # Errors
    ///
    /// Besides the aggregator's own checks, fails with `BatteryInUse` if a
    /// source already feeds another node.
    pub fn make_aggregator(
        &self,
        name: &str,
        sources: &[String],
        voltage: f64,
        voltage_tolerance: f64,
    ) -> Result<Arc<AggregatorBattery>> {
        self.ensure_unused(name)?;
        self.ensure_free_sources(sources)?;
        let battery = AggregatorBattery::new(
            name,
            sources.to_vec(),
            voltage,
            voltage_tolerance,
            self.lookup(),
            self.clock.clone(),
        )?
        .with_sample_period(self.sample_period);
        self.register(battery, sources)
    }

    fn ensure_free_sources(&self, sources: &[String]) -> Result<()> {
        let directory = self.directory.lock();
        for source in sources {
            match directory.get(source) {
                Some(Node::Battery(_)) if directory.is_free(source) => {}
                Some(Node::Battery(_)) => return Err(BosError::BatteryInUse(source.clone())),
                _ => return Err(BosError::BadName(source.clone())),
            }
        }
        Ok(())
    }

    /// Creates a splitter policy over `source`.
    ///
    /// `init` names a first partition: for proportional policies it is
    /// required and receives the whole source; for tranche policies it is
    /// optional and becomes a single tranche asking for everything.
    pub fn make_splitter_policy(
        &self,
        name: &str,
        kind: PolicyKind,
        source: &str,
        init: Option<&str>,
    ) -> Result<Arc<dyn SplitterPolicy>> {
        self.ensure_unused(name)?;
        if let Some(init) = init {
            self.ensure_unused(init)?;
            if init == name {
                return Err(BosError::NameTaken(init.to_string()));
            }
        }
        let sources = [source.to_string()];
        self.ensure_free_sources(&sources)?;

        let policy: Arc<dyn SplitterPolicy> = match kind {
            PolicyKind::Proportional => {
                let init = init.ok_or_else(|| {
                    BosError::InvalidArgument(
                        "a proportional policy needs an initial partition".to_string(),
                    )
                })?;
                Arc::new(ProportionalPolicy::new(name, source, init, self.lookup())?)
            }
            PolicyKind::Tranche => Arc::new(TranchePolicy::new(name, source, self.lookup())?),
        };
        self.directory
            .lock()
            .add_node(name, Node::Policy(policy.clone()), &sources)?;
        info!(policy = name, %kind, source, "registered policy");

        if let Some(init) = init {
            let registered = match kind {
                PolicyKind::Proportional => self.register_partition(init, name),
                PolicyKind::Tranche => self.get_status(source).and_then(|whole| {
                    policy.add_child(init, whole, &SplitPlacement::Position(-1))?;
                    self.register_partition(init, name)
                }),
            };
            if let Err(e) = registered {
                self.directory.lock().remove_all(&[name.to_string()]);
                return Err(e);
            }
        }
        Ok(policy)
    }

    /// Registers the handle for partition `name` and seeds its meter.
    ///
    /// Leaves the directory untouched on failure: a name lost to another
    /// caller is never removed, and a handle this call inserted is removed
    /// again if seeding fails.
    fn register_partition(&self, name: &str, policy: &str) -> Result<()> {
        let battery = SplitterBattery::new(name, policy, self.lookup(), self.clock.clone())
            .with_sample_period(self.sample_period);
        let battery = self.register(battery, &[policy.to_string()])?;
        if let Err(e) = battery.reset_meter() {
            self.directory.lock().remove_all(&[name.to_string()]);
            return Err(e);
        }
        Ok(())
    }

    /// Carves a new partition `name` out of `policy`.
    ///
    /// Returns the status the partition actually received, which may be
    /// smaller than `target`.
    pub fn make_splitter_battery(
        &self,
        name: &str,
        policy: &str,
        target: BatteryStatus,
        placement: &SplitPlacement,
    ) -> Result<BatteryStatus> {
        self.ensure_unused(name)?;
        let handle = self.policy(policy)?;
        let actual = handle.add_child(name, target, placement)?;
        if let Err(e) = self.register_partition(name, policy) {
            if let Err(undo) = handle.remove_child(name, None) {
                warn!(battery = name, error = %undo, "cannot roll back partition");
            }
            return Err(e);
        }
        Ok(actual)
    }

    pub fn battery(&self, name: &str) -> Result<Arc<dyn Battery>> {
        self.lookup().battery(name)
    }

    pub fn policy(&self, name: &str) -> Result<Arc<dyn SplitterPolicy>> {
        self.lookup().policy(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directory.lock().contains(name)
    }

    pub fn get_status(&self, name: &str) -> Result<BatteryStatus> {
        self.battery(name)?.get_status()
    }

    pub fn set_current(&self, name: &str, current: f64) -> Result<()> {
        debug!(battery = name, current, "set_current");
        self.battery(name)?.set_current(current)
    }

    pub fn refresh(&self, name: &str) -> Result<BatteryStatus> {
        self.battery(name)?.refresh()
    }

    pub fn get_meter(&self, name: &str) -> Result<f64> {
        Ok(self.battery(name)?.get_meter())
    }

    pub fn reset_meter(&self, name: &str) -> Result<()> {
        self.battery(name)?.reset_meter()
    }

    /// Actual state of charge minus the meter of `name`.
    pub fn credit(&self, name: &str) -> Result<f64> {
        self.battery(name)?.credit()
    }

    pub fn policy_report(&self, name: &str) -> Result<PolicyReport> {
        self.policy(name)?.report()
    }

    pub fn list(&self) -> Vec<NodeInfo> {
        self.directory.lock().list()
    }

    pub fn get_parents(&self, name: &str) -> Result<Vec<String>> {
        self.directory.lock().get_parents(name)
    }

    pub fn get_children(&self, name: &str) -> Result<Vec<String>> {
        self.directory.lock().get_children(name)
    }

    /// Starts a thread that refreshes `name` once per sample period.
    ///
    /// The thread exits on its own once the battery is freed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if a refresh loop for `name` is already running.
    pub fn start_background_refresh(&self, name: &str) -> Result<()> {
        let period = self.battery(name)?.sample_period().max(MIN_REFRESH_PAUSE);
        let mut refreshers = self.refreshers.lock();
        if refreshers.contains_key(name) {
            return Err(BosError::InvalidArgument(format!(
                "background refresh of \"{name}\" is already running"
            )));
        }

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let lookup = self.lookup();
        let owned = name.to_string();
        thread::Builder::new()
            .name(format!("bos-refresh-{name}"))
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match lookup.battery(&owned) {
                        Ok(battery) => {
                            if let Err(e) = battery.refresh() {
                                warn!(battery = %owned, error = %e, "background refresh failed");
                            }
                        }
                        Err(_) => break,
                    }
                    thread::sleep(period);
                }
                debug!(battery = %owned, "background refresh stopped");
            })?;
        refreshers.insert(name.to_string(), running);
        info!(battery = name, ?period, "background refresh started");
        Ok(())
    }

    /// Asks the refresh loop of `name` to stop on its next wake.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if no refresh loop is running for `name`.
    pub fn stop_background_refresh(&self, name: &str) -> Result<()> {
        match self.refreshers.lock().remove(name) {
            Some(flag) => {
                flag.store(false, Ordering::SeqCst);
                info!(battery = name, "background refresh stopping");
                Ok(())
            }
            None => Err(BosError::InvalidArgument(format!(
                "no background refresh running for \"{name}\""
            ))),
        }
    }

    pub fn is_refreshing(&self, name: &str) -> bool {
        self.refreshers.lock().contains_key(name)
    }

    /// Removes `name` and every node drawing from it.
    ///
    /// The subtree is reserved in the directory first, so it cannot change
    /// while partitions are unhooked from their policy. Nothing is removed
    /// and no refresh loop is stopped unless every check passes.
    ///
    /// # Errors
    ///
    /// - `BadName` if `name` does not exist
    /// - `BatteryInUse` if a child has children of its own, if a partition
    ///   being removed still carries current, or if another removal already
    ///   holds part of the subtree
    pub fn free_battery(&self, name: &str) -> Result<()> {
        let (plan, root, parents) = {
            let mut directory = self.directory.lock();
            let root = directory
                .get(name)
                .ok_or_else(|| BosError::BadName(name.to_string()))?;
            let parents = directory.get_parents(name)?;
            (directory.reserve_teardown(name)?, root, parents)
        };

        if let Err(e) = self.detach(name, &root, &parents, &plan) {
            self.directory.lock().release(&plan);
            return Err(e);
        }

        {
            let mut refreshers = self.refreshers.lock();
            for node in &plan {
                if let Some(flag) = refreshers.remove(node) {
                    flag.store(false, Ordering::SeqCst);
                }
            }
        }

        self.directory.lock().remove_all(&plan);
        info!(battery = name, removed = ?plan, "freed");
        Ok(())
    }

    /// Unhooks a reserved subtree root from the policies it belongs to.
    fn detach(&self, name: &str, root: &Node, parents: &[String], plan: &[String]) -> Result<()> {
        match root {
            Node::Policy(policy) => {
                if let Some(busy) = policy.report()?.parts.iter().find(|p| p.current != 0.0) {
                    return Err(BosError::BatteryInUse(busy.name.clone()));
                }
            }
            Node::Battery(battery) if battery.kind() == BatteryKind::Splitter => {
                for parent in parents.iter().filter(|p| !plan.contains(*p)) {
                    self.policy(parent)?.remove_child(name, None)?;
                }
            }
            Node::Battery(_) => {}
        }
        Ok(())
    }
}

impl Drop for Bos {
    fn drop(&mut self) {
        for flag in self.refreshers.get_mut().values() {
            flag.store(false, Ordering::SeqCst);
        }
    }
}
