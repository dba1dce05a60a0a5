use std::net::ToSocketAddrs;
use std::time::Duration;

use parking_lot::Mutex;

use super::{Battery, BatteryKind, BatteryStatus, Meter};
use crate::clock::SharedClock;
use crate::error::Result;
use crate::net::NodeClient;

/// Proxy for a battery hosted by a peer node.
///
/// Reads are served from a cache that is refreshed lazily once it is a
/// sample period old.
pub struct NetworkBattery {
    name: String,
    /// Name of the battery on the peer.
    remote: String,
    client: Mutex<NodeClient>,
    meter: Meter,
    /// Last status received and the clock reading it arrived at.
    cache: Mutex<(BatteryStatus, f64)>,
    sample_period: Duration,
}

impl NetworkBattery {
    /// Connects to the peer at `addr` and fetches the initial status of `remote`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the peer cannot be reached, and `ServerError`
    /// or `BadResponse` if the first status request fails.
    pub fn connect(
        name: impl Into<String>,
        remote: impl Into<String>,
        addr: impl ToSocketAddrs + std::fmt::Debug,
        clock: SharedClock,
        sample_period: Duration,
    ) -> Result<Self> {
        let remote = remote.into();
        let mut client = NodeClient::connect(addr)?;
        let status = client.get_status(&remote)?;
        let now = clock.now();
        Ok(Self {
            name: name.into(),
            remote,
            client: Mutex::new(client),
            meter: Meter::new(clock, status.state_of_charge),
            cache: Mutex::new((status, now)),
            sample_period,
        })
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }
}

impl Battery for NetworkBattery {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BatteryKind {
        BatteryKind::Network
    }

    fn meter(&self) -> &Meter {
        &self.meter
    }

    fn sample_period(&self) -> Duration {
        self.sample_period
    }

    fn refresh(&self) -> Result<BatteryStatus> {
        let _node = self.meter.lock();
        let status = self.client.lock().get_status(&self.remote)?;
        *self.cache.lock() = (status, self.meter.clock().now());
        self.meter.observe(status.current);
        Ok(status)
    }

    fn get_status(&self) -> Result<BatteryStatus> {
        let _node = self.meter.lock();
        let (cached, received) = *self.cache.lock();
        if self.meter.clock().now() - received >= self.sample_period.as_secs_f64() {
            return self.refresh();
        }
        self.meter.observe(cached.current);
        Ok(cached)
    }

    fn set_current(&self, target: f64) -> Result<()> {
        let _node = self.meter.lock();
        let status = self.get_status()?;
        status.check_current(target)?;
        self.client.lock().set_current(&self.remote, target)?;
        self.cache.lock().0.current = target;
        self.meter.update(status.current, target);
        Ok(())
    }
}
