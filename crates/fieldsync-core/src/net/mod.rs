//! Connection quality monitoring.
//!
//! The engine never probes the network itself. The host platform reports
//! transitions (airplane mode, wifi to cellular, a measured round trip) and
//! the monitor fans the current classification out to subscribers. The sync
//! engine reads it to gate run starts and to scale per-phase concurrency.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::Error;

/// Round trips under this are a healthy link.
const GOOD_RTT_CEILING_MS: u64 = 200;
/// Round trips under this are usable but degraded.
const MODERATE_RTT_CEILING_MS: u64 = 750;

/// Coarse link classification fed by the host platform.
///
/// Ordered worst to best so comparisons read naturally
/// (`quality >= ConnectionQuality::Moderate`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Offline,
    Poor,
    Moderate,
    Good,
}

impl ConnectionQuality {
    /// Whether a sync run can be attempted at all on this link.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        !matches!(self, Self::Offline)
    }

    /// Scale a configured concurrency ceiling to what the link can carry.
    ///
    /// A poor link is serialized, a moderate one halved, a good one runs at
    /// the configured limit. Offline yields zero slots.
    #[must_use]
    pub fn parallel_hint(self, base: usize) -> usize {
        match self {
            Self::Offline => 0,
            Self::Poor => 1,
            Self::Moderate => (base / 2).max(1),
            Self::Good => base,
        }
    }

    /// Classify a measured round-trip time.
    ///
    /// A measurement implies the link answered, so this never returns
    /// `Offline`.
    #[must_use]
    pub const fn from_rtt_ms(rtt_ms: u64) -> Self {
        if rtt_ms < GOOD_RTT_CEILING_MS {
            Self::Good
        } else if rtt_ms < MODERATE_RTT_CEILING_MS {
            Self::Moderate
        } else {
            Self::Poor
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Poor => "poor",
            Self::Moderate => "moderate",
            Self::Good => "good",
        }
    }
}

impl fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionQuality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(Self::Offline),
            "poor" => Ok(Self::Poor),
            "moderate" => Ok(Self::Moderate),
            "good" => Ok(Self::Good),
            other => Err(Error::Validation(format!(
                "unknown connection quality: {other}"
            ))),
        }
    }
}

/// Shared, cloneable monitor holding the last reported link quality.
///
/// All clones observe the same state. Subscribers get a watch receiver;
/// dropping it unsubscribes.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    sender: Arc<watch::Sender<ConnectionQuality>>,
}

impl NetworkMonitor {
    /// Create a monitor with a known starting classification.
    #[must_use]
    pub fn new(initial: ConnectionQuality) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a monitor that assumes no connectivity until told otherwise.
    #[must_use]
    pub fn offline() -> Self {
        Self::new(ConnectionQuality::Offline)
    }

    /// Record a host-reported classification. No-op when unchanged.
    pub fn report(&self, quality: ConnectionQuality) {
        let previous = *self.sender.borrow();
        if previous == quality {
            return;
        }
        self.sender.send_replace(quality);
        tracing::info!("Network quality changed: {previous} -> {quality}");
    }

    /// Record a measured round-trip time.
    pub fn report_rtt_ms(&self, rtt_ms: u64) {
        self.report(ConnectionQuality::from_rtt_ms(rtt_ms));
    }

    /// The last reported classification.
    #[must_use]
    pub fn quality(&self) -> ConnectionQuality {
        *self.sender.borrow()
    }

    /// Whether the last report allows sync attempts.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.quality().is_usable()
    }

    /// Watch for classification changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionQuality> {
        self.sender.subscribe()
    }

    /// Suspend until the link is usable, returning the quality that woke us.
    pub async fn wait_until_usable(&self) -> ConnectionQuality {
        let mut receiver = self.sender.subscribe();
        loop {
            let current = *receiver.borrow_and_update();
            if current.is_usable() {
                return current;
            }
            if receiver.changed().await.is_err() {
                return ConnectionQuality::Offline;
            }
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::offline()
    }
}
