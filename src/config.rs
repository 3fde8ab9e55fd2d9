//! Engine configuration.

use std::time::Duration;

/// Default discoverable/advertise duration in seconds.
pub const DEFAULT_DISCOVERABLE_TIME: u64 = 120;
/// Lower clamp for the discoverable duration in seconds.
pub const MIN_DISCOVERABLE_TIME: u64 = 10;
/// Upper clamp for the discoverable duration in seconds.
pub const MAX_DISCOVERABLE_TIME: u64 = 300;

/// Configuration shared by the discovery and connection engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Also match the byte-reversed form of received identifiers.
    ///
    /// Some radio stacks report 128-bit identifiers in little-endian
    /// order; with this enabled a registration matches either form.
    pub check_little_endian_identifiers: bool,

    /// Report every discovered service, not just registered ones.
    /// Unregistered services carry an identifier-only description.
    pub notify_about_all_services: bool,

    /// How long the local device stays discoverable when advertising.
    /// Clamped to `[MIN_DISCOVERABLE_TIME, MAX_DISCOVERABLE_TIME]`.
    pub discoverable_time: Duration,

    /// Upper bound for the random delay a connector waits before dialing.
    /// Spreads out dial attempts when several discovery events for the
    /// same service arrive in quick succession.
    pub connect_jitter: Duration,

    /// Hard time budget for a refresh cycle; the engine returns to idle
    /// when it elapses.
    pub refresh_budget: Duration,

    /// Consecutive accept-loop failures tolerated before an advertised
    /// service gives up and is unadvertised.
    pub max_acceptor_restarts: u32,

    /// Per-task bound on how long shutdown waits for a cancelled task to
    /// finish.
    pub shutdown_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_little_endian_identifiers: true,
            notify_about_all_services: false,
            discoverable_time: Duration::from_secs(DEFAULT_DISCOVERABLE_TIME),
            connect_jitter: Duration::from_millis(400),
            refresh_budget: Duration::from_secs(12),
            max_acceptor_restarts: 3,
            shutdown_wait: Duration::from_secs(2),
        }
    }
}

impl EngineConfig {
    /// Set the discoverable duration, clamping to the allowed interval.
    pub fn set_discoverable_time(&mut self, seconds: u64) {
        let clamped = seconds.clamp(MIN_DISCOVERABLE_TIME, MAX_DISCOVERABLE_TIME);
        self.discoverable_time = Duration::from_secs(clamped);
    }
}
