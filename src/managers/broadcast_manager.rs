// BroadcastChannelManager: Centralized tokio broadcast channel management
// Single Responsibility: Broadcast channel ownership, publishing and subscription

use tokio::sync::broadcast;

use crate::analysis::scoring::Judgement;
use crate::analysis::MonitorSnapshot;
use crate::engine::ClickPulse;

/// Click buffer: a whole 30 s session at 120 BPM is 64 clicks
const CLICK_CAPACITY: usize = 64;
/// Lagging subscribers lose the oldest judgements, never block grading
const JUDGEMENT_CAPACITY: usize = 100;
/// Only the latest snapshot matters to a display
const MONITOR_CAPACITY: usize = 32;

/// Owns the display-layer broadcast channels
///
/// Single Responsibility: Broadcast channel ownership and subscription
///
/// # Channel Types
/// - Clicks: One pulse per metronome click (countdown and beats)
/// - Judgements: Every graded response, in grading order
/// - Monitor: Loudness, dominant frequencies and hit indicator per analyzed frame
///
/// Publishing never fails: with no subscribers the message is discarded.
pub struct BroadcastChannelManager {
    clicks: broadcast::Sender<ClickPulse>,
    judgements: broadcast::Sender<Judgement>,
    monitor: broadcast::Sender<MonitorSnapshot>,
}

impl BroadcastChannelManager {
    pub fn new() -> Self {
        Self {
            clicks: broadcast::channel(CLICK_CAPACITY).0,
            judgements: broadcast::channel(JUDGEMENT_CAPACITY).0,
            monitor: broadcast::channel(MONITOR_CAPACITY).0,
        }
    }

    // ========================================================================
    // CLICK CHANNEL
    // ========================================================================

    /// Returns how many subscribers received the pulse
    pub fn publish_click(&self, pulse: ClickPulse) -> usize {
        self.clicks.send(pulse).unwrap_or(0)
    }

    pub fn subscribe_clicks(&self) -> broadcast::Receiver<ClickPulse> {
        self.clicks.subscribe()
    }

    // ========================================================================
    // JUDGEMENT CHANNEL
    // ========================================================================

    pub fn publish_judgement(&self, judgement: Judgement) -> usize {
        self.judgements.send(judgement).unwrap_or(0)
    }

    pub fn subscribe_judgements(&self) -> broadcast::Receiver<Judgement> {
        self.judgements.subscribe()
    }

    // ========================================================================
    // MONITOR CHANNEL
    // ========================================================================

    /// Sender handed to the analysis thread, which publishes per frame
    pub fn monitor_sender(&self) -> broadcast::Sender<MonitorSnapshot> {
        self.monitor.clone()
    }

    pub fn subscribe_monitor(&self) -> broadcast::Receiver<MonitorSnapshot> {
        self.monitor.subscribe()
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
