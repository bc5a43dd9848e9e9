use tokio::sync::{broadcast, watch};

use super::{ClickPulse, SessionSnapshot, TrainingSession};
use crate::analysis::scoring::Judgement;
use crate::analysis::{HitObserver, MonitorSnapshot, ObserverId};
use crate::error::SessionError;

impl TrainingSession {
    // ========================================================================
    // STREAM SUBSCRIPTIONS
    // ========================================================================

    /// Latest session snapshot; the receiver is notified on every change.
    pub fn subscribe_snapshots(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_clicks(&self) -> broadcast::Receiver<ClickPulse> {
        self.broadcasts.subscribe_clicks()
    }

    pub fn subscribe_judgements(&self) -> broadcast::Receiver<Judgement> {
        self.broadcasts.subscribe_judgements()
    }

    /// Loudness, dominant frequencies and hit indicator while capturing.
    pub fn subscribe_monitor(&self) -> broadcast::Receiver<MonitorSnapshot> {
        self.broadcasts.subscribe_monitor()
    }

    // ========================================================================
    // HIT OBSERVERS
    // ========================================================================

    /// Register an observer for raw acoustic hits.
    ///
    /// Observers run on the analysis thread and see every hit, including
    /// those the session later ignores.
    pub fn subscribe_hits(&self, observer: Box<dyn HitObserver>) -> Result<ObserverId, SessionError> {
        Ok(self.hit_subscribers.subscribe(observer)?)
    }

    pub fn unsubscribe_hits(&self, id: ObserverId) -> Result<bool, SessionError> {
        Ok(self.hit_subscribers.unsubscribe(id)?)
    }
}
