//! TickScheduler - cancellable periodic tick source for the beat clock
//!
//! The scheduler owns a dedicated thread running a current-thread Tokio
//! runtime. Each period it hands the scheduled instant to a [`TickSink`];
//! the sink normally forwards it onto the session's event queue, so ticks
//! are consumed by the same single-threaded loop as every other event.
//!
//! Ticks never overlap: the next one is not produced until the sink returns.
//! `cancel()` resolves the oneshot the loop is racing against and joins the
//! thread, so no tick is delivered after it returns.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

/// Receiver of scheduled ticks
pub trait TickSink: Send + 'static {
    /// Deliver one tick. Returning false stops the scheduler.
    fn on_tick(&mut self, at: Instant) -> bool;
}

/// Handle to a running tick thread
pub struct TickScheduler {
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl TickScheduler {
    /// Start ticking every `period`, first tick one period from now.
    ///
    /// # Errors
    /// Returns the OS error if the scheduler thread cannot be spawned.
    pub fn spawn<S: TickSink>(period: Duration, mut sink: S) -> io::Result<Self> {
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("beat-clock".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        tracing::error!("[TickScheduler] Failed to build runtime: {}", err);
                        return;
                    }
                };

                rt.block_on(async move {
                    let start = tokio::time::Instant::now() + period;
                    let mut interval = tokio::time::interval_at(start, period);

                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut cancel_rx => break,
                            scheduled = interval.tick() => {
                                if !sink.on_tick(scheduled.into_std()) {
                                    tracing::debug!("[TickScheduler] Sink closed, stopping");
                                    break;
                                }
                            }
                        }
                    }
                });
            })?;

        tracing::debug!("[TickScheduler] Ticking every {:?}", period);

        Ok(Self {
            cancel_tx: Some(cancel_tx),
            handle: Some(handle),
            period,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_active(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop ticking and wait for the thread to exit. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            // Err means the loop already exited on its own
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::warn!("[TickScheduler] Tick thread panicked");
            }
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
