//! Reachability probing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, trace};

use crate::domain::Reachability;

/// Publishes network reachability by periodically connecting to a TCP address.
///
/// The probe loop runs until [`stop`](Self::stop) is called, the monitor is
/// dropped, or every receiver of the published channel is gone.
#[derive(Debug)]
pub struct TcpPathMonitor {
    addr: String,
    interval: Duration,
    timeout: Duration,
    running: Arc<AtomicBool>,
}

impl TcpPathMonitor {
    /// Creates a monitor for `addr` (`host:port`); nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(addr: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            interval,
            timeout,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects once to `addr`; anything other than an established connection
    /// within `timeout` counts as unreachable.
    pub async fn probe(addr: &str, timeout_after: Duration) -> Reachability {
        match timeout(timeout_after, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Reachability::Reachable,
            Ok(Err(e)) => {
                trace!(addr, error = %e, "Probe connect failed");
                Reachability::Unreachable
            }
            Err(_) => {
                trace!(addr, "Probe timed out");
                Reachability::Unreachable
            }
        }
    }

    /// Starts probing and returns the reachability channel.
    pub fn start(&self) -> (watch::Receiver<Reachability>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(Reachability::Unknown);
        let addr = self.addr.clone();
        let period = self.interval;
        let timeout_after = self.timeout;
        let running = self.running.clone();

        running.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    () = tx.closed() => break,
                    _ = ticker.tick() => {}
                }

                let state = Self::probe(&addr, timeout_after).await;
                let changed = tx.send_if_modified(|current| {
                    if *current == state {
                        false
                    } else {
                        *current = state;
                        true
                    }
                });
                if changed {
                    info!(addr = %addr, state = ?state, "Reachability changed");
                }
            }

            debug!("Path monitor stopped");
        });

        (rx, handle)
    }

    /// Stops the probe loop after its current probe.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Drop for TcpPathMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
