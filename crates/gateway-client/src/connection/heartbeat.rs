//! Heartbeat liveness loop
//!
//! Sends a heartbeat every interval and expects an acknowledgement shortly after. The
//! event loop feeds server requests and acks in over a single-slot channel.

use crate::error::GatewayError;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Signal from the event loop to the heartbeat monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSignal {
    /// The server asked for a heartbeat now
    Requested,
    /// The server acknowledged the last heartbeat
    Acked,
}

/// How the monitor reaches the connection
#[async_trait]
pub trait HeartbeatDriver: Send + Sync {
    /// Send one heartbeat carrying the last known sequence
    async fn send_heartbeat(&self) -> Result<(), GatewayError>;

    /// Start a resuming reconnect that outlives the monitor
    fn request_reconnect(&self);

    /// Round trip of an acknowledged heartbeat
    fn acknowledged(&self, _latency: Duration) {}
}

/// Why the monitor stopped
#[derive(Debug)]
pub enum HeartbeatOutcome {
    Cancelled,
    /// Every attempt went unacknowledged; a reconnect was requested
    Unacknowledged { attempts: u8 },
    /// Sending a heartbeat failed
    Failed(GatewayError),
}

/// Periodic heartbeat loop for one connection
pub struct HeartbeatMonitor {
    interval: Duration,
    ack_timeout: Duration,
    max_attempts: u8,
    immediate_first: bool,
    signals: mpsc::Receiver<HeartbeatSignal>,
}

enum Wake {
    Elapsed,
    Requested,
    Cancelled,
}

enum AckWait {
    Acked(Duration),
    TimedOut,
    Resend,
    Cancelled,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(interval: Duration, signals: mpsc::Receiver<HeartbeatSignal>) -> Self {
        Self {
            interval,
            ack_timeout: Duration::from_secs(3),
            max_attempts: 3,
            immediate_first: false,
            signals,
        }
    }

    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Skip the jitter and beat right away, used when resuming
    #[must_use]
    pub fn immediate_first(mut self, immediate: bool) -> Self {
        self.immediate_first = immediate;
        self
    }

    fn first_delay(&self) -> Duration {
        if self.immediate_first {
            Duration::ZERO
        } else {
            self.interval.mul_f64(rand::thread_rng().gen::<f64>())
        }
    }

    /// Run until cancelled or the server stops acknowledging
    pub async fn run<D>(mut self, driver: &D, token: CancellationToken) -> HeartbeatOutcome
    where
        D: HeartbeatDriver + ?Sized,
    {
        let mut delay = self.first_delay();
        debug!(
            interval_ms = self.interval.as_millis(),
            first_delay_ms = delay.as_millis(),
            "Heartbeat started"
        );

        loop {
            match self.wait(delay, &token).await {
                Wake::Cancelled => return HeartbeatOutcome::Cancelled,
                Wake::Elapsed => trace!("Heartbeat interval elapsed"),
                Wake::Requested => debug!("Heartbeat requested by server"),
            }
            delay = self.interval;

            let mut attempts = 0_u8;
            loop {
                let sent_at = Instant::now();
                let sent = tokio::select! {
                    biased;
                    () = token.cancelled() => return HeartbeatOutcome::Cancelled,
                    r = driver.send_heartbeat() => r,
                };
                match sent {
                    Ok(()) => {}
                    Err(GatewayError::Cancelled) => return HeartbeatOutcome::Cancelled,
                    Err(e) => return HeartbeatOutcome::Failed(e),
                }

                match self.wait_for_ack(sent_at, &token).await {
                    AckWait::Cancelled => return HeartbeatOutcome::Cancelled,
                    AckWait::Acked(latency) => {
                        trace!(latency_ms = latency.as_millis(), "Heartbeat acknowledged");
                        driver.acknowledged(latency);
                        break;
                    }
                    AckWait::Resend => {}
                    AckWait::TimedOut => {
                        attempts += 1;
                        warn!(attempts, max = self.max_attempts, "Heartbeat not acknowledged");
                        if attempts >= self.max_attempts {
                            driver.request_reconnect();
                            return HeartbeatOutcome::Unacknowledged { attempts };
                        }
                    }
                }
            }
        }
    }

    async fn wait(&mut self, delay: Duration, token: &CancellationToken) -> Wake {
        let deadline = tokio::time::sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => return Wake::Cancelled,
                signal = self.signals.recv() => match signal {
                    Some(HeartbeatSignal::Requested) => return Wake::Requested,
                    Some(HeartbeatSignal::Acked) => debug!("Ignoring ack with no heartbeat in flight"),
                    None => return Wake::Cancelled,
                },
                () = &mut deadline => return Wake::Elapsed,
            }
        }
    }

    async fn wait_for_ack(&mut self, sent_at: Instant, token: &CancellationToken) -> AckWait {
        let deadline = tokio::time::sleep_until(sent_at + self.ack_timeout);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            () = token.cancelled() => AckWait::Cancelled,
            signal = self.signals.recv() => match signal {
                Some(HeartbeatSignal::Acked) => AckWait::Acked(sent_at.elapsed()),
                Some(HeartbeatSignal::Requested) => AckWait::Resend,
                None => AckWait::Cancelled,
            },
            () = &mut deadline => AckWait::TimedOut,
        }
    }
}
