//! Keepalive for chat and presence sockets.
//!
//! Each connection reads against a deadline of `pong_wait` from its last
//! inbound frame (pongs included). A ticker pings the peer every
//! `ping_period`, which is shorter than `pong_wait`, so a responsive client
//! always answers before the deadline passes. A silent peer hits the deadline
//! and the read loop ends, taking the same cleanup path as an explicit close.

use axum::extract::ws::Message;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};

use crate::ws::ConnectionHandle;

/// Default read deadline.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

const PING_PAYLOAD: &[u8] = b"ping";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    pub pong_wait: Duration,
    pub ping_period: Duration,
}

impl LivenessConfig {
    /// Ping at nine tenths of the read deadline.
    pub fn from_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: pong_wait * 9 / 10,
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::from_pong_wait(DEFAULT_PONG_WAIT)
    }
}

/// Read deadline for one connection.
#[derive(Debug)]
pub struct Deadline {
    at: Instant,
    pong_wait: Duration,
}

impl Deadline {
    pub fn start(pong_wait: Duration) -> Self {
        Self {
            at: Instant::now() + pong_wait,
            pong_wait,
        }
    }

    /// Push the deadline out to `now + pong_wait`.
    pub fn extend(&mut self) {
        self.at = Instant::now() + self.pong_wait;
    }

    pub fn expires_at(&self) -> Instant {
        self.at
    }
}

/// Result of one deadline-bounded read.
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(Message),
    /// Stream ended without an error.
    Closed,
    TimedOut,
    Failed(axum::Error),
}

/// Read the next frame, giving up once `deadline` passes. A received frame
/// extends the deadline before it is returned.
pub async fn next_frame<S>(stream: &mut S, deadline: &mut Deadline) -> ReadOutcome
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    match timeout_at(deadline.expires_at(), stream.next()).await {
        Ok(Some(Ok(msg))) => {
            deadline.extend();
            ReadOutcome::Frame(msg)
        }
        Ok(Some(Err(e))) => ReadOutcome::Failed(e),
        Ok(None) => ReadOutcome::Closed,
        Err(_) => ReadOutcome::TimedOut,
    }
}

/// Spawn the ping ticker for one connection. The task ends on its own once
/// the connection's writer is gone; the session aborts it on close.
pub fn spawn_pinger(handle: ConnectionHandle, ping_period: Duration, user_id: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(ping_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            tracing::trace!(user_id = %user_id, "Sending ping");
            if !handle.send(Message::Ping(PING_PAYLOAD.into())) && handle.is_closed() {
                tracing::debug!(user_id = %user_id, "Ping failed, writer is gone");
                break;
            }
        }
    })
}
