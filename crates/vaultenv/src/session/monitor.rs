//! Background token monitor.
//!
//! One monitor task runs per session once the first login succeeds. It
//! receives every fresh token over a channel and keeps the session valid:
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!   WaitingForMessage ──message──► Dispatch ──stale/ttl 0───┘
//!                                   │    │
//!                       non-renewable    renewable
//!                                   ▼    ▼
//!            MonitoringNonRenewable ◄─403─ MonitoringRenewable ──renewed──► Dispatch
//!                      │                        │
//!                  slept out          backoff exhausted / no TTL left
//!                      └────────► Expire ◄──────┘
//! ```
//!
//! Any wait is interrupted by cancellation (→ `Stopped`) or by a newer token
//! message (→ `Dispatch`). `Expire` sets `needs_login` only if the token's
//! generation is still the session's current one.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::backoff::{ExponentialBackoff, grace_period, sleep_duration};
use super::{MonitorState, SessionInner, TokenMessage};

/// Next step of the monitor loop.
enum Step {
    Wait,
    Dispatch(TokenMessage),
    NonRenewable { ttl: Duration, generation: u64 },
    Renewable {
        ttl: Duration,
        client_token: SecretString,
        generation: u64,
    },
    Expire(u64),
    Stop,
}

/// Outcome of a wait that can be cut short.
enum Wake {
    Elapsed,
    Message(TokenMessage),
    Cancelled,
}

pub(crate) struct TokenMonitor {
    session: Arc<SessionInner>,
    rx: mpsc::UnboundedReceiver<TokenMessage>,
}

impl TokenMonitor {
    pub(crate) const fn new(
        session: Arc<SessionInner>,
        rx: mpsc::UnboundedReceiver<TokenMessage>,
    ) -> Self {
        Self { session, rx }
    }

    pub(crate) async fn run(mut self) {
        let mut step = Step::Wait;
        loop {
            step = match step {
                Step::Wait => self.wait_for_message().await,
                Step::Dispatch(message) => self.dispatch(message).await,
                Step::NonRenewable { ttl, generation } => {
                    self.monitor_non_renewable(ttl, generation).await
                }
                Step::Renewable {
                    ttl,
                    client_token,
                    generation,
                } => self.monitor_renewable(ttl, client_token, generation).await,
                Step::Expire(generation) => {
                    self.session.expire(generation).await;
                    Step::Wait
                }
                Step::Stop => break,
            };
        }

        self.session.set_monitor_state(MonitorState::Stopped);
        debug!(
            fingerprint = %self.session.fingerprint.short(),
            "token monitor stopped"
        );
    }

    async fn wait_for_message(&mut self) -> Step {
        self.session
            .set_monitor_state(MonitorState::WaitingForMessage);

        tokio::select! {
            biased;
            () = self.session.cancel.cancelled() => Step::Stop,
            message = self.rx.recv() => message.map_or(Step::Stop, Step::Dispatch),
        }
    }

    async fn dispatch(&self, message: TokenMessage) -> Step {
        {
            let Some(state) = self.session.lock_state().await else {
                return Step::Stop;
            };
            if message.generation != state.login_generation {
                debug!(
                    generation = message.generation,
                    current = state.login_generation,
                    "discarding stale token message"
                );
                return Step::Wait;
            }
        }

        let Some(auth) = message.secret.auth else {
            debug!(
                generation = message.generation,
                "token message without auth data"
            );
            return Step::Wait;
        };

        if auth.lease_duration.is_zero() {
            debug!(
                generation = message.generation,
                "token never expires, nothing to monitor"
            );
            return Step::Wait;
        }

        if auth.renewable {
            Step::Renewable {
                ttl: auth.lease_duration,
                client_token: auth.client_token,
                generation: message.generation,
            }
        } else {
            Step::NonRenewable {
                ttl: auth.lease_duration,
                generation: message.generation,
            }
        }
    }

    async fn monitor_non_renewable(&mut self, ttl: Duration, generation: u64) -> Step {
        self.session
            .set_monitor_state(MonitorState::MonitoringNonRenewable);

        let pause = sleep_duration(ttl, grace_period(ttl));
        debug!(generation, ttl = ?ttl, sleep = ?pause, "monitoring non-renewable token");

        match self.sleep_or_wake(pause).await {
            Wake::Elapsed => Step::Expire(generation),
            Wake::Message(message) => Step::Dispatch(message),
            Wake::Cancelled => Step::Stop,
        }
    }

    async fn monitor_renewable(
        &mut self,
        ttl: Duration,
        client_token: SecretString,
        generation: u64,
    ) -> Step {
        self.session
            .set_monitor_state(MonitorState::MonitoringRenewable);

        let deadline = Instant::now() + ttl;
        let grace = grace_period(ttl);
        let mut backoff: Option<ExponentialBackoff> = None;

        loop {
            let pause = match backoff.as_mut() {
                None => sleep_duration(deadline.saturating_duration_since(Instant::now()), grace),
                Some(backoff) => {
                    let Some(delay) = backoff.next_delay() else {
                        warn!(generation, "token renewal retries exhausted");
                        return Step::Expire(generation);
                    };
                    delay
                }
            };

            debug!(generation, sleep = ?pause, "waiting to renew token");
            match self.sleep_or_wake(pause).await {
                Wake::Elapsed => {}
                Wake::Message(message) => return Step::Dispatch(message),
                Wake::Cancelled => return Step::Stop,
            }

            let session = &self.session;
            let renewal = tokio::select! {
                biased;
                () = session.cancel.cancelled() => return Step::Stop,
                message = self.rx.recv() => {
                    return message.map_or(Step::Stop, Step::Dispatch);
                }
                result = session
                    .backend
                    .renew_self(&client_token, session.config.renew_increment()) => result,
            };

            match renewal {
                Ok(secret) => {
                    info!(
                        fingerprint = %session.fingerprint.short(),
                        generation,
                        ttl = ?secret.token_ttl(),
                        "token renewed"
                    );
                    return Step::Dispatch(TokenMessage { secret, generation });
                }
                Err(e) if e.is_permission_denied() => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    warn!(
                        generation,
                        remaining = ?remaining,
                        "token renewal denied, treating token as non-renewable"
                    );
                    return if remaining.is_zero() {
                        Step::Expire(generation)
                    } else {
                        Step::NonRenewable {
                            ttl: remaining,
                            generation,
                        }
                    };
                }
                Err(e) => {
                    warn!(generation, error = %e, "token renewal failed");
                    if backoff.is_none() {
                        let remaining = deadline.saturating_duration_since(Instant::now());
                        backoff = Some(ExponentialBackoff::new(
                            *session.config.backoff(),
                            remaining,
                        ));
                    }
                }
            }
        }
    }

    /// Sleeps for `pause` unless cancelled or a new token arrives first.
    async fn sleep_or_wake(&mut self, pause: Duration) -> Wake {
        tokio::select! {
            biased;
            () = self.session.cancel.cancelled() => Wake::Cancelled,
            message = self.rx.recv() => message.map_or(Wake::Cancelled, Wake::Message),
            () = sleep(pause) => Wake::Elapsed,
        }
    }
}
