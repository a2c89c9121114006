//! Typing notifications (`+typing` client tag).
//!
//! Outgoing notifications go through [`TypingLimiter`], which keeps a per
//! target stamp and token bucket. Incoming ones are tracked by [`Typings`],
//! which expires entries lazily when queried.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum delay between two `+typing=active` for the same target.
pub const ACTIVE_RESEND: Duration = Duration::from_secs(3);
/// How long an incoming `+typing=active` stays valid without a refresh.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(6);

/// Token bucket: holds up to `capacity` tokens, refilled continuously at
/// `refill_per_sec`. Starts full.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(refill_per_sec: f64, burst: u32, now: Instant) -> Self {
        Self {
            capacity: f64::from(burst),
            tokens: f64::from(burst),
            refill_per_sec,
            last: now,
        }
    }

    /// Take a token if one is available at `now`.
    pub fn allow(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last = now.max(self.last);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Active,
    Paused,
    Done,
}

impl TypingState {
    pub fn from_tag(value: &str) -> Option<Self> {
        match value {
            "active" => Some(TypingState::Active),
            "paused" => Some(TypingState::Paused),
            "done" => Some(TypingState::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct TypingStamp {
    last: Instant,
    state: TypingState,
    limit: TokenBucket,
}

/// Decides whether our own typing notifications go out.
#[derive(Debug, Default)]
pub struct TypingLimiter {
    stamps: HashMap<String, TypingStamp>,
}

impl TypingLimiter {
    /// Record an `active` notification for `target_cf`; false if it must not
    /// be sent.
    pub fn active(&mut self, target_cf: &str, now: Instant) -> bool {
        self.record(target_cf, TypingState::Active, now, 1.0 / 3.0)
    }

    /// Record a `done` notification for `target_cf`; false if it must not be
    /// sent.
    pub fn done(&mut self, target_cf: &str, now: Instant) -> bool {
        self.record(target_cf, TypingState::Done, now, 1.0)
    }

    fn record(&mut self, target_cf: &str, state: TypingState, now: Instant, rate: f64) -> bool {
        match self.stamps.get_mut(target_cf) {
            Some(stamp) => {
                let redundant = match state {
                    TypingState::Active => {
                        stamp.state == TypingState::Active
                            && now.saturating_duration_since(stamp.last) < ACTIVE_RESEND
                    }
                    _ => stamp.state == state,
                };
                if redundant || !stamp.limit.allow(now) {
                    return false;
                }
                stamp.state = state;
                stamp.last = now;
            }
            None => {
                let mut limit = TokenBucket::new(rate, 5, now);
                limit.allow(now);
                self.stamps.insert(
                    target_cf.to_string(),
                    TypingStamp {
                        last: now,
                        state,
                        limit,
                    },
                );
            }
        }
        true
    }

    /// Forget the stamp of a target, e.g. once a message was sent to it.
    pub fn clear(&mut self, target_cf: &str) {
        self.stamps.remove(target_cf);
    }

    pub fn clear_all(&mut self) {
        self.stamps.clear();
    }
}

/// Who is currently typing where, from other users' notifications.
#[derive(Debug, Default)]
pub struct Typings {
    /// (casemapped target, casemapped nick) → last `active`.
    active: HashMap<(String, String), Instant>,
}

impl Typings {
    pub fn active(&mut self, target_cf: &str, nick_cf: &str, now: Instant) {
        self.active
            .retain(|_, at| now.saturating_duration_since(*at) < TYPING_TIMEOUT);
        self.active
            .insert((target_cf.to_string(), nick_cf.to_string()), now);
    }

    pub fn done(&mut self, target_cf: &str, nick_cf: &str) {
        self.active
            .remove(&(target_cf.to_string(), nick_cf.to_string()));
    }

    /// Casemapped nicks typing in `target_cf` at `now`.
    pub fn list(&self, target_cf: &str, now: Instant) -> Vec<String> {
        self.active
            .iter()
            .filter(|((target, _), at)| {
                target == target_cf && now.saturating_duration_since(**at) < TYPING_TIMEOUT
            })
            .map(|((_, nick), _)| nick.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.active.clear();
    }
}
