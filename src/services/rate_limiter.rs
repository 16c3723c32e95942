//! Sliding-window rate limiter for outbound provider calls.
//!
//! Two rolling windows are kept: one entry per request, and one
//! (timestamp, tokens) entry per request. Capacity is reserved when the
//! check passes, so concurrent callers cannot all slip through before any
//! of them records usage.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::domain::models::RateLimitConfig;

/// Caps for one rolling window.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Tokens admitted per window
    pub max_tokens: u64,
    /// Length of the rolling window
    pub window: Duration,
}

impl From<&RateLimitConfig> for RateLimitSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.requests_per_minute,
            max_tokens: config.tokens_per_minute,
            window: Duration::from_secs(config.window_secs),
        }
    }
}

/// Capacity held by one admitted call. Pass it back to `record_usage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    id: u64,
    /// Tokens reserved up front
    pub estimated_tokens: u64,
}

/// Headroom in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    /// Requests still admissible
    pub requests: u32,
    /// Tokens still admissible
    pub tokens: u64,
    /// Time until the oldest entry leaves the window
    pub resets_in: Option<Duration>,
}

#[derive(Debug)]
struct Entry {
    id: u64,
    at: Instant,
    tokens: u64,
}

#[derive(Debug, Default)]
struct Window {
    entries: VecDeque<Entry>,
    next_id: u64,
}

impl Window {
    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .entries
            .front()
            .is_some_and(|e| e.at + window <= now)
        {
            self.entries.pop_front();
        }
    }

    fn token_sum(&self) -> u64 {
        self.entries.iter().map(|e| e.tokens).sum()
    }
}

/// Request and token caps over a rolling window, shared by all callers.
pub struct SlidingWindowRateLimiter {
    settings: RateLimitSettings,
    window: Mutex<Window>,
}

impl SlidingWindowRateLimiter {
    /// An empty limiter with the given caps.
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            window: Mutex::new(Window::default()),
        }
    }

    /// The caps this limiter enforces.
    pub fn settings(&self) -> RateLimitSettings {
        self.settings
    }

    /// Block until one request carrying `estimated_tokens` fits in the
    /// window, then reserve it.
    ///
    /// A single estimate larger than the token cap is admitted once the
    /// window is otherwise empty.
    pub async fn wait_for_capacity(&self, estimated_tokens: u64) -> Reservation {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now, self.settings.window);

                let requests_ok = window.entries.len() < self.settings.max_requests as usize;
                let used_tokens = window.token_sum();
                let tokens_ok = used_tokens + estimated_tokens <= self.settings.max_tokens
                    || window.entries.is_empty();

                if requests_ok && tokens_ok {
                    if estimated_tokens > self.settings.max_tokens {
                        warn!(estimated_tokens, cap = self.settings.max_tokens, "Request exceeds token cap on its own");
                    }
                    let id = window.next_id;
                    window.next_id += 1;
                    window.entries.push_back(Entry {
                        id,
                        at: now,
                        tokens: estimated_tokens,
                    });
                    return Reservation { id, estimated_tokens };
                }

                let wait = if requests_ok {
                    self.wait_for_tokens(&window, now, used_tokens + estimated_tokens)
                } else {
                    window
                        .entries
                        .front()
                        .map_or(Duration::ZERO, |e| (e.at + self.settings.window).saturating_duration_since(now))
                };
                debug!(
                    wait_ms = wait.as_millis() as u64,
                    in_window = window.entries.len(),
                    used_tokens,
                    "Rate limit reached, waiting"
                );
                wait
            };
            sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// How long until enough token entries expire to bring `needed` under
    /// the cap.
    fn wait_for_tokens(&self, window: &Window, now: Instant, needed: u64) -> Duration {
        let mut excess = needed.saturating_sub(self.settings.max_tokens);
        for entry in &window.entries {
            excess = excess.saturating_sub(entry.tokens);
            if excess == 0 {
                return (entry.at + self.settings.window).saturating_duration_since(now);
            }
        }
        window
            .entries
            .back()
            .map_or(Duration::ZERO, |e| (e.at + self.settings.window).saturating_duration_since(now))
    }

    /// Replace a reservation's estimate with the tokens actually used.
    /// A reservation that has already left the window is ignored.
    pub async fn record_usage(&self, reservation: Reservation, actual_tokens: u64) {
        let mut window = self.window.lock().await;
        if let Some(entry) = window.entries.iter_mut().find(|e| e.id == reservation.id) {
            entry.tokens = actual_tokens;
        }
    }

    /// Headroom left once expired entries are dropped.
    pub async fn get_remaining(&self) -> Remaining {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        window.prune(now, self.settings.window);
        let used_requests = u32::try_from(window.entries.len()).unwrap_or(u32::MAX);
        Remaining {
            requests: self.settings.max_requests.saturating_sub(used_requests),
            tokens: self.settings.max_tokens.saturating_sub(window.token_sum()),
            resets_in: window
                .entries
                .front()
                .map(|e| (e.at + self.settings.window).saturating_duration_since(now)),
        }
    }
}
