//! Circuit Breaker (C4): closed/open/half-open, wrapping Remote Store writes.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Thread-safe breaker wrapping a single protected operation (§4.4).
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            threshold,
            timeout,
        }
    }

    /// Runs `op` if the breaker allows it; otherwise returns `None` without
    /// invoking `op` at all (an open breaker inside its timeout window).
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return None;
        }

        let result = op().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        Some(result)
    }

    fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let elapsed = inner.last_failure.is_none_or(|t| t.elapsed() >= self.timeout);
                if elapsed {
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.state = State::Closed;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        if inner.failure_count >= self.threshold {
            inner.state = State::Open;
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().state == State::Open
    }
}
