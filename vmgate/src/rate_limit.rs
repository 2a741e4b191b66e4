//! Fixed-window request quota per client address.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use http::HeaderValue;

use crate::{App, errors::Error};

// Past this many clients, expired windows are swept at most once per window.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Default)]
struct Table {
    clients: HashMap<Option<IpAddr>, Window>,
    last_sweep: Option<Instant>,
}

impl Table {
    fn sweep_due(&self, now: Instant, window: Duration, threshold: usize) -> bool {
        self.clients.len() >= threshold
            && self
                .last_sweep
                .is_none_or(|at| now.saturating_duration_since(at) >= window)
    }
}

/// Requests without a known peer address share one bucket.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    sweep_threshold: usize,
    table: Mutex<Table>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            sweep_threshold: SWEEP_THRESHOLD,
            table: Mutex::new(Table::default()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn check(&self, client: Option<IpAddr>, now: Instant) -> Decision {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);

        if table.sweep_due(now, self.window, self.sweep_threshold) {
            table
                .clients
                .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
            table.last_sweep = Some(now);
        }

        let window = table.clients.entry(client).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            window.started = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            return Decision::Limited {
                retry_after: self.window - now.saturating_duration_since(window.started),
            };
        }

        window.count += 1;
        Decision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }
}

/// Middleware applying the limiter held by [`App`] to every request.
pub async fn enforce(request: Request, next: Next) -> Result<Response, Error> {
    let Some(app) = request.extensions().get::<App>().cloned() else {
        return Ok(next.run(request).await);
    };
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match app.rate_limiter().check(client, Instant::now()) {
        Decision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert("ratelimit-limit", HeaderValue::from(app.rate_limiter().max_requests()));
            headers.insert("ratelimit-remaining", HeaderValue::from(remaining));
            Ok(response)
        }
        Decision::Limited { retry_after } => {
            tracing::warn!(client = ?client, "Rate limit exceeded");
            Err(Error::RateLimited {
                retry_after_seconds: retry_after.as_secs().max(1),
            })
        }
    }
}
