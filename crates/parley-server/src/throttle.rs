//! Fixed-window throttle for the credential endpoints.
//!
//! Signup and login are the only unauthenticated write paths, so they get
//! a per-IP attempt counter: at most `max_attempts` requests per rolling
//! window.  Authenticated routes are not throttled.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

#[derive(Debug)]
struct Window {
    started: Instant,
    attempts: u32,
}

#[derive(Clone)]
pub struct AuthThrottle {
    windows: Arc<Mutex<HashMap<IpAddr, Window>>>,
    max_attempts: u32,
    window: Duration,
}

impl AuthThrottle {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            max_attempts,
            window,
        }
    }

    /// Record an attempt from `ip`.  Returns `false` when the window is
    /// exhausted.
    pub fn check(&self, ip: IpAddr) -> bool {
        let mut windows = self.windows.lock().expect("throttle lock poisoned");
        let now = Instant::now();

        let window = windows.entry(ip).or_insert(Window {
            started: now,
            attempts: 0,
        });

        if now.duration_since(window.started) >= self.window {
            window.started = now;
            window.attempts = 0;
        }

        window.attempts += 1;
        window.attempts <= self.max_attempts
    }

    /// Drop windows that have been idle for longer than one full window.
    pub fn purge_stale(&self) {
        let mut windows = self.windows.lock().expect("throttle lock poisoned");
        let now = Instant::now();
        windows.retain(|_, w| now.duration_since(w.started) < self.window * 2);
    }
}

impl Default for AuthThrottle {
    /// 20 credential attempts per minute per IP.
    fn default() -> Self {
        Self::new(20, Duration::from_secs(60))
    }
}

pub async fn auth_throttle_middleware(
    State(throttle): State<AuthThrottle>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(ip) = client_ip(&req) {
        if !throttle.check(ip) {
            warn!(ip = %ip, "auth attempt throttled");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}

/// Try ConnectInfo first, then X-Forwarded-For.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(connect_info.0.ip());
    }

    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_exhausts_and_resets() {
        let throttle = AuthThrottle::new(3, Duration::from_secs(60));
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..3 {
            assert!(throttle.check(ip));
        }
        assert!(!throttle.check(ip));

        // A zero-length window resets on every attempt.
        let throttle = AuthThrottle::new(1, Duration::ZERO);
        assert!(throttle.check(ip));
        assert!(throttle.check(ip));
    }

    #[test]
    fn ips_are_independent() {
        let throttle = AuthThrottle::new(1, Duration::from_secs(60));
        let first: IpAddr = "10.0.0.1".parse().unwrap();
        let second: IpAddr = "10.0.0.2".parse().unwrap();

        assert!(throttle.check(first));
        assert!(!throttle.check(first));
        assert!(throttle.check(second));
    }

    #[test]
    fn purge_drops_stale_windows() {
        let throttle = AuthThrottle::new(5, Duration::ZERO);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        throttle.check(ip);

        throttle.purge_stale();
        assert!(throttle.windows.lock().unwrap().is_empty());
    }
}
