//! Proxy pool for extractor downloads.
//!
//! Holds the configured proxy URLs, rotates randomly across the available
//! ones, tracks failures with exponential backoff, and periodically
//! probes each proxy's TCP endpoint.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config;

/// Timeout for a single TCP health probe.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct ProxyInfo {
    failure_count: u32,
    backoff_until: Option<Instant>,
}

impl ProxyInfo {
    fn new() -> Self {
        Self {
            failure_count: 0,
            backoff_until: None,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        match self.backoff_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Rotation pool over the configured proxies.
pub struct ProxyManager {
    cfg: config::Proxy,
    proxies: RwLock<HashMap<String, ProxyInfo>>,
    /// Insertion order, for deterministic iteration.
    order: Vec<String>,
}

impl ProxyManager {
    pub fn new(cfg: config::Proxy) -> Self {
        let mut proxies = HashMap::new();
        let mut order = Vec::with_capacity(cfg.proxies.len());

        for proxy in &cfg.proxies {
            proxies.insert(proxy.clone(), ProxyInfo::new());
            order.push(proxy.clone());
        }

        Self {
            cfg,
            proxies: RwLock::new(proxies),
            order,
        }
    }

    pub fn has_proxies(&self) -> bool {
        !self.order.is_empty()
    }

    /// A random proxy that is not in backoff, or `None`.
    pub fn random_proxy(&self) -> Option<String> {
        let now = Instant::now();
        let proxies = self.proxies.read();

        let available: Vec<&String> = self
            .order
            .iter()
            .filter(|p| proxies.get(*p).is_some_and(|info| info.is_available(now)))
            .collect();

        if available.is_empty() {
            return None;
        }

        let idx = rand::thread_rng().gen_range(0..available.len());
        Some(available[idx].clone())
    }

    /// Record a failure. Once `max_failures` is reached the proxy backs
    /// off, doubling per extra failure.
    pub fn mark_failed(&self, proxy: &str) {
        let mut proxies = self.proxies.write();
        let Some(info) = proxies.get_mut(proxy) else {
            return;
        };

        info.failure_count += 1;

        if info.failure_count >= self.cfg.max_failures {
            let exponent = info.failure_count - self.cfg.max_failures;
            let backoff = self.cfg.failure_backoff * 2u32.saturating_pow(exponent.min(8));
            info.backoff_until = Some(Instant::now() + backoff);

            warn!(proxy = %proxy, failures = info.failure_count, backoff = ?backoff,
                "proxy backed off");
        }
    }

    /// Record a success, clearing failure state.
    pub fn mark_success(&self, proxy: &str) {
        let mut proxies = self.proxies.write();
        if let Some(info) = proxies.get_mut(proxy) {
            info.failure_count = 0;
            info.backoff_until = None;
        }
    }

    /// Probe every proxy on a fixed interval until `token` fires.
    pub async fn health_check_loop(&self, token: CancellationToken) {
        if !self.has_proxies() {
            return;
        }

        let mut ticker = tokio::time::interval(self.cfg.health_check_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all().await,
                _ = token.cancelled() => {
                    info!("proxy health checks stopped");
                    return;
                }
            }
        }
    }

    async fn check_all(&self) {
        for proxy in &self.order {
            match self.probe(proxy).await {
                Ok(()) => {
                    debug!(proxy = %proxy, "proxy healthy");
                    self.mark_success(proxy);
                }
                Err(e) => {
                    debug!(proxy = %proxy, error = %e, "proxy probe failed");
                    self.mark_failed(proxy);
                }
            }
        }
    }

    /// TCP dial of the proxy's host:port.
    async fn probe(&self, proxy: &str) -> crate::Result<()> {
        let addr = host_port(proxy)
            .ok_or_else(|| crate::Error::ProxyFailed(format!("unparseable proxy url {proxy}")))?;

        let connect = tokio::net::TcpStream::connect(&addr);
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, connect).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(crate::Error::ProxyFailed(format!("{addr}: {e}"))),
            Err(_) => Err(crate::Error::ProxyFailed(format!("{addr}: probe timed out"))),
        }
    }
}

/// Extract `host:port` from a proxy URL such as `socks5h://host:1080`.
fn host_port(proxy: &str) -> Option<String> {
    let parsed = url::Url::parse(proxy).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port()?;
    Some(format!("{host}:{port}"))
}
