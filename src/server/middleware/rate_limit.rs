use governor::{
    clock::QuantaClock,
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
    Quota, RateLimiter
};
use nonzero_ext::nonzero;
use std::{
    net::IpAddr,
    num::NonZeroU32,
    sync::Arc,
};

/// A rate limiter for connection attempts, keyed by peer IP.
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    /// The underlying rate limiter instance, shared across instances.
    limiter: Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, QuantaClock, NoOpMiddleware>>,
}

impl ConnectionRateLimiter {
    /// Creates a new `ConnectionRateLimiter` allowing `per_second` new
    /// connections per IP, with the same burst size.
    ///
    /// A zero rate is treated as one per second.
    pub fn new(per_second: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(nonzero!(1u32));
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_second(rate))),
        }
    }

    /// Returns `true` when a connection from `ip` fits its quota right now.
    pub fn try_admit(&self, ip: IpAddr) -> bool {
        self.limiter.check_key(&ip).is_ok()
    }

    /// Waits until a connection from `ip` is allowed.
    pub async fn admit(&self, ip: IpAddr) {
        self.limiter.until_key_ready(&ip).await;
    }

    /// Forgets peers whose quota has fully replenished.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of peers currently tracked.
    pub fn tracked_peers(&self) -> usize {
        self.limiter.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_burst_then_reject() {
        let limiter = ConnectionRateLimiter::new(3);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        for _ in 0..3 {
            assert!(limiter.try_admit(ip));
        }
        assert!(!limiter.try_admit(ip));
    }

    #[test]
    fn test_ips_tracked_separately() {
        let limiter = ConnectionRateLimiter::new(1);
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert!(limiter.try_admit(a));
        assert!(!limiter.try_admit(a));
        assert!(limiter.try_admit(b));
    }

    #[test]
    fn test_clones_share_state() {
        let limiter = ConnectionRateLimiter::new(1);
        let other = limiter.clone();
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(limiter.try_admit(ip));
        assert!(!other.try_admit(ip));
    }

    #[tokio::test]
    async fn test_prune_forgets_replenished_peers() {
        let limiter = ConnectionRateLimiter::new(10);
        limiter.try_admit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        limiter.try_admit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        limiter.prune();
        assert_eq!(limiter.tracked_peers(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        limiter.prune();
        assert_eq!(limiter.tracked_peers(), 0);
    }

    #[tokio::test]
    async fn test_admit_returns_within_quota() {
        let limiter = ConnectionRateLimiter::new(5);
        limiter.admit(IpAddr::V4(Ipv4Addr::LOCALHOST)).await;
    }
}
