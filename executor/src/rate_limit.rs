//! Per-IP Token Bucket
//!
//! /submit은 복호화와 서명 복구를 수반해서 요청당 비용이 크다.
//! 버스트 허용치까지는 즉시 통과, 그 이상은 초당 리필 속도로 제한.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    burst: u32,
    per_sec: u32,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl RateLimiter {
    pub fn new(burst: u32, per_sec: u32) -> Self {
        Self {
            burst: burst.max(1),
            per_sec,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// 요청 하나를 소비한다. false면 429.
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(ip).or_insert(Bucket {
            tokens: self.burst as f64,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.per_sec as f64)
            .min(self.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// 한동안 조용한 IP의 버킷을 비운다. 주기 태스크에서 호출.
    pub fn sweep(&self, idle: Duration) {
        let now = Instant::now();
        self.buckets
            .lock()
            .unwrap()
            .retain(|_, b| now.saturating_duration_since(b.last_refill) < idle);
    }

    #[cfg(test)]
    fn tracked_ips(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = RateLimiter::new(3, 1);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at(ip(1), now));
        }
        assert!(!limiter.check_at(ip(1), now));
    }

    #[test]
    fn test_refill_restores_tokens() {
        let limiter = RateLimiter::new(2, 5);
        let now = Instant::now();
        assert!(limiter.check_at(ip(1), now));
        assert!(limiter.check_at(ip(1), now));
        assert!(!limiter.check_at(ip(1), now));

        // 5 tokens/sec → 200ms면 1개
        assert!(limiter.check_at(ip(1), now + Duration::from_millis(250)));
        // 리필은 버스트 한도에서 멈춘다
        assert!(limiter.check_at(ip(1), now + Duration::from_secs(60)));
        assert!(limiter.check_at(ip(1), now + Duration::from_secs(60)));
        assert!(!limiter.check_at(ip(1), now + Duration::from_secs(60)));
    }

    #[test]
    fn test_ips_do_not_share_buckets() {
        let limiter = RateLimiter::new(1, 1);
        let now = Instant::now();
        assert!(limiter.check_at(ip(1), now));
        assert!(!limiter.check_at(ip(1), now));
        assert!(limiter.check_at(ip(2), now));
    }

    #[test]
    fn test_sweep_drops_idle_buckets() {
        let limiter = RateLimiter::new(1, 1);
        limiter.check(ip(1));
        limiter.check(ip(2));
        assert_eq!(limiter.tracked_ips(), 2);
        limiter.sweep(Duration::from_secs(600));
        assert_eq!(limiter.tracked_ips(), 2);
        limiter.sweep(Duration::from_nanos(0));
        assert_eq!(limiter.tracked_ips(), 0);
    }
}
