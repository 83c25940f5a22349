//! Funding Oracle Service
//!
//! # Interview Q&A
//!
//! Q: perp에서 펀딩 지수는 왜 필요한가?
//! A: 무기한 계약은 만기가 없어서 선물-현물 가격 괴리를 펀딩으로
//!    정산한다. 실행기는 마켓별 누적 펀딩 지수(cum_funding)를 들고,
//!    포지션은 진입 시점 지수(entry_funding)를 리프에 기록한다.
//!    청산 판정 시 (cum - entry)가 그 포지션의 미지급 펀딩이다.
//!
//! Q: 누적 지수가 단조 증가가 아니면 무슨 문제가 생기나?
//! A: 회로의 펀딩 항이 (cum - entry) 뺄셈이라 음수가 되면 필드에서
//!    거대한 값으로 감겨 범위 검사를 통과하지 못한다. 오라클이
//!    단조성을 보장해야 entry_funding을 리프에 박아도 안전하다.
//!
//! Q: 가격 피드가 죽으면?
//! A: 직전 가격을 유지한다. 잘못된 가격으로 청산하는 것보다
//!    청산을 미루는 쪽이 복구 가능한 실패다.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;

use crate::db::FundingStateRow;
use crate::types::parse_amount;

/// 마켓 상태의 읽기 스냅샷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketSnapshot {
    pub market: String,
    /// 1e8 고정소수점
    pub mark_price: u64,
    /// 단조 증가 누적 펀딩 지수 (1e8)
    pub cum_funding: u64,
    pub updated_at: DateTime<Utc>,
}

struct MarketState {
    base_price: u64,
    mark_price: u64,
    /// updated_at 시점까지 누적된 지수
    cum_funding: u64,
    updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct FeedPrice {
    price: String,
}

/// 펀딩 오라클
///
/// # Implementation Options
///
/// 1. 시뮬레이션 (기본): 기준 가격 주변 제한 랜덤워크 (개발/테스트)
/// 2. External feed: `PRICE_FEED_URL/{market}` → `{"price": "..."}`
pub struct FundingOracle {
    step_per_hour: u64,
    feed_url: Option<String>,
    http: reqwest::Client,
    states: std::sync::RwLock<HashMap<String, MarketState>>,
}

impl FundingOracle {
    pub fn new(markets: &[(String, u64)], step_per_hour: u64, feed_url: Option<String>) -> Self {
        let now = Utc::now();
        let states = markets
            .iter()
            .map(|(symbol, base)| {
                (
                    symbol.clone(),
                    MarketState {
                        base_price: *base,
                        mark_price: *base,
                        cum_funding: 0,
                        updated_at: now,
                    },
                )
            })
            .collect();

        Self {
            step_per_hour,
            feed_url,
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            states: std::sync::RwLock::new(states),
        }
    }

    /// 재시작 시 영속 상태 복원. 누적 지수는 절대 뒤로 가지 않는다.
    pub fn hydrate(&self, rows: &[FundingStateRow]) {
        let mut states = self.states.write().unwrap();
        for row in rows {
            let Some(state) = states.get_mut(&row.market) else {
                tracing::warn!(market = %row.market, "ignoring funding state for unknown market");
                continue;
            };
            if let Ok(price) = parse_amount(&row.mark_price) {
                state.mark_price = price;
            }
            if let Ok(cum) = parse_amount(&row.cum_funding) {
                state.cum_funding = state.cum_funding.max(cum);
            }
            state.updated_at = row.updated_at;
        }
    }

    pub fn markets(&self) -> Vec<String> {
        self.states.read().unwrap().keys().cloned().collect()
    }

    /// 현재 스냅샷. 마지막 갱신 이후 경과분을 지수에 반영해서 돌려준다.
    pub fn snapshot(&self, market: &str) -> Option<MarketSnapshot> {
        let states = self.states.read().unwrap();
        let state = states.get(market)?;
        let now = Utc::now();
        Some(MarketSnapshot {
            market: market.to_string(),
            mark_price: state.mark_price,
            cum_funding: accrued_funding(
                state.cum_funding,
                self.step_per_hour,
                state.updated_at,
                now,
            ),
            updated_at: now,
        })
    }

    /// 가격 갱신 + 경과 펀딩을 저장 상태에 편입. 영속화용 스냅샷 반환.
    pub async fn refresh(&self) -> Vec<MarketSnapshot> {
        let markets = self.markets();
        let mut fetched: HashMap<String, u64> = HashMap::new();
        if let Some(url) = &self.feed_url {
            for market in &markets {
                match self.fetch_feed_price(url, market).await {
                    Ok(price) => {
                        fetched.insert(market.clone(), price);
                    }
                    Err(e) => {
                        tracing::warn!(market = %market, error = %e, "price feed fetch failed, keeping last price");
                    }
                }
            }
        }

        let now = Utc::now();
        let mut out = Vec::with_capacity(markets.len());
        let mut states = self.states.write().unwrap();
        for (symbol, state) in states.iter_mut() {
            state.cum_funding =
                accrued_funding(state.cum_funding, self.step_per_hour, state.updated_at, now);
            state.updated_at = now;
            state.mark_price = match fetched.get(symbol) {
                Some(price) => *price,
                None if self.feed_url.is_some() => state.mark_price,
                None => simulate_price(state.mark_price, state.base_price),
            };
            out.push(MarketSnapshot {
                market: symbol.clone(),
                mark_price: state.mark_price,
                cum_funding: state.cum_funding,
                updated_at: now,
            });
        }
        out
    }

    async fn fetch_feed_price(&self, base_url: &str, market: &str) -> Result<u64> {
        let url = format!("{}/{}", base_url.trim_end_matches('/'), market);
        let feed: FeedPrice = self.http.get(&url).send().await?.json().await?;
        let price = parse_amount(&feed.price)
            .map_err(|e| anyhow::anyhow!("feed price for {}: {}", market, e))?;
        if price == 0 {
            anyhow::bail!("feed returned zero price for {}", market);
        }
        Ok(price)
    }

    #[cfg(test)]
    fn set_state_for_test(&self, market: &str, mark_price: u64, cum_funding: u64, updated_at: DateTime<Utc>) {
        let mut states = self.states.write().unwrap();
        if let Some(state) = states.get_mut(market) {
            state.mark_price = mark_price;
            state.cum_funding = cum_funding;
            state.updated_at = updated_at;
        }
    }
}

/// base 지수 + 경과 시간의 펀딩. 시계가 뒤로 가면 경과분 0으로 처리.
fn accrued_funding(
    base: u64,
    step_per_hour: u64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> u64 {
    let elapsed_secs = (to - from).num_seconds().max(0) as u128;
    let accrued = (step_per_hour as u128 * elapsed_secs / 3600).min(u64::MAX as u128) as u64;
    base.saturating_add(accrued)
}

/// 기준 가격 주변 제한 랜덤워크: 스텝당 ±0.5%, [base/2, base*2] 클램프
fn simulate_price(current: u64, base: u64) -> u64 {
    let bps: i64 = rand::thread_rng().gen_range(-50..=50);
    let delta = current as i128 * bps as i128 / 10_000;
    let next = (current as i128 + delta)
        .clamp(base as i128 / 2, base as i128 * 2);
    next as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn oracle() -> FundingOracle {
        FundingOracle::new(
            &[("sAAPL".to_string(), 21_000_000_000)],
            120_000,
            None,
        )
    }

    #[test]
    fn test_accrued_funding_rate() {
        let t0 = Utc::now();
        assert_eq!(accrued_funding(0, 120_000, t0, t0), 0);
        assert_eq!(accrued_funding(0, 120_000, t0, t0 + Duration::hours(1)), 120_000);
        assert_eq!(accrued_funding(500, 120_000, t0, t0 + Duration::minutes(30)), 60_500);
        // 시계 역행은 경과 0
        assert_eq!(accrued_funding(500, 120_000, t0, t0 - Duration::hours(1)), 500);
    }

    #[test]
    fn test_snapshot_accrues_since_update() {
        let o = oracle();
        let two_hours_ago = Utc::now() - Duration::hours(2);
        o.set_state_for_test("sAAPL", 21_000_000_000, 1_000, two_hours_ago);

        let snap = o.snapshot("sAAPL").unwrap();
        assert!(snap.cum_funding >= 1_000 + 2 * 120_000);
        assert_eq!(snap.mark_price, 21_000_000_000);
    }

    #[test]
    fn test_snapshot_unknown_market() {
        assert!(oracle().snapshot("sNOPE").is_none());
    }

    #[test]
    fn test_hydrate_never_regresses() {
        let o = oracle();
        let now = Utc::now();
        o.set_state_for_test("sAAPL", 21_000_000_000, 9_000, now);

        o.hydrate(&[FundingStateRow {
            market: "sAAPL".to_string(),
            mark_price: "20000000000".to_string(),
            cum_funding: "5000".to_string(),
            updated_at: now,
        }]);
        // 더 작은 지수는 무시, 가격은 복원
        let snap = o.snapshot("sAAPL").unwrap();
        assert!(snap.cum_funding >= 9_000);
        assert_eq!(snap.mark_price, 20_000_000_000);

        o.hydrate(&[FundingStateRow {
            market: "sAAPL".to_string(),
            mark_price: "20000000000".to_string(),
            cum_funding: "50000".to_string(),
            updated_at: now,
        }]);
        assert!(o.snapshot("sAAPL").unwrap().cum_funding >= 50_000);
    }

    #[tokio::test]
    async fn test_refresh_is_monotone() {
        let o = oracle();
        let before = o.snapshot("sAAPL").unwrap();
        let snaps = o.refresh().await;
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].cum_funding >= before.cum_funding);

        // 가격은 클램프 범위 안
        assert!(snaps[0].mark_price >= 21_000_000_000 / 2);
        assert!(snaps[0].mark_price <= 21_000_000_000 * 2);
    }

    #[test]
    fn test_simulate_price_clamps() {
        let base = 1_000_000_000u64;
        for _ in 0..200 {
            let p = simulate_price(base * 2, base);
            assert!(p <= base * 2);
            let p = simulate_price(base / 2, base);
            assert!(p >= base / 2);
        }
    }
}
