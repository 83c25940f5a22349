//! Common Types Module
//!
//! 의도 와이어 포맷과 금액 파싱. 모든 금액은 1e8 고정소수점 u64를
//! 십진 문자열로 나타낸다 (JSON number의 f64 반올림을 피한다).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 1e8 고정소수점: 1.0 = 100_000_000
pub const FIXED_POINT_SCALE: u64 = 100_000_000;

/// 서명 대상이 되는 주문 의도 평문.
///
/// 필드 선언 순서가 곧 서명 메시지의 직렬화 순서다. 클라이언트는
/// 같은 순서의 JSON을 personal_sign 한다. 순서를 바꾸면 기존
/// 서명이 전부 깨진다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntentPayload {
    pub trader: String,
    pub market: String,
    /// 포지션 크기. "0"은 포지션 종료.
    pub size: String,
    pub margin: String,
    /// 트레이더별 단조 증가 논스
    pub nonce: u64,
}

impl IntentPayload {
    /// 서명 검증에 쓰는 정규 직렬화
    pub fn signed_message(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 복호화된 봉투 내용물
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedIntent {
    pub payload: IntentPayload,
    pub sig: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount must be a decimal string")]
    NotDecimal,
    #[error("amount exceeds u64 range")]
    Overflow,
}

/// 십진 문자열 → 1e8 고정소수점 u64
pub fn parse_amount(s: &str) -> Result<u64, AmountError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AmountError::NotDecimal);
    }
    s.parse::<u64>().map_err(|_| AmountError::Overflow)
}

/// Ethereum 주소 타입 (lowercase 정규화)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthAddress(String);

impl EthAddress {
    pub fn new(addr: &str) -> Result<Self, String> {
        let addr = addr.to_lowercase();
        let hex = addr.strip_prefix("0x").unwrap_or(&addr);
        if addr.starts_with("0x") && hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit())
        {
            Ok(Self(addr))
        } else {
            Err("Invalid Ethereum address format".to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eth_address_valid() {
        let addr = EthAddress::new("0x1234567890123456789012345678901234567890");
        assert!(addr.is_ok());
        assert_eq!(
            EthAddress::new("0xABCDEF1234567890123456789012345678901234")
                .unwrap()
                .as_str(),
            "0xabcdef1234567890123456789012345678901234"
        );
    }

    #[test]
    fn test_eth_address_invalid() {
        assert!(EthAddress::new("invalid").is_err());
        assert!(EthAddress::new("0x12345").is_err());
        assert!(EthAddress::new("0xZZ34567890123456789012345678901234567890").is_err());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("0"), Ok(0));
        assert_eq!(parse_amount("100000000"), Ok(FIXED_POINT_SCALE));
        assert_eq!(parse_amount("18446744073709551615"), Ok(u64::MAX));
        assert_eq!(parse_amount(""), Err(AmountError::NotDecimal));
        assert_eq!(parse_amount("-5"), Err(AmountError::NotDecimal));
        assert_eq!(parse_amount("1.5"), Err(AmountError::NotDecimal));
        assert_eq!(parse_amount("1e8"), Err(AmountError::NotDecimal));
        assert_eq!(
            parse_amount("18446744073709551616"),
            Err(AmountError::Overflow)
        );
    }

    #[test]
    fn test_signed_message_field_order_is_stable() {
        let payload = IntentPayload {
            trader: "0xabc".to_string(),
            market: "sAAPL".to_string(),
            size: "100000000".to_string(),
            margin: "400000000".to_string(),
            nonce: 7,
        };
        assert_eq!(
            payload.signed_message().unwrap(),
            r#"{"trader":"0xabc","market":"sAAPL","size":"100000000","margin":"400000000","nonce":7}"#
        );
    }

    #[test]
    fn test_signed_intent_roundtrip() {
        let json = r#"{"payload":{"trader":"0xabc","market":"sTSLA","size":"0","margin":"0","nonce":3},"sig":"0xdead"}"#;
        let intent: SignedIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.payload.size, "0");
        assert_eq!(intent.payload.nonce, 3);
        assert_eq!(intent.sig, "0xdead");
    }
}
