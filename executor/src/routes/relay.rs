//! Intent Relay Endpoints
//!
//! 암호화된 거래 의도가 들어오는 문. 트레이더는 /relay/pubkey로
//! 받은 키에 의도를 봉인하고, /submit으로 enc(캡슐화)와
//! ctc(암호문)를 base64로 보낸다.
//!
//! # Interview Q&A
//!
//! Q: TLS가 있는데 왜 또 암호화하나?
//! A: TLS는 종단 프록시에서 풀린다. 의도의 크기와 증거금은
//!    실행기 프로세스만 봐야 하므로, 페이로드 자체를 실행기
//!    공개키에 봉인한다. 중간의 로드밸런서나 로그 수집기는
//!    암호문만 본다.
//!
//! Q: 복호화 실패와 서명 실패를 왜 구분해서 응답하나?
//! A: 복호화 실패(400)는 클라이언트가 키를 잘못 썼다는 뜻이고,
//!    서명 실패(401)는 평문은 맞는데 서명자가 다르다는 뜻이다.
//!    섞어 버리면 프론트가 키 갱신 시점을 알 수 없다.

use axum::{extract::State, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::crypto::channel::{ALGORITHM, RelayKeypair};
use crate::error::ApiError;
use crate::types::SignedIntent;
use crate::AppState;

// ============ Request/Response Types ============

/// 봉인용 공개키 문서
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PubkeyResponse {
    pub public_key: String,
    pub algorithm: String,
}

/// POST /submit 요청. 두 필드 모두 base64.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    /// X25519 임시 공개키 (32바이트)
    pub enc: String,
    /// nonce || AES-256-GCM 암호문
    pub ctc: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub ok: bool,
    /// 반영 직후의 포지션 트리 루트 (hex)
    pub root: String,
    pub leaf_index: u64,
    pub nonce: u64,
    /// size "0" 의도였는지
    pub closed: bool,
}

// ============ Handlers ============

/// GET /relay/pubkey
pub async fn relay_pubkey(State(state): State<AppState>) -> Json<PubkeyResponse> {
    Json(PubkeyResponse {
        public_key: state.keypair.public_key_b64(),
        algorithm: ALGORITHM.to_string(),
    })
}

/// POST /submit
///
/// 봉인된 의도를 열어 검증하고 포지션 트리에 반영한다.
///
/// # Flow
///
/// 1. base64 해제, 크기 상한 확인
/// 2. X25519 캡슐 해제 + AES-GCM 복호화
/// 3. JSON 파싱 → SignedIntent
/// 4. PositionBook이 서명/논스/금액을 검증하고 트리·DB에 반영
pub async fn submit_intent(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let intent = decode_intent(&state.keypair, &req, state.config.max_ciphertext_bytes)?;

    let market = intent.payload.market.clone();
    let snapshot = state
        .oracle
        .snapshot(&market)
        .ok_or_else(|| ApiError::ValidationError(format!("unknown market {market}")))?;

    let outcome = state.book.apply_intent(intent, &snapshot).await?;

    // 트레이더 주소는 로그에 남기지 않는다
    tracing::info!(
        market = %market,
        nonce = outcome.nonce,
        leaf = outcome.leaf_index,
        closed = outcome.closed,
        "intent applied"
    );

    Ok(Json(SubmitResponse {
        ok: true,
        root: outcome.root,
        leaf_index: outcome.leaf_index,
        nonce: outcome.nonce,
        closed: outcome.closed,
    }))
}

// ============ Helpers ============

fn decode_intent(
    keypair: &RelayKeypair,
    req: &SubmitRequest,
    max_ciphertext: usize,
) -> Result<SignedIntent, ApiError> {
    // base64는 원문의 4/3 배. 디코드 전에 거른다.
    if req.ctc.len() > max_ciphertext.saturating_mul(2) {
        return Err(ApiError::BadRequest("ciphertext too large".to_string()));
    }

    let enc = BASE64
        .decode(&req.enc)
        .map_err(|_| ApiError::BadRequest("enc is not valid base64".to_string()))?;
    let ctc = BASE64
        .decode(&req.ctc)
        .map_err(|_| ApiError::BadRequest("ctc is not valid base64".to_string()))?;
    if ctc.len() > max_ciphertext {
        return Err(ApiError::BadRequest("ciphertext too large".to_string()));
    }

    let plaintext = keypair
        .open(&enc, &ctc)
        .map_err(|e| ApiError::DecryptionFailed(e.to_string()))?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| ApiError::BadRequest(format!("intent payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::channel::seal;
    use crate::types::IntentPayload;

    fn request_for(keypair: &RelayKeypair, payload: &IntentPayload) -> SubmitRequest {
        let intent = SignedIntent {
            payload: payload.clone(),
            sig: "0xdeadbeef".to_string(),
        };
        let plaintext = serde_json::to_vec(&intent).unwrap();
        let (enc, ctc) = seal(&keypair.public_bytes(), &plaintext).unwrap();
        SubmitRequest {
            enc: BASE64.encode(enc),
            ctc: BASE64.encode(ctc),
        }
    }

    fn payload() -> IntentPayload {
        IntentPayload {
            trader: "0x000102030405060708090a0b0c0d0e0f10111213".to_string(),
            market: "sAAPL".to_string(),
            size: "100000000".to_string(),
            margin: "400000000".to_string(),
            nonce: 1,
        }
    }

    #[test]
    fn test_decode_roundtrip() {
        let keypair = RelayKeypair::generate();
        let req = request_for(&keypair, &payload());
        let intent = decode_intent(&keypair, &req, 65536).unwrap();
        assert_eq!(intent.payload.market, "sAAPL");
        assert_eq!(intent.payload.nonce, 1);
    }

    #[test]
    fn test_decode_rejects_wrong_key() {
        let keypair = RelayKeypair::generate();
        let other = RelayKeypair::generate();
        let req = request_for(&other, &payload());
        assert!(matches!(
            decode_intent(&keypair, &req, 65536),
            Err(ApiError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_bad_base64_and_oversize() {
        let keypair = RelayKeypair::generate();
        let mut req = request_for(&keypair, &payload());
        req.enc = "not base64!!".to_string();
        assert!(matches!(
            decode_intent(&keypair, &req, 65536),
            Err(ApiError::BadRequest(_))
        ));

        let req = request_for(&keypair, &payload());
        assert!(matches!(
            decode_intent(&keypair, &req, 16),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn test_decode_rejects_non_intent_plaintext() {
        let keypair = RelayKeypair::generate();
        let (enc, ctc) = seal(&keypair.public_bytes(), b"{\"hello\":1}").unwrap();
        let req = SubmitRequest {
            enc: BASE64.encode(enc),
            ctc: BASE64.encode(ctc),
        };
        assert!(matches!(
            decode_intent(&keypair, &req, 65536),
            Err(ApiError::BadRequest(_))
        ));
    }
}
