//! Encrypted Intent Channel (HPKE-style sealed box)
//!
//! 트레이더가 주문 의도를 실행기 공개키로 봉인해서 보낸다. 와이어에는
//! (enc, ctc) 쌍만 실리므로 포지션 크기·증거금이 평문으로 노출되지 않는다.
//!
//! 구성: X25519 키 캡슐화 + HKDF-SHA256 키 유도 + AES-256-GCM AEAD
//! - `enc` = 송신자 임시 공개키 (32바이트)
//! - `ctc` = 12바이트 nonce || AEAD 암호문(+16바이트 태그)
//!
//! # Interview Q&A
//!
//! Q: HKDF info에 두 공개키를 왜 넣는가?
//! A: 유도된 키를 (임시키, 수신자키) 쌍에 바인딩하기 위해서다.
//!    같은 DH 출력이 다른 맥락에서 재사용되어도 키가 달라진다.
//!
//! Q: 수신 컨텍스트를 분리한 이유는?
//! A: 캡슐화 해제(DH + KDF)와 AEAD open을 나눠 두면 하나의 enc로
//!    여러 메시지를 여는 HPKE 컨텍스트 의미론과 맞고, 테스트에서
//!    각 단계를 따로 검증할 수 있다.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use hkdf::Hkdf;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

/// HKDF 도메인 분리 문자열
const CHANNEL_INFO: &[u8] = b"zk-perps/intent-channel/v1";

/// 공개키 파일·엔드포인트에 노출되는 스위트 이름
pub const ALGORITHM: &str = "x25519-hkdf-sha256-aes256-gcm";

pub const ENC_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid recipient public key")]
    InvalidPublicKey,
    #[error("invalid relay secret key")]
    InvalidSecretKey,
    #[error("encapsulated key must be {ENC_LEN} bytes")]
    InvalidEncapsulation,
    #[error("ciphertext shorter than nonce + tag")]
    CiphertextTooShort,
    #[error("key derivation failed")]
    KeyDerivationFailed,
    #[error("non-contributory shared secret")]
    WeakSharedSecret,
    #[error("encryption failed")]
    SealFailed,
    #[error("decryption failed (wrong key or corrupted data)")]
    OpenFailed,
}

/// 실행기의 장기 수신 키쌍
pub struct RelayKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for RelayKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl RelayKeypair {
    /// 새 키쌍 생성 (재시작하면 이전 enc로 봉인된 의도는 열 수 없음)
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// base64 비밀키(32바이트)에서 복원
    pub fn from_base64(encoded: &str) -> Result<Self, ChannelError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| ChannelError::InvalidSecretKey)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ChannelError::InvalidSecretKey)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    pub fn public_key_b64(&self) -> String {
        BASE64.encode(self.public.to_bytes())
    }

    /// 캡슐화 해제: enc(임시 공개키)로 수신 컨텍스트 생성
    pub fn recipient_context(&self, enc: &[u8]) -> Result<RecipientContext, ChannelError> {
        let enc: [u8; ENC_LEN] = enc
            .try_into()
            .map_err(|_| ChannelError::InvalidEncapsulation)?;
        let ephemeral = PublicKey::from(enc);
        let shared = self.secret.diffie_hellman(&ephemeral);
        if !shared.was_contributory() {
            return Err(ChannelError::WeakSharedSecret);
        }
        let key = derive_key(shared.as_bytes(), &enc, &self.public.to_bytes())?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| ChannelError::KeyDerivationFailed)?;
        Ok(RecipientContext { cipher })
    }

    /// 단발 복호화: open(seal(m)) == m
    pub fn open(&self, enc: &[u8], ctc: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.recipient_context(enc)?.open(ctc)
    }
}

/// 송신 컨텍스트 (클라이언트 측, 테스트와 도구에서 사용)
pub struct SenderContext {
    cipher: Aes256Gcm,
    enc: [u8; ENC_LEN],
}

impl SenderContext {
    /// 수신자 공개키로 캡슐화
    pub fn new(recipient_pub: &[u8; 32]) -> Result<Self, ChannelError> {
        let recipient = PublicKey::from(*recipient_pub);
        let eph_secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let eph_pub = PublicKey::from(&eph_secret);
        let shared = eph_secret.diffie_hellman(&recipient);
        if !shared.was_contributory() {
            return Err(ChannelError::WeakSharedSecret);
        }
        let key = derive_key(shared.as_bytes(), &eph_pub.to_bytes(), recipient_pub)?;
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|_| ChannelError::KeyDerivationFailed)?;
        Ok(Self {
            cipher,
            enc: eph_pub.to_bytes(),
        })
    }

    /// 와이어에 실리는 캡슐화 키
    pub fn enc(&self) -> &[u8; ENC_LEN] {
        &self.enc
    }

    /// nonce를 새로 뽑아 봉인, `nonce || ciphertext` 반환
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ChannelError::SealFailed)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// 수신 컨텍스트
pub struct RecipientContext {
    cipher: Aes256Gcm,
}

impl RecipientContext {
    pub fn open(&self, ctc: &[u8]) -> Result<Vec<u8>, ChannelError> {
        if ctc.len() < NONCE_LEN + TAG_LEN {
            return Err(ChannelError::CiphertextTooShort);
        }
        let (nonce, ciphertext) = ctc.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| ChannelError::OpenFailed)
    }
}

/// 단발 봉인: (enc, ctc) 쌍 반환
pub fn seal(recipient_pub: &[u8; 32], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), ChannelError> {
    let sender = SenderContext::new(recipient_pub)?;
    let ctc = sender.seal(plaintext)?;
    Ok((sender.enc().to_vec(), ctc))
}

fn derive_key(
    shared: &[u8; 32],
    eph_pub: &[u8; 32],
    recipient_pub: &[u8; 32],
) -> Result<[u8; 32], ChannelError> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut info = Vec::with_capacity(CHANNEL_INFO.len() + 64);
    info.extend_from_slice(CHANNEL_INFO);
    info.extend_from_slice(eph_pub);
    info.extend_from_slice(recipient_pub);
    let mut okm = [0u8; 32];
    hk.expand(&info, &mut okm)
        .map_err(|_| ChannelError::KeyDerivationFailed)?;
    Ok(okm)
}

/// 파일 기반 키 교환: 프론트엔드가 읽는 공개키 문서
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayKeyDocument {
    pub public_key: String,
    pub algorithm: String,
    pub generated_at: String,
}

impl RelayKeyDocument {
    pub fn new(keypair: &RelayKeypair) -> Self {
        Self {
            public_key: keypair.public_key_b64(),
            algorithm: ALGORITHM.to_string(),
            generated_at: Utc::now().to_rfc3339(),
        }
    }
}

/// 공개키 문서를 원자적으로 기록 (temp 파일 → rename)
pub fn publish_public_key(path: &str, keypair: &RelayKeypair) -> anyhow::Result<RelayKeyDocument> {
    let doc = RelayKeyDocument::new(keypair);
    let json = serde_json::to_string_pretty(&doc)?;
    let tmp = format!("{}.tmp", path);
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(doc)
}
