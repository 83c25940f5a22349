//! 암호 프리미티브: 봉인 채널, 서명 검증, Poseidon 해시

pub mod channel;
pub mod poseidon;
pub mod signature;

pub use channel::{ChannelError, RelayKeypair, SenderContext};
pub use poseidon::{fr_from_hex, fr_to_hex, poseidon2, poseidon3, HashError};
pub use signature::{checksum_address, recover_signer, verify_personal_sign, SignatureError};
