//! Usage: Security-sensitive helpers (state tokens, token masking, constant-time equality).

use rand::RngCore;
use subtle::ConstantTimeEq;

const STATE_TOKEN_BYTES: usize = 16;
const TOKEN_MASK_PREFIX_LEN: usize = 6;
const TOKEN_MASK_SUFFIX_LEN: usize = 4;

/// Generate the per-attempt anti-forgery state token: 16 random bytes,
/// hex-encoded. Never persisted, never reused across attempts.
pub(crate) fn generate_state_token() -> String {
    let mut random = [0u8; STATE_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut random);
    let mut out = String::with_capacity(STATE_TOKEN_BYTES * 2);
    for byte in random {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub(crate) fn mask_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let len = trimmed.len();
    if len <= TOKEN_MASK_PREFIX_LEN + TOKEN_MASK_SUFFIX_LEN {
        return "*".repeat(len.min(8));
    }

    let prefix = &trimmed[..TOKEN_MASK_PREFIX_LEN];
    let suffix = &trimmed[len - TOKEN_MASK_SUFFIX_LEN..];
    format!("{prefix}...{suffix}")
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
