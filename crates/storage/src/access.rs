use sha2::{Digest, Sha256};
use std::fmt;

/// Shared secret gating relay uploads.
///
/// Only a digest of the secret is kept. With no secret configured every
/// code is rejected.
#[derive(Clone)]
pub struct AccessCode {
    digest: Option<[u8; 32]>,
}

impl AccessCode {
    /// An empty secret counts as none.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            digest: secret.filter(|s| !s.is_empty()).map(digest),
        }
    }

    pub fn disabled() -> Self {
        Self { digest: None }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }

    /// Compare in time independent of where the inputs differ: both sides
    /// are hashed to a fixed width and every byte is folded in.
    pub fn verify(&self, candidate: &str) -> bool {
        let offered = digest(candidate);
        let expected = self.digest.unwrap_or([0u8; 32]);
        let diff = offered
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));
        self.digest.is_some() && diff == 0
    }
}

impl fmt::Debug for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_configured() { "<redacted>" } else { "<none>" };
        f.debug_tuple("AccessCode").field(&state).finish()
    }
}

fn digest(s: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_secret_rejects_everything() {
        for code in ["", "x", "secret"] {
            assert!(!AccessCode::disabled().verify(code));
            assert!(!AccessCode::new(None).verify(code));
            assert!(!AccessCode::new(Some("")).verify(code));
        }
    }

    #[test]
    fn test_exact_match_only() {
        let code = AccessCode::new(Some("lightning42"));
        assert!(code.verify("lightning42"));
        for near in ["lightning43", "Lightning42", "lightning4", "lightning422", ""] {
            assert!(!code.verify(near), "{near}");
        }
    }

    #[test]
    fn test_debug_never_shows_secret() {
        let code = AccessCode::new(Some("hunter2"));
        assert!(!format!("{code:?}").contains("hunter2"));
    }
}
