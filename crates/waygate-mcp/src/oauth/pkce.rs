//! PKCE (RFC 7636) and Credential Comparison
//!
//! Only the `S256` challenge method exists here: the challenge is the
//! base64url (no padding) encoding of the SHA-256 digest of the verifier.
//! `plain` is deliberately not implemented.

// Layer 2: Third-party crate imports
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// The single supported challenge method
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Compute the S256 challenge for a verifier
pub fn s256_challenge(code_verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()))
}

/// Whether a verifier satisfies a stored challenge
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    constant_time_eq(s256_challenge(code_verifier).as_bytes(), code_challenge.as_bytes())
}

/// Constant-time byte comparison: no early exit on mismatch, so timing
/// reveals nothing about how much of a secret matched.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        // The worked example from RFC 7636 Appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert_eq!(s256_challenge(verifier), challenge);
        assert!(verify_s256(verifier, challenge));
    }

    #[test]
    fn test_wrong_verifier_fails() {
        let challenge = s256_challenge("right-verifier");
        assert!(!verify_s256("wrong-verifier", &challenge));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secre7"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
        assert!(constant_time_eq(b"", b""));
    }

    proptest! {
        /// every verifier round-trips through its own challenge
        #[test]
        fn prop_pkce_roundtrip(verifier in "[A-Za-z0-9._~-]{43,64}") {
            let challenge = s256_challenge(&verifier);
            prop_assert!(verify_s256(&verifier, &challenge));
            // and tampering with the verifier breaks it
            let mut tampered = verifier.clone();
            tampered.push('x');
            prop_assert!(!verify_s256(&tampered, &challenge));
        }
    }
}
