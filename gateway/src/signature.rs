use common_types::SignatureAlgorithm;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Verify a webhook signature: HMAC over the raw body with the endpoint's
/// secret, compared in constant time. Tolerates the `sha256=`-style prefix
/// several providers put in front of the hex digest.
///
/// Callers only reach this when a secret is configured; an endpoint without
/// a secret is unauthenticated by choice and skips verification entirely.
pub fn verify(
    secret: &str,
    algorithm: SignatureAlgorithm,
    body: &[u8],
    provided: &str,
) -> bool {
    let provided = provided.trim();
    let provided = provided
        .strip_prefix("sha256=")
        .or_else(|| provided.strip_prefix("sha1="))
        .unwrap_or(provided);
    let Ok(signature) = hex::decode(provided) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts keys of any length");
            mac.update(body);
            mac.verify_slice(&signature).is_ok()
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts keys of any length");
            mac.update(body);
            mac.verify_slice(&signature).is_ok()
        }
    }
}

/// Hex HMAC digest of `body`, prefix-free. Tests and local tooling use this
/// to produce valid signatures.
pub fn sign(secret: &str, algorithm: SignatureAlgorithm, body: &[u8]) -> String {
    match algorithm {
        SignatureAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts keys of any length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
                .expect("hmac accepts keys of any length");
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_key";
    const BODY: &[u8] = br#"{"id": "evt_1", "type": "invoice.paid"}"#;

    #[test]
    fn correct_signature_verifies() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha256, BODY);
        assert!(verify(SECRET, SignatureAlgorithm::Sha256, BODY, &signature));
    }

    #[test]
    fn provider_prefix_is_tolerated() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha256, BODY);
        assert!(verify(
            SECRET,
            SignatureAlgorithm::Sha256,
            BODY,
            &format!("sha256={signature}")
        ));
    }

    #[test]
    fn any_body_mutation_fails() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha256, BODY);
        let mut tampered = BODY.to_vec();
        for i in 0..tampered.len() {
            tampered[i] ^= 0x01;
            assert!(
                !verify(SECRET, SignatureAlgorithm::Sha256, &tampered, &signature),
                "mutation at byte {i} still verified"
            );
            tampered[i] ^= 0x01;
        }
    }

    #[test]
    fn any_signature_mutation_fails() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha256, BODY);
        let mut bytes = signature.into_bytes();
        for i in 0..bytes.len() {
            let original = bytes[i];
            bytes[i] = if original == b'0' { b'1' } else { b'0' };
            let mutated = std::str::from_utf8(&bytes).unwrap();
            assert!(!verify(SECRET, SignatureAlgorithm::Sha256, BODY, mutated));
            bytes[i] = original;
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha256, BODY);
        assert!(!verify("other", SignatureAlgorithm::Sha256, BODY, &signature));
    }

    #[test]
    fn sha1_legacy_mode_works() {
        let signature = sign(SECRET, SignatureAlgorithm::Sha1, BODY);
        assert!(verify(SECRET, SignatureAlgorithm::Sha1, BODY, &signature));
        assert!(!verify(SECRET, SignatureAlgorithm::Sha256, BODY, &signature));
    }

    #[test]
    fn garbage_signatures_fail_cleanly() {
        assert!(!verify(SECRET, SignatureAlgorithm::Sha256, BODY, "not hex"));
        assert!(!verify(SECRET, SignatureAlgorithm::Sha256, BODY, ""));
    }
}
