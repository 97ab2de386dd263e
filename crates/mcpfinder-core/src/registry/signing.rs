//! HMAC-SHA256 request signing.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme used for signed submissions.
pub const SIGNATURE_SCHEME: &str = "HMAC";

/// Hex-encoded HMAC-SHA256 of `body` under `secret`.
///
/// Returns `None` only if the key is rejected by the MAC, which HMAC never
/// does for any key length.
pub fn sign(secret: &SecretString, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// `Authorization` header value for a signature.
pub fn authorization_value(signature: &str) -> String {
    format!("{SIGNATURE_SCHEME} {signature}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2() {
        let secret = SecretString::from("Jefe".to_string());
        assert_eq!(
            sign(&secret, b"what do ya want for nothing?").as_deref(),
            Some("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843")
        );
    }

    #[test]
    fn test_signature_depends_on_every_byte() {
        let secret = SecretString::from("s3cret".to_string());
        let a = sign(&secret, br#"{"name":"a"}"#).unwrap();
        let b = sign(&secret, br#"{"name": "a"}"#).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(authorization_value(&a), format!("HMAC {a}"));
    }
}
