//! Bearer token issuance and validation
//!
//! Tokens are compact signed blobs: `base64url(claims-json).base64url(sig)`
//! with an HMAC-SHA256 signature over the encoded claims. Validation
//! checks the signature in constant time, then the expiry. Tokens are
//! stateless; logout is client-side discard.

use crate::error::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Session roles. Admin strictly outranks viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

impl Role {
    pub fn can_write(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Viewer => "viewer",
        }
    }
}

/// Claims carried by a bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
}

impl Claims {
    pub fn new(sub: &str, role: Role, lifetime_minutes: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: sub.to_string(),
            role,
            iat: now,
            exp: now + lifetime_minutes * 60,
        }
    }

    pub fn expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

fn mac_for(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Internal("Signing secret rejected by HMAC".to_string()))
}

/// Issue a signed token for the claims.
pub fn sign_token(claims: &Claims, secret: &str) -> Result<String> {
    let payload = serde_json::to_vec(claims)
        .map_err(|e| Error::Internal(format!("Claims serialisation failed: {e}")))?;
    let encoded = URL_SAFE_NO_PAD.encode(&payload);

    let mut mac = mac_for(secret)?;
    mac.update(encoded.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{encoded}.{sig}"))
}

/// Verify integrity and expiry; returns the claims on success.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims> {
    let (encoded, sig) = token
        .split_once('.')
        .ok_or_else(|| Error::AuthMissing("Malformed token".to_string()))?;

    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig)
        .map_err(|_| Error::AuthMissing("Malformed token signature".to_string()))?;

    let mut mac = mac_for(secret)?;
    mac.update(encoded.as_bytes());
    mac.verify_slice(&sig_bytes)
        .map_err(|_| Error::AuthMissing("Invalid token signature".to_string()))?;

    let payload = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::AuthMissing("Malformed token payload".to_string()))?;
    let claims: Claims = serde_json::from_slice(&payload)
        .map_err(|_| Error::AuthMissing("Malformed token claims".to_string()))?;

    if claims.expired() {
        return Err(Error::AuthMissing("Token has expired".to_string()));
    }

    Ok(claims)
}

/// Constant-time string equality for credential comparison.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = (a.len() ^ b.len()) as u8;
    let max = a.len().max(b.len());
    for i in 0..max {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_sign_verify_round_trip() {
        let claims = Claims::new("admin", Role::Admin, 60);
        let token = sign_token(&claims, SECRET).unwrap();
        let verified = verify_token(&token, SECRET).unwrap();
        assert_eq!(verified, claims);
        assert!(verified.role.can_write());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let claims = Claims::new("admin", Role::Admin, 60);
        let token = sign_token(&claims, SECRET).unwrap();
        assert!(matches!(
            verify_token(&token, "other-secret"),
            Err(Error::AuthMissing(_))
        ));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let claims = Claims::new("viewer", Role::Viewer, 60);
        let token = sign_token(&claims, SECRET).unwrap();
        let (payload, sig) = token.split_once('.').unwrap();

        // Swap the role inside the payload, keep the original signature
        let mut decoded = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let as_str = String::from_utf8(decoded.clone()).unwrap();
        decoded = as_str.replace("viewer", "admin0").into_bytes();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(decoded), sig);

        assert!(verify_token(&forged, SECRET).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = Claims::new("admin", Role::Admin, 60);
        claims.exp = Utc::now().timestamp() - 10;
        let token = sign_token(&claims, SECRET).unwrap();
        assert!(verify_token(&token, SECRET).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secre"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }

    #[test]
    fn test_viewer_cannot_write() {
        assert!(!Role::Viewer.can_write());
    }
}
