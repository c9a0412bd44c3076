//! Access-token helpers: local HS256 verification, expiry peeking and
//! log-safe masking.

use base64::Engine;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use uuid::Uuid;

use super::AuthUser;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: serde_json::Value,
}

/// Verifies signature and expiry with the provider's shared JWT secret.
pub fn verify_hs256(token: &str, secret: &str) -> anyhow::Result<AuthUser> {
    let mut validation = Validation::new(Algorithm::HS256);
    // Hosted providers set `aud` to a role name, not to this service.
    validation.validate_aud = false;

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    let claims = data.claims;

    Ok(AuthUser {
        id: Uuid::parse_str(&claims.sub)
            .map_err(|e| anyhow::anyhow!("JWT 'sub' is not a UUID: {}", e))?,
        email: claims.email.filter(|e| !e.is_empty()),
        name: display_name(&claims.user_metadata),
    })
}

/// `name` or `full_name` from provider user metadata.
pub fn display_name(metadata: &serde_json::Value) -> Option<String> {
    ["name", "full_name"]
        .iter()
        .find_map(|k| metadata.get(*k).and_then(|v| v.as_str()))
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Reads `exp` without verifying the signature.
pub fn expires_at(token: &str) -> Option<i64> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let payload = engine.decode(parts[1]).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    claims.get("exp").and_then(|v| v.as_i64())
}

/// True when the token expires within `skew_secs` of `now`. Opaque tokens
/// are never considered stale; the upstream decides.
pub fn is_stale(token: &str, now: i64, skew_secs: i64) -> bool {
    match expires_at(token) {
        Some(exp) => exp - now <= skew_secs,
        None => false,
    }
}

/// Never log a bearer token in full.
pub fn mask(token: &str) -> String {
    if token.len() > 12 && token.is_char_boundary(6) && token.is_char_boundary(token.len() - 4) {
        format!("{}…{}", &token[..6], &token[token.len() - 4..])
    } else {
        "****".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "super-secret-jwt-token-with-at-least-32-characters";

    fn sign(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_hs256_accepts_valid_token() {
        let id = Uuid::new_v4();
        let token = sign(
            serde_json::json!({
                "sub": id.to_string(),
                "email": "ada@example.com",
                "aud": "authenticated",
                "exp": chrono::Utc::now().timestamp() + 3600,
                "user_metadata": {"full_name": "Ada Lovelace"},
            }),
            SECRET,
        );
        let user = verify_hs256(&token, SECRET).unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));
        assert_eq!(user.name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_verify_hs256_rejects_bad_signature_and_expiry() {
        let claims = serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "exp": chrono::Utc::now().timestamp() + 3600,
        });
        assert!(verify_hs256(&sign(claims, "another-secret"), SECRET).is_err());

        let expired = serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "exp": 1_000_000_000,
        });
        assert!(verify_hs256(&sign(expired, SECRET), SECRET).is_err());
    }

    #[test]
    fn test_is_stale_within_skew() {
        let now = 1_700_000_000;
        let soon = sign(serde_json::json!({"sub": "x", "exp": now + 10}), SECRET);
        let later = sign(serde_json::json!({"sub": "x", "exp": now + 600}), SECRET);
        assert!(is_stale(&soon, now, 30));
        assert!(!is_stale(&later, now, 30));
        assert!(!is_stale("opaque-token", now, 30));
    }

    #[test]
    fn test_mask_hides_middle() {
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9.payload.sig"), "eyJhbG….sig");
        assert_eq!(mask("short"), "****");
    }
}
