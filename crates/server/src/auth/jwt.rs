use anyhow::{anyhow, bail, Context};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub const SESSION_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// HS256 session tokens for the web REST surface.
///
/// Sign-in lives elsewhere; this service only needs to mint tokens for tests
/// and local tooling, and to validate what the sign-in service hands out.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionTokenService {
    pub fn new(secret: &str) -> anyhow::Result<Self> {
        if secret.len() < 32 {
            bail!("jwt secret must be at least 32 characters long");
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    pub fn issue_session_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        self.issue_session_token_at(user_id, current_unix_timestamp()?)
    }

    fn issue_session_token_at(&self, user_id: Uuid, issued_at: i64) -> anyhow::Result<String> {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            iat: issued_at,
            exp: issued_at + SESSION_TOKEN_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .context("failed to encode session token")
    }

    /// Returns the user id carried in `sub`.
    pub fn validate_session_token(&self, token: &str) -> anyhow::Result<Uuid> {
        let claims = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .context("failed to decode session token")?
            .claims;

        Uuid::parse_str(&claims.sub)
            .with_context(|| format!("session token subject '{}' is not a UUID", claims.sub))
    }
}

fn current_unix_timestamp() -> anyhow::Result<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| anyhow!("system clock is before unix epoch: {error}"))?;

    i64::try_from(duration.as_secs()).context("unix timestamp overflow")
}
