use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenConfig;

/// Signs and verifies access tokens. Clients treat them as opaque strings.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_minutes: i64,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Tenant the token was issued for
    pub tid: Uuid,
    /// Highest-privilege role name at issue time
    pub role: String,
    /// Refresh session the token belongs to
    pub sid: Uuid,
    /// Second factor verified on the session at issue time
    #[serde(default)]
    pub mfa: bool,
    /// JWT ID
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

impl JwtService {
    pub fn new(config: &TokenConfig) -> Result<Self, anyhow::Error> {
        let secret = config.signing_secret.expose_secret().as_bytes();
        if secret.is_empty() {
            return Err(anyhow::anyhow!("Token signing secret is empty"));
        }

        tracing::info!("JWT service initialized with HS256 signing key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_token_expiry_minutes: config.access_token_ttl_minutes,
        })
    }

    /// Issues an access token and returns it with its expiry.
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
        role: &str,
        session_id: Uuid,
        mfa: bool,
    ) -> Result<(String, DateTime<Utc>), anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::minutes(self.access_token_expiry_minutes);

        let claims = AccessTokenClaims {
            sub: user_id,
            tid: tenant_id,
            role: role.to_string(),
            sid: session_id,
            mfa,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok((token, exp))
    }

    /// Verifies signature and expiry. Blacklist checks are the caller's job.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?;

        Ok(token_data.claims)
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;

    fn service() -> JwtService {
        JwtService::new(&IdentityConfig::for_tests().tokens).unwrap()
    }

    #[test]
    fn issued_tokens_validate_and_carry_claims() {
        let jwt = service();
        let (user, tenant, session) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (token, exp) = jwt
            .generate_access_token(user, tenant, "manager", session, true)
            .unwrap();

        let claims = jwt.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user);
        assert_eq!(claims.tid, tenant);
        assert_eq!(claims.sid, session);
        assert_eq!(claims.role, "manager");
        assert!(claims.mfa);
        assert_eq!(claims.exp, exp.timestamp());
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let jwt = service();
        let (token, _) = jwt
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), "viewer", Uuid::new_v4(), false)
            .unwrap();
        let mut tampered = token.clone();
        tampered.push('x');
        assert!(jwt.validate_access_token(&tampered).is_err());
    }

    #[test]
    fn tokens_from_another_key_are_rejected() {
        let mut other_config = IdentityConfig::for_tests().tokens;
        other_config.signing_secret =
            secrecy::Secret::new("a-completely-different-signing-secret-123".to_string());
        let other = JwtService::new(&other_config).unwrap();
        let (token, _) = other
            .generate_access_token(Uuid::new_v4(), Uuid::new_v4(), "viewer", Uuid::new_v4(), false)
            .unwrap();
        assert!(service().validate_access_token(&token).is_err());
    }
}
