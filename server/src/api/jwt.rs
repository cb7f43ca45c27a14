use chrono::{DateTime, Duration, Utc};
use common::{DELETE_INTENT_TTL_SECS, Role, TOKEN_LEEWAY_SECS};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::models::User;
use crate::error::{Result, StatsError};

const SESSION_AUDIENCE: &str = "session";
const DELETE_INTENT_AUDIENCE: &str = "delete-stat";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub email: String,
    pub role: Role,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

/// Short-lived proof that `sub` asked to delete `stat_id`.
#[derive(Debug, Serialize, Deserialize)]
struct DeleteIntentClaims {
    sub: String,
    stat_id: i32,
    jti: String,
    aud: String,
    exp: i64,
    iat: i64,
}

/// Identity extracted from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub user_id: i32,
    pub email: String,
    pub role: Role,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Signs and verifies session and delete-intent tokens. Holds no mutable
/// state, so one instance is shared by every request.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    ttl: Duration,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &self.algorithm)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            ttl,
        }
    }

    fn validation(&self, audience: &str) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "sub", "aud"]);
        validation.leeway = TOKEN_LEEWAY_SECS;
        validation
    }

    /// Issues a session token; returns it with its expiry.
    pub fn issue(&self, user: &User, role: Role) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let exp = now + self.ttl;

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            role,
            aud: SESSION_AUDIENCE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let header = Header::new(self.algorithm);
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| StatsError::Internal(format!("Failed to encode JWT token: {}", e)))?;
        Ok((token, exp))
    }

    pub fn verify(&self, token: &str) -> Result<SessionUser> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation(SESSION_AUDIENCE))
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => StatsError::TokenExpired,
                _ => StatsError::TokenMalformed,
            })?;

        let claims = token_data.claims;
        let user_id = claims.sub.parse::<i32>().map_err(|_| StatsError::TokenMalformed)?;

        Ok(SessionUser {
            user_id,
            email: claims.email,
            role: claims.role,
        })
    }

    /// Issues the confirmation token of a two-step delete. `subject` names the
    /// caller that must present it back.
    pub fn issue_delete_intent(&self, subject: &str, stat_id: i32) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let exp = now + Duration::seconds(DELETE_INTENT_TTL_SECS);

        let claims = DeleteIntentClaims {
            sub: subject.to_string(),
            stat_id,
            jti: Uuid::new_v4().to_string(),
            aud: DELETE_INTENT_AUDIENCE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| StatsError::Internal(format!("Failed to encode delete intent: {}", e)))?;
        Ok((token, exp))
    }

    /// Checks that `token` is a live intent by `subject` for `stat_id`.
    pub fn verify_delete_intent(&self, token: &str, subject: &str, stat_id: i32) -> Result<()> {
        let rejected = |reason| StatsError::ConfirmationRequired {
            reason,
            confirmation_token: None,
            expires_at: None,
        };

        let token_data = decode::<DeleteIntentClaims>(
            token,
            &self.decoding_key,
            &self.validation(DELETE_INTENT_AUDIENCE),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => rejected("confirmation token has expired; request a new one"),
            _ => rejected("confirmation token is invalid"),
        })?;

        let claims = token_data.claims;
        if claims.sub != subject || claims.stat_id != stat_id {
            return Err(rejected("confirmation token does not match this request"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i32) -> User {
        User {
            id,
            email: format!("user{}@example.com", id),
            is_trusted: false,
            created_at: Utc::now(),
        }
    }

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::minutes(60))
    }

    #[test]
    fn test_session_round_trip() {
        let tokens = service();
        let (token, expires_at) = tokens.issue(&user(7), Role::Admin).unwrap();
        assert!(expires_at > Utc::now() + Duration::minutes(59));

        let session = tokens.verify(&token).unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.email, "user7@example.com");
        assert!(session.is_admin());
    }

    #[test]
    fn test_expired_token() {
        let expired = TokenService::new("test-secret", Duration::minutes(-5));
        let (token, _) = expired.issue(&user(1), Role::Guest).unwrap();
        assert!(matches!(service().verify(&token), Err(StatsError::TokenExpired)));
    }

    #[test]
    fn test_expiry_within_leeway_is_accepted() {
        let almost = TokenService::new("test-secret", Duration::seconds(-3));
        let (token, _) = almost.issue(&user(1), Role::Guest).unwrap();
        assert!(service().verify(&token).is_ok());
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let other = TokenService::new("other-secret", Duration::minutes(60));
        let (token, _) = other.issue(&user(1), Role::Admin).unwrap();
        assert!(matches!(service().verify(&token), Err(StatsError::TokenMalformed)));
        assert!(matches!(service().verify("not.a.jwt"), Err(StatsError::TokenMalformed)));
    }

    #[test]
    fn test_swapped_payload_rejected() {
        let tokens = service();
        let (guest, _) = tokens.issue(&user(1), Role::Guest).unwrap();
        let (admin, _) = tokens.issue(&user(2), Role::Admin).unwrap();

        let guest_parts: Vec<&str> = guest.split('.').collect();
        let admin_parts: Vec<&str> = admin.split('.').collect();
        let forged = format!("{}.{}.{}", guest_parts[0], admin_parts[1], guest_parts[2]);
        assert!(matches!(tokens.verify(&forged), Err(StatsError::TokenMalformed)));
    }

    #[test]
    fn test_delete_intent_bound_to_subject_and_stat() {
        let tokens = service();
        let (intent, expires_at) = tokens.issue_delete_intent("user:1", 42).unwrap();
        assert!(expires_at <= Utc::now() + Duration::seconds(DELETE_INTENT_TTL_SECS));

        assert!(tokens.verify_delete_intent(&intent, "user:1", 42).is_ok());
        assert!(matches!(
            tokens.verify_delete_intent(&intent, "user:2", 42),
            Err(StatsError::ConfirmationRequired { .. })
        ));
        assert!(tokens.verify_delete_intent(&intent, "user:1", 43).is_err());
    }

    #[test]
    fn test_tokens_do_not_cross_audiences() {
        let tokens = service();
        let (session, _) = tokens.issue(&user(1), Role::Admin).unwrap();
        let (intent, _) = tokens.issue_delete_intent("1", 5).unwrap();

        assert!(matches!(tokens.verify(&intent), Err(StatsError::TokenMalformed)));
        assert!(tokens.verify_delete_intent(&session, "1", 5).is_err());
    }

    #[test]
    fn test_intents_are_unique() {
        let tokens = service();
        let (a, _) = tokens.issue_delete_intent("service", 5).unwrap();
        let (b, _) = tokens.issue_delete_intent("service", 5).unwrap();
        assert_ne!(a, b);
    }
}
