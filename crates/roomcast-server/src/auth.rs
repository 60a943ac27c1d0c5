//! HS256 bearer tokens.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use roomcast_core::{AuthError, Identity, TokenVerifier, UserId};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Token claims. `userId` may be a number or a numeric string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Display name.
    pub username: String,
    /// Account id.
    #[serde(rename = "userId")]
    pub user_id: ClaimUserId,
    /// Unix expiry; optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// `userId` as issued: a JSON number or a numeric string.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClaimUserId {
    /// `"userId": 7`
    Number(i64),
    /// `"userId": "7"`
    Text(String),
}

impl ClaimUserId {
    fn resolve(&self) -> Option<UserId> {
        match self {
            Self::Number(id) => Some(UserId::new(*id)),
            Self::Text(raw) => raw.parse().ok(),
        }
    }
}

/// HS256 [`TokenVerifier`] that can also mint tokens.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier and signer sharing one secret.
    pub fn new(secret: &SecretString) -> Self {
        let key = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required.
        validation.required_spec_claims.clear();
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
        }
    }

    /// Sign a token for `identity`, expiring after `ttl` if given.
    pub fn issue(&self, identity: &Identity, ttl: Option<Duration>) -> Result<String, AuthError> {
        let claims = Claims {
            username: identity.display_name.clone(),
            user_id: ClaimUserId::Number(identity.user_id.get()),
            exp: ttl.map(|ttl| jsonwebtoken::get_current_timestamp() + ttl.as_secs()),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::InvalidToken(format!("sign: {e}")))
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))?
            .claims;
        let user_id = claims
            .user_id
            .resolve()
            .ok_or_else(|| AuthError::InvalidToken("userId is not numeric".into()))?;
        if claims.username.is_empty() {
            return Err(AuthError::InvalidToken("empty username".into()));
        }
        Ok(Identity::new(user_id, claims.username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier(secret: &str) -> JwtVerifier {
        JwtVerifier::new(&SecretString::from(secret.to_string()))
    }

    fn sign(secret: &str, claims: serde_json::Value) -> String {
        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn issued_token_verifies() {
        let v = verifier("s3cret");
        let token = v.issue(&Identity::new(UserId::new(7), "alice"), Some(Duration::from_secs(60))).unwrap();
        assert_eq!(v.verify(&token).unwrap(), Identity::new(UserId::new(7), "alice"));
    }

    #[test]
    fn token_without_exp_is_accepted() {
        let token = sign("s3cret", json!({"username": "bob", "userId": 9}));
        assert_eq!(verifier("s3cret").verify(&token).unwrap().user_id, UserId::new(9));
    }

    #[test]
    fn string_user_id_is_accepted() {
        let token = sign("s3cret", json!({"username": "bob", "userId": "9"}));
        assert_eq!(verifier("s3cret").verify(&token).unwrap().user_id, UserId::new(9));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = verifier("one").issue(&Identity::new(UserId::new(7), "alice"), None).unwrap();
        let err = verifier("two").verify(&token).unwrap_err();
        assert_eq!(err.error_kind(), "invalid_token");
    }

    #[test]
    fn expired_token_is_rejected() {
        let exp = jsonwebtoken::get_current_timestamp() - 3600;
        let token = sign("s3cret", json!({"username": "bob", "userId": 9, "exp": exp}));
        assert!(matches!(verifier("s3cret").verify(&token), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn missing_subject_is_rejected() {
        for claims in [
            json!({"username": "bob"}),
            json!({"userId": 9}),
            json!({"username": "", "userId": 9}),
            json!({"username": "bob", "userId": "nine"}),
        ] {
            let token = sign("s3cret", claims);
            assert!(matches!(verifier("s3cret").verify(&token), Err(AuthError::InvalidToken(_))));
        }
    }

    #[test]
    fn empty_and_garbage_tokens() {
        let v = verifier("s3cret");
        assert_eq!(v.verify("  ").unwrap_err(), AuthError::MissingToken);
        assert!(matches!(v.verify("not.a.jwt"), Err(AuthError::InvalidToken(_))));
    }
}
