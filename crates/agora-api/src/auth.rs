use jsonwebtoken::{DecodingKey, Validation, decode};

use agora_types::api::Claims;

/// Validate an HS256 bearer token and return its claims. `sub` is trusted
/// as the caller's user id.
pub fn decode_token(secret: &str, token: &str) -> jsonwebtoken::errors::Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Sign a token the way the identity provider does. Test-only.
#[cfg(test)]
pub(crate) fn issue_token(
    secret: &str,
    user_id: uuid::Uuid,
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    use jsonwebtoken::{EncodingKey, Header, encode};

    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn issued_tokens_decode_with_the_same_secret_only() {
        let user = Uuid::new_v4();
        let token = issue_token("s3cret", user, chrono::Duration::minutes(5)).unwrap();

        assert_eq!(decode_token("s3cret", &token).unwrap().sub, user);
        assert!(decode_token("other", &token).is_err());
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = issue_token("s3cret", Uuid::new_v4(), chrono::Duration::hours(-1)).unwrap();
        assert!(decode_token("s3cret", &token).is_err());
    }
}
