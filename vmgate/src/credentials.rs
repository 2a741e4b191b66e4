use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use rand::rngs::OsRng;

use crate::errors::GatewayError;

/// Hash `password` into an argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, GatewayError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatewayError::Credential(e.to_string()))
}

/// Hashing is CPU-bound; keep it off the async workers.
pub async fn hash_password_blocking(password: String) -> Result<String, GatewayError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| GatewayError::Credential(e.to_string()))?
}
