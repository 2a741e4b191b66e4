//! HTTP basic authentication for the single `admin` user.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use http::{HeaderValue, header::AUTHORIZATION, request::Parts};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use tracing::warn;

use crate::{App, errors::Error};

pub const ADMIN_USER: &str = "admin";

type HmacSha256 = Hmac<Sha256>;

// Both sides are MACed under the same key so `verify_slice` gives a
// constant-time comparison of fixed-length tags.
const TAG_KEY: &[u8] = b"vmgate basic auth";

fn tag(value: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(TAG_KEY).ok()?;
    mac.update(value.as_bytes());
    Some(mac)
}

#[derive(Clone)]
pub struct AdminCredentials {
    expected: Option<Arc<(Vec<u8>, Vec<u8>)>>,
}

impl AdminCredentials {
    /// An empty password disables the admin user entirely.
    pub fn new(password: &Secret<String>) -> Self {
        let password = password.expose_secret();
        if password.is_empty() {
            return Self { expected: None };
        }

        let expected = tag(ADMIN_USER)
            .zip(tag(password))
            .map(|(user, password)| {
                Arc::new((
                    user.finalize().into_bytes().to_vec(),
                    password.finalize().into_bytes().to_vec(),
                ))
            });
        Self { expected }
    }

    pub fn is_configured(&self) -> bool {
        self.expected.is_some()
    }

    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        let Some(expected) = &self.expected else {
            return false;
        };
        let Some((user, password)) = header.and_then(decode_basic) else {
            return false;
        };

        let user_ok = tag(&user).is_some_and(|mac| mac.verify_slice(&expected.0).is_ok());
        let password_ok =
            tag(&password).is_some_and(|mac| mac.verify_slice(&expected.1).is_ok());
        user_ok & password_ok
    }
}

fn decode_basic(header: &HeaderValue) -> Option<(String, String)> {
    let value = header.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Extractor guarding mutating routes. Place it before any other extractor so
/// credentials are checked ahead of path and body validation.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser;

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let authorized = parts
            .extensions
            .get::<App>()
            .is_some_and(|app| app.admin().verify(parts.headers.get(AUTHORIZATION)));

        if authorized {
            Ok(AdminUser)
        } else {
            warn!(uri = %parts.uri, "Rejected request without valid admin credentials");
            Err(Error::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, password: &str) -> HeaderValue {
        let encoded = STANDARD.encode(format!("{}:{}", user, password));
        HeaderValue::from_str(&format!("Basic {}", encoded)).unwrap()
    }

    #[test]
    fn accepts_the_admin_user() {
        let credentials = AdminCredentials::new(&Secret::new("s3cret".to_string()));
        assert!(credentials.verify(Some(&basic("admin", "s3cret"))));
    }

    #[test]
    fn rejects_wrong_user_password_or_scheme() {
        let credentials = AdminCredentials::new(&Secret::new("s3cret".to_string()));
        assert!(!credentials.verify(Some(&basic("root", "s3cret"))));
        assert!(!credentials.verify(Some(&basic("admin", "s3cret "))));
        assert!(!credentials.verify(Some(&HeaderValue::from_static("Bearer abc"))));
        assert!(!credentials.verify(Some(&HeaderValue::from_static("Basic !!!"))));
        assert!(!credentials.verify(None));
    }

    #[test]
    fn passwords_may_contain_colons() {
        let credentials = AdminCredentials::new(&Secret::new("a:b:c".to_string()));
        assert!(credentials.verify(Some(&basic("admin", "a:b:c"))));
    }

    #[test]
    fn empty_password_disables_admin() {
        let credentials = AdminCredentials::new(&Secret::new(String::new()));
        assert!(!credentials.is_configured());
        assert!(!credentials.verify(Some(&basic("admin", ""))));
    }
}
