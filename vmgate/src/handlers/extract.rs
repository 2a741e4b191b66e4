use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Path, Request, rejection::JsonRejection},
};
use http::request::Parts;
use serde::de::DeserializeOwned;
use uuid::{Uuid, Variant};

use crate::errors::Error;

/// `Json` with malformed bodies reported as [`Error::InvalidJson`].
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_)) => {
                Err(Error::InvalidJson)
            }
            Err(rejection) => Err(Error::Rejected {
                status: rejection.status(),
                message: rejection.body_text(),
            }),
        }
    }
}

/// The `{uuid}` path segment, validated as an RFC 4122 UUID (versions 1 to 5,
/// hyphenated form only).
#[derive(Debug, Clone, Copy)]
pub struct VmUuid(pub Uuid);

impl<S> FromRequestParts<S> for VmUuid
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| Error::InvalidUuid)?;
        parse_vm_uuid(&raw).map(VmUuid)
    }
}

pub fn parse_vm_uuid(raw: &str) -> Result<Uuid, Error> {
    if raw.len() != 36 {
        return Err(Error::InvalidUuid);
    }
    let uuid = Uuid::try_parse(raw).map_err(|_| Error::InvalidUuid)?;
    match (uuid.get_version_num(), uuid.get_variant()) {
        (1..=5, Variant::RFC4122) => Ok(uuid),
        _ => Err(Error::InvalidUuid),
    }
}
