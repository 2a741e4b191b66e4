use axum::{Extension, extract::Path};
use http::StatusCode;
use tracing::instrument;

use crate::{
    App,
    auth::AdminUser,
    model::users::{CreateUserRequest, CreateUserResponse, NewUser, User},
};

use super::super::{ApiResponse, MessageResponse, Result, extract::ApiJson};

#[utoipa::path(
    get,
    path = "/v1/api/users",
    responses(
        (status = 200, description = "Subjects with their role names", body = Vec<User>),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "users"
)]
#[instrument(skip(env))]
pub async fn list(
    _admin: AdminUser,
    Extension(env): Extension<App>,
) -> Result<ApiResponse<Vec<User>>> {
    let users = env.gateway().list_users().await?;
    Ok(ApiResponse {
        data: users,
        code: StatusCode::OK,
    })
}

#[utoipa::path(
    post,
    path = "/v1/api/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "Subject created and granted the role", body = CreateUserResponse),
        (status = 400, description = "Missing required parameters or invalid JSON"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "Role not found"),
        (status = 409, description = "Role name is ambiguous"),
        (status = 422, description = "Invalid input"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "users"
)]
#[instrument(skip(env, body))]
pub async fn create(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    ApiJson(body): ApiJson<CreateUserRequest>,
) -> Result<ApiResponse<CreateUserResponse>> {
    let user = NewUser::try_from(body)?;
    let subject_ref = env.gateway().create_user(user).await?;
    Ok(ApiResponse {
        data: CreateUserResponse {
            subject_ref: subject_ref.to_string(),
        },
        code: StatusCode::CREATED,
    })
}

#[utoipa::path(
    delete,
    path = "/v1/api/users/{username}",
    params(
        ("username" = String, Path, description = "Username the subject was created with")
    ),
    responses(
        (status = 200, description = "Subject destroyed", body = MessageResponse),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "No subject with that username"),
        (status = 409, description = "Several subjects share that username"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "users"
)]
#[instrument(skip(env))]
pub async fn delete(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    Path(username): Path<String>,
) -> Result<ApiResponse<MessageResponse>> {
    env.gateway().delete_user(username).await?;
    Ok(MessageResponse::ok("User deleted"))
}
