use crate::{
    App,
    errors::{Error, GatewayError},
    rate_limit,
};
use axum::{
    Extension, Json, Router,
    body::Body,
    middleware,
    response::{self, IntoResponse, Response},
    routing::{delete, get, post},
};
use http::{
    HeaderValue, Request, StatusCode,
    header::{HeaderName, RETRY_AFTER, WWW_AUTHENTICATE},
};
use serde::Serialize;
use serde_with::DisplayFromStr;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    Modify, OpenApi, ToSchema,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;
use validator::ValidationErrors;

pub mod extract;
mod user;
mod vm;

pub type Result<T, E = Error> = ::std::result::Result<T, E>;

#[derive(OpenApi)]
#[openapi(
    paths(
        vm::handler::list,
        vm::handler::metrics,
        vm::handler::start,
        vm::handler::stop,
        vm::handler::reboot,
        vm::handler::create,
        vm::handler::delete,
        user::handler::list,
        user::handler::create,
        user::handler::delete,
    ),
    components(
        schemas(
            crate::model::vms::Vm,
            crate::model::vms::VmMetrics,
            crate::model::vms::PowerState,
            crate::model::vms::CreateVmRequest,
            crate::model::vms::CreateVmResponse,
            crate::model::users::User,
            crate::model::users::CreateUserRequest,
            crate::model::users::CreateUserResponse,
            MessageResponse,
        )
    ),
    modifiers(&BasicAuthScheme),
    tags(
        (name = "vms", description = "Virtual machine lifecycle and metrics"),
        (name = "users", description = "XAPI subjects and role assignment")
    ),
    info(
        title = "vmgate API",
        version = "0.1.0",
        description = "REST gateway for virtual machines on a XAPI (XenServer / XCP-ng) pool"
    )
)]
pub struct ApiDoc;

struct BasicAuthScheme;

impl Modify for BasicAuthScheme {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "basic_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Basic).build()),
            );
        }
    }
}

pub fn app(env: App) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/v1/api", vms().merge(users()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(rate_limit::enforce))
        .layer(
            ServiceBuilder::new()
                .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
                .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                        let request_id = request
                            .extensions()
                            .get::<RequestId>()
                            .map(|value| value.header_value().to_str().unwrap_or_default())
                            .unwrap_or_default();

                        tracing::info_span!(
                            "HTTP",
                            http.method = %request.method(),
                            http.url = %request.uri(),
                            request_id = %request_id,
                        )
                    }),
                ),
        )
        .layer(Extension(env))
}

fn vms() -> Router {
    Router::new()
        .route("/vms", get(vm::handler::list).post(vm::handler::create))
        .route("/vms/{uuid}", delete(vm::handler::delete))
        .route("/vms/{uuid}/metrics", get(vm::handler::metrics))
        .route("/vms/{uuid}/start", post(vm::handler::start))
        .route("/vms/{uuid}/stop", post(vm::handler::stop))
        .route("/vms/{uuid}/reboot", post(vm::handler::reboot))
}

fn users() -> Router {
    Router::new()
        .route(
            "/users",
            get(user::handler::list).post(user::handler::create),
        )
        .route("/users/{username}", delete(user::handler::delete))
}

pub struct ApiResponse<T> {
    data: T,
    code: StatusCode,
}

impl<T> IntoResponse for ApiResponse<T>
where
    T: Send + Sync + Serialize,
{
    fn into_response(self) -> Response {
        let mut response = response::Json(self.data).into_response();

        *response.status_mut() = self.code;
        response
    }
}

#[derive(Serialize, serde::Deserialize, Debug, Clone, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn ok(message: &str) -> ApiResponse<MessageResponse> {
        ApiResponse {
            data: MessageResponse {
                message: message.to_string(),
            },
            code: StatusCode::OK,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        #[serde_with::serde_as]
        #[serde_with::skip_serializing_none]
        #[derive(serde::Serialize)]
        struct ErrorResponse<'a> {
            // Serialize the `Display` output as the error message
            #[serde_as(as = "DisplayFromStr")]
            error: &'a Error,

            errors: Option<&'a ValidationErrors>,
        }

        let errors = match &self {
            Error::InvalidEntity(errors) => Some(errors),
            _ => None,
        };

        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("API error: {:?}", self);
        } else {
            tracing::warn!("API error: {}", self);
        }

        let mut response = (
            status,
            Json(ErrorResponse {
                error: &self,
                errors,
            }),
        )
            .into_response();

        match &self {
            Error::Unauthorized => {
                response.headers_mut().insert(
                    WWW_AUTHENTICATE,
                    HeaderValue::from_static("Basic realm=\"vmgate\""),
                );
            }
            Error::RateLimited {
                retry_after_seconds,
            } => {
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
            }
            _ => {}
        }
        response
    }
}

impl Error {
    fn status_code(&self) -> StatusCode {
        use Error::*;

        match self {
            Gateway(err) => match err {
                GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::AmbiguousMatch { .. } => StatusCode::CONFLICT,
                GatewayError::Connection { .. } => StatusCode::BAD_GATEWAY,
                GatewayError::Config(_)
                | GatewayError::Upstream(_)
                | GatewayError::Credential(_)
                | GatewayError::Aborted => StatusCode::INTERNAL_SERVER_ERROR,
            },
            InvalidEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InvalidUuid | MissingParameters | InvalidJson => StatusCode::BAD_REQUEST,
            Unauthorized => StatusCode::UNAUTHORIZED,
            RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejected { status, .. } => *status,
        }
    }
}
