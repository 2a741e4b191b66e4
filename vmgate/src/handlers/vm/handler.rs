use axum::Extension;
use http::StatusCode;
use tracing::instrument;

use crate::{
    App,
    auth::AdminUser,
    gateway::Transition,
    model::vms::{CreateVmRequest, CreateVmResponse, NewVm, Vm, VmMetrics},
};

use super::super::{
    ApiResponse, MessageResponse, Result,
    extract::{ApiJson, VmUuid},
};

#[utoipa::path(
    get,
    path = "/v1/api/vms",
    responses(
        (status = 200, description = "Guest VMs in pool order", body = Vec<Vm>),
        (status = 502, description = "Hypervisor unreachable or login rejected"),
        (status = 500, description = "Hypervisor call failed")
    ),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn list(Extension(env): Extension<App>) -> Result<ApiResponse<Vec<Vm>>> {
    let vms = env.gateway().list_vms().await?;
    Ok(ApiResponse {
        data: vms,
        code: StatusCode::OK,
    })
}

#[utoipa::path(
    get,
    path = "/v1/api/vms/{uuid}/metrics",
    params(
        ("uuid" = uuid::Uuid, Path, description = "VM UUID")
    ),
    responses(
        (status = 200, description = "Current VM metrics", body = VmMetrics),
        (status = 400, description = "Invalid UUID format"),
        (status = 404, description = "VM not found"),
        (status = 500, description = "Hypervisor call failed")
    ),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn metrics(
    Extension(env): Extension<App>,
    VmUuid(uuid): VmUuid,
) -> Result<ApiResponse<VmMetrics>> {
    let metrics = env.gateway().vm_metrics(uuid).await?;
    Ok(ApiResponse {
        data: metrics,
        code: StatusCode::OK,
    })
}

#[utoipa::path(
    post,
    path = "/v1/api/vms/{uuid}/start",
    params(
        ("uuid" = uuid::Uuid, Path, description = "VM UUID")
    ),
    responses(
        (status = 200, description = "VM started, or already running", body = MessageResponse),
        (status = 400, description = "Invalid UUID format"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "VM not found"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn start(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    VmUuid(uuid): VmUuid,
) -> Result<ApiResponse<MessageResponse>> {
    Ok(match env.gateway().start_vm(uuid).await? {
        Transition::Changed => MessageResponse::ok("VM started"),
        Transition::Unchanged => MessageResponse::ok("VM is already running"),
    })
}

#[utoipa::path(
    post,
    path = "/v1/api/vms/{uuid}/stop",
    params(
        ("uuid" = uuid::Uuid, Path, description = "VM UUID")
    ),
    responses(
        (status = 200, description = "VM stopped, or was not running", body = MessageResponse),
        (status = 400, description = "Invalid UUID format"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "VM not found"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn stop(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    VmUuid(uuid): VmUuid,
) -> Result<ApiResponse<MessageResponse>> {
    Ok(match env.gateway().stop_vm(uuid).await? {
        Transition::Changed => MessageResponse::ok("VM stopped"),
        Transition::Unchanged => MessageResponse::ok("VM is not running"),
    })
}

#[utoipa::path(
    post,
    path = "/v1/api/vms/{uuid}/reboot",
    params(
        ("uuid" = uuid::Uuid, Path, description = "VM UUID")
    ),
    responses(
        (status = 200, description = "VM rebooted, or was not running", body = MessageResponse),
        (status = 400, description = "Invalid UUID format"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "VM not found"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn reboot(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    VmUuid(uuid): VmUuid,
) -> Result<ApiResponse<MessageResponse>> {
    Ok(match env.gateway().reboot_vm(uuid).await? {
        Transition::Changed => MessageResponse::ok("VM rebooted"),
        Transition::Unchanged => MessageResponse::ok("VM is not running. Cannot reboot."),
    })
}

#[utoipa::path(
    post,
    path = "/v1/api/vms",
    request_body = CreateVmRequest,
    responses(
        (status = 201, description = "VM cloned from the template and configured", body = CreateVmResponse),
        (status = 400, description = "Missing required parameters or invalid JSON"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "Template not found"),
        (status = 409, description = "Template name is ambiguous"),
        (status = 422, description = "Invalid input"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn create(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    ApiJson(request): ApiJson<CreateVmRequest>,
) -> Result<ApiResponse<CreateVmResponse>> {
    let vm = NewVm::try_from(request)?;
    let vm_ref = env.gateway().create_vm(vm).await?;
    Ok(ApiResponse {
        data: CreateVmResponse {
            vm_ref: vm_ref.to_string(),
        },
        code: StatusCode::CREATED,
    })
}

#[utoipa::path(
    delete,
    path = "/v1/api/vms/{uuid}",
    params(
        ("uuid" = uuid::Uuid, Path, description = "VM UUID")
    ),
    responses(
        (status = 200, description = "VM shut down if needed and destroyed", body = MessageResponse),
        (status = 400, description = "Invalid UUID format"),
        (status = 401, description = "Missing or invalid admin credentials"),
        (status = 404, description = "VM not found"),
        (status = 500, description = "Hypervisor call failed")
    ),
    security(("basic_auth" = [])),
    tag = "vms"
)]
#[instrument(skip(env))]
pub async fn delete(
    _admin: AdminUser,
    Extension(env): Extension<App>,
    VmUuid(uuid): VmUuid,
) -> Result<ApiResponse<MessageResponse>> {
    env.gateway().delete_vm(uuid).await?;
    Ok(MessageResponse::ok("VM deleted"))
}
