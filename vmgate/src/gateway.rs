//! The named VM and user operations exposed over HTTP.
//!
//! Each operation checks a session out, performs its calls, and checks the
//! session back in on every path. The body runs on its own task, so a client
//! hanging up mid-request does not leave the call sequence half-issued or the
//! session unreleased. A body that panics is reported as aborted and its
//! session is logged out.

use std::{collections::HashMap, future::Future, sync::Arc};

use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    credentials,
    errors::GatewayError,
    model::{
        users::{NewUser, SUBJECT_NAME_KEY, SUBJECT_PASSWORD_HASH_KEY, User},
        vms::{NewVm, PowerState, Vm, VmMetrics},
    },
    session::SessionManager,
    xapi::{OpaqueRef, Remote},
};

/// Whether a power operation had anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed,
    Unchanged,
}

#[derive(Clone)]
pub struct Gateway {
    sessions: Arc<SessionManager>,
}

/// Resolve a by-name lookup to exactly one reference.
fn single_match<T>(kind: &'static str, name: &str, mut matches: Vec<T>) -> Result<T, GatewayError> {
    match matches.len() {
        0 => Err(GatewayError::NotFound(format!("{} {:?}", kind, name))),
        1 => Ok(matches.remove(0)),
        count => Err(GatewayError::AmbiguousMatch {
            kind,
            name: name.to_string(),
            count,
        }),
    }
}

impl Gateway {
    pub fn new(sessions: SessionManager) -> Self {
        Self {
            sessions: Arc::new(sessions),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    async fn scoped<T, F, Fut>(&self, work: F) -> Result<T, GatewayError>
    where
        F: FnOnce(Remote) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, GatewayError>> + Send + 'static,
        T: Send + 'static,
    {
        let sessions = self.sessions.clone();
        let task = tokio::spawn(async move {
            let session = sessions.checkout().await?;
            let remote = sessions.remote(&session);
            let mut slot = Some(session);

            let result = tokio::spawn(work(remote)).await.unwrap_or_else(|e| {
                error!(error = %e, "Gateway operation panicked");
                Err(GatewayError::Aborted)
            });
            let reusable = match &result {
                Ok(_) => true,
                Err(e) => !e.invalidates_session(),
            };
            sessions.checkin(&mut slot, reusable).await;
            result
        });

        task.await.unwrap_or_else(|e| {
            error!(error = %e, "Gateway operation task failed");
            Err(GatewayError::Aborted)
        })
    }

    #[instrument(skip(self))]
    pub async fn list_vms(&self) -> Result<Vec<Vm>, GatewayError> {
        self.scoped(|remote| async move {
            let records = remote.vm_get_all_records().await?;
            Ok(records
                .into_iter()
                .map(|(_, record)| record)
                .filter(|record| record.is_guest())
                .map(Vm::from)
                .collect())
        })
        .await
        .inspect_err(|e| error!(error = %e, "Error listing VMs"))
    }

    #[instrument(skip(self))]
    pub async fn vm_metrics(&self, vm_uuid: Uuid) -> Result<VmMetrics, GatewayError> {
        self.scoped(move |remote| async move {
            let vm_ref = remote.vm_get_by_uuid(&vm_uuid.to_string()).await?;
            let vm = remote.vm_get_record(&vm_ref).await?;
            let metrics = remote.vm_metrics_get_record(&vm.metrics).await?;
            Ok(VmMetrics::from(metrics))
        })
        .await
        .inspect_err(|e| error!(%vm_uuid, error = %e, "Error getting VM metrics"))
    }

    #[instrument(skip(self))]
    pub async fn start_vm(&self, vm_uuid: Uuid) -> Result<Transition, GatewayError> {
        self.scoped(move |remote| async move {
            let vm_ref = remote.vm_get_by_uuid(&vm_uuid.to_string()).await?;
            let vm = remote.vm_get_record(&vm_ref).await?;
            if vm.power_state == PowerState::Running {
                info!(vm = %vm.name_label, "VM is already running");
                return Ok(Transition::Unchanged);
            }

            remote.vm_start(&vm_ref, false, false).await?;
            info!(vm = %vm.name_label, "VM started");
            Ok(Transition::Changed)
        })
        .await
        .inspect_err(|e| error!(%vm_uuid, error = %e, "Error starting VM"))
    }

    #[instrument(skip(self))]
    pub async fn stop_vm(&self, vm_uuid: Uuid) -> Result<Transition, GatewayError> {
        self.scoped(move |remote| async move {
            let vm_ref = remote.vm_get_by_uuid(&vm_uuid.to_string()).await?;
            let vm = remote.vm_get_record(&vm_ref).await?;
            if vm.power_state != PowerState::Running {
                info!(vm = %vm.name_label, "VM is not running");
                return Ok(Transition::Unchanged);
            }

            remote.vm_hard_shutdown(&vm_ref).await?;
            info!(vm = %vm.name_label, "VM stopped");
            Ok(Transition::Changed)
        })
        .await
        .inspect_err(|e| error!(%vm_uuid, error = %e, "Error stopping VM"))
    }

    #[instrument(skip(self))]
    pub async fn reboot_vm(&self, vm_uuid: Uuid) -> Result<Transition, GatewayError> {
        self.scoped(move |remote| async move {
            let vm_ref = remote.vm_get_by_uuid(&vm_uuid.to_string()).await?;
            let vm = remote.vm_get_record(&vm_ref).await?;
            if vm.power_state != PowerState::Running {
                info!(vm = %vm.name_label, "VM is not running. Cannot reboot.");
                return Ok(Transition::Unchanged);
            }

            remote.vm_clean_reboot(&vm_ref).await?;
            info!(vm = %vm.name_label, "VM rebooted");
            Ok(Transition::Changed)
        })
        .await
        .inspect_err(|e| error!(%vm_uuid, error = %e, "Error rebooting VM"))
    }

    /// Clone `vm.template` and size the copy. A failure after the clone leaves
    /// the partially configured VM in place.
    #[instrument(skip(self))]
    pub async fn create_vm(&self, vm: NewVm) -> Result<OpaqueRef, GatewayError> {
        let name = vm.name.clone();
        self.scoped(move |remote| async move {
            let mut templates = Vec::new();
            for candidate in remote.vm_get_by_name_label(&vm.template).await? {
                if remote.vm_get_is_a_template(&candidate).await? {
                    templates.push(candidate);
                }
            }
            let template = single_match("template", &vm.template, templates)?;

            let new_vm = remote.vm_clone(&template, &vm.name).await?;
            remote
                .vm_set_memory_limits(&new_vm, vm.memory, vm.memory, vm.memory, vm.memory)
                .await?;
            remote.vm_set_vcpus_max(&new_vm, vm.vcpus).await?;
            remote.vm_set_vcpus_at_startup(&new_vm, vm.vcpus).await?;

            if vm.start {
                remote.vm_start(&new_vm, false, false).await?;
            }

            info!(vm = %vm.name, vm_ref = %new_vm, "VM created successfully");
            Ok(new_vm)
        })
        .await
        .inspect_err(|e| error!(vm = %name, error = %e, "Error creating VM"))
    }

    #[instrument(skip(self))]
    pub async fn delete_vm(&self, vm_uuid: Uuid) -> Result<(), GatewayError> {
        self.scoped(move |remote| async move {
            let vm_ref = remote.vm_get_by_uuid(&vm_uuid.to_string()).await?;
            let vm = remote.vm_get_record(&vm_ref).await?;
            if vm.power_state == PowerState::Running {
                remote.vm_hard_shutdown(&vm_ref).await?;
            }

            remote.vm_destroy(&vm_ref).await?;
            info!(%vm_uuid, "VM deleted successfully");
            Ok(())
        })
        .await
        .inspect_err(|e| error!(%vm_uuid, error = %e, "Error deleting VM"))
    }

    /// Create a subject carrying the username and an argon2 hash of the
    /// password, then grant it `user.role`.
    #[instrument(skip(self))]
    pub async fn create_user(&self, user: NewUser) -> Result<OpaqueRef, GatewayError> {
        let NewUser {
            username,
            password,
            role,
        } = user;
        let password_hash = credentials::hash_password_blocking(password).await?;
        let context = username.clone();

        self.scoped(move |remote| async move {
            let subject = remote.subject_create(&username).await?;
            remote
                .subject_add_to_other_config(&subject, SUBJECT_NAME_KEY, &username)
                .await?;
            remote
                .subject_add_to_other_config(&subject, SUBJECT_PASSWORD_HASH_KEY, &password_hash)
                .await?;

            let role_ref = single_match("role", &role, remote.role_get_by_name_label(&role).await?)?;
            remote.subject_add_to_roles(&subject, &role_ref).await?;

            info!(%username, %role, "User created successfully");
            Ok(subject)
        })
        .await
        .inspect_err(|e| error!(username = %context, error = %e, "Error creating user"))
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, username: String) -> Result<(), GatewayError> {
        let context = username.clone();
        self.scoped(move |remote| async move {
            let matches: Vec<OpaqueRef> = remote
                .subject_get_all_records()
                .await?
                .into_iter()
                .filter(|(_, subject)| subject.username() == username)
                .map(|(subject_ref, _)| subject_ref)
                .collect();
            let subject = single_match("user", &username, matches)?;

            remote.subject_destroy(&subject).await?;
            info!(%username, "User deleted successfully");
            Ok(())
        })
        .await
        .inspect_err(|e| error!(username = %context, error = %e, "Error deleting user"))
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<User>, GatewayError> {
        self.scoped(|remote| async move {
            let subjects = remote.subject_get_all_records().await?;
            let mut role_names: HashMap<OpaqueRef, String> = HashMap::new();
            let mut users = Vec::with_capacity(subjects.len());

            for (_, subject) in subjects {
                let mut roles = Vec::with_capacity(subject.roles.len());
                for role in &subject.roles {
                    if let Some(name) = role_names.get(role) {
                        roles.push(name.clone());
                        continue;
                    }
                    let name = remote.role_get_record(role).await?.name_label;
                    role_names.insert(role.clone(), name.clone());
                    roles.push(name);
                }

                users.push(User {
                    uuid: subject.uuid.clone(),
                    username: subject.username().to_string(),
                    roles,
                });
            }

            Ok(users)
        })
        .await
        .inspect_err(|e| error!(error = %e, "Error listing users"))
    }
}
