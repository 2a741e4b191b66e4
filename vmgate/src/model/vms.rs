use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use strum_macros::{Display, EnumString};
use utoipa::ToSchema;
use validator::Validate;

use crate::{errors::Error, xapi::OpaqueRef};

/// A VM record as returned by `VM.get_record` / `VM.get_all_records`.
///
/// Only the fields the gateway reads are modelled.
#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct VmRecord {
    pub uuid: String,
    pub name_label: String,
    pub power_state: PowerState,
    #[serde(default)]
    pub is_a_template: bool,
    #[serde(default)]
    pub is_control_domain: bool,
    // int64 fields arrive as numbers from JSON-RPC and as strings from older bridges.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub memory_static_max: i64,
    #[serde(default)]
    pub metrics: OpaqueRef,
}

impl VmRecord {
    /// Templates and dom0 are not user-facing VMs.
    pub fn is_guest(&self) -> bool {
        !self.is_a_template && !self.is_control_domain
    }
}

#[serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct VmMetricsRecord {
    #[serde(rename = "VCPUs_utilisation", default)]
    pub vcpus_utilisation: BTreeMap<String, f64>,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub memory_actual: i64,
}

#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq, EnumString, Display, ToSchema)]
#[serde(from = "String")]
pub enum PowerState {
    Halted,
    Paused,
    Running,
    Suspended,
    Unknown,
}

impl From<String> for PowerState {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(PowerState::Unknown)
    }
}

/// Read-only projection of a guest VM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct Vm {
    pub uuid: String,
    pub name: String,
    pub power_state: PowerState,
    /// Static memory ceiling in bytes
    pub memory: i64,
}

impl From<VmRecord> for Vm {
    fn from(record: VmRecord) -> Self {
        Vm {
            uuid: record.uuid,
            name: record.name_label,
            power_state: record.power_state,
            memory: record.memory_static_max,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct VmMetrics {
    /// Utilisation fraction per VCPU index
    pub cpu_usage: BTreeMap<String, f64>,
    /// Memory currently in use, in bytes
    pub memory_usage: i64,
}

impl From<VmMetricsRecord> for VmMetrics {
    fn from(record: VmMetricsRecord) -> Self {
        VmMetrics {
            cpu_usage: record.vcpus_utilisation,
            memory_usage: record.memory_actual,
        }
    }
}

/// Body of `POST /vms` as sent by the client; every field is checked by hand so
/// that absent values produce a 400 instead of a deserialization error.
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct CreateVmRequest {
    pub name: Option<String>,
    /// Name label of the template to clone
    pub template: Option<String>,
    /// Memory in bytes, applied to static and dynamic limits alike
    pub memory: Option<i64>,
    pub vcpus: Option<i64>,
    /// Start the VM once it is configured
    pub start: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Validate)]
pub struct NewVm {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub template: String,
    #[validate(range(min = 1))]
    pub memory: i64,
    #[validate(range(min = 1))]
    pub vcpus: i64,
    pub start: bool,
}

impl TryFrom<CreateVmRequest> for NewVm {
    type Error = Error;

    fn try_from(request: CreateVmRequest) -> Result<Self, Self::Error> {
        let CreateVmRequest {
            name,
            template,
            memory,
            vcpus,
            start,
        } = request;

        match (
            name.filter(|n| !n.is_empty()),
            template.filter(|t| !t.is_empty()),
            memory.filter(|m| *m != 0),
            vcpus.filter(|v| *v != 0),
        ) {
            (Some(name), Some(template), Some(memory), Some(vcpus)) => {
                let vm = NewVm {
                    name,
                    template,
                    memory,
                    vcpus,
                    start: start.unwrap_or(false),
                };
                vm.validate()?;
                Ok(vm)
            }
            _ => Err(Error::MissingParameters),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct CreateVmResponse {
    /// Opaque reference of the new VM
    pub vm_ref: String,
}
