use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use super::{OpaqueRef, Xapi, XapiError};
use crate::model::{
    users::{RoleRecord, SubjectRecord},
    vms::{VmMetricsRecord, VmRecord},
};

/// Typed XAPI calls bound to one authenticated session.
#[derive(Clone)]
pub struct Remote {
    api: Arc<dyn Xapi>,
    session: OpaqueRef,
}

impl Remote {
    pub fn new(api: Arc<dyn Xapi>, session: OpaqueRef) -> Self {
        Self { api, session }
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, XapiError> {
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(json!(self.session));
        params.extend(args);

        let value = self.api.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| XapiError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })
    }

    async fn invoke_void(&self, method: &str, args: Vec<Value>) -> Result<(), XapiError> {
        self.invoke::<Value>(method, args).await.map(|_| ())
    }

    /// `get_all_records` style calls, keeping the order the server used.
    async fn records<R: DeserializeOwned>(
        &self,
        method: &str,
    ) -> Result<Vec<(OpaqueRef, R)>, XapiError> {
        let records: Map<String, Value> = self.invoke(method, vec![]).await?;
        records
            .into_iter()
            .map(|(reference, record)| {
                serde_json::from_value(record)
                    .map(|record| (OpaqueRef::new(reference), record))
                    .map_err(|e| XapiError::Decode {
                        method: method.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    pub async fn vm_get_all_records(&self) -> Result<Vec<(OpaqueRef, VmRecord)>, XapiError> {
        self.records("VM.get_all_records").await
    }

    pub async fn vm_get_by_uuid(&self, uuid: &str) -> Result<OpaqueRef, XapiError> {
        self.invoke("VM.get_by_uuid", vec![json!(uuid)]).await
    }

    pub async fn vm_get_by_name_label(&self, label: &str) -> Result<Vec<OpaqueRef>, XapiError> {
        self.invoke("VM.get_by_name_label", vec![json!(label)]).await
    }

    pub async fn vm_get_record(&self, vm: &OpaqueRef) -> Result<VmRecord, XapiError> {
        self.invoke("VM.get_record", vec![json!(vm)]).await
    }

    pub async fn vm_get_is_a_template(&self, vm: &OpaqueRef) -> Result<bool, XapiError> {
        self.invoke("VM.get_is_a_template", vec![json!(vm)]).await
    }

    pub async fn vm_metrics_get_record(
        &self,
        metrics: &OpaqueRef,
    ) -> Result<VmMetricsRecord, XapiError> {
        self.invoke("VM_metrics.get_record", vec![json!(metrics)])
            .await
    }

    pub async fn vm_start(
        &self,
        vm: &OpaqueRef,
        start_paused: bool,
        force: bool,
    ) -> Result<(), XapiError> {
        self.invoke_void("VM.start", vec![json!(vm), json!(start_paused), json!(force)])
            .await
    }

    pub async fn vm_hard_shutdown(&self, vm: &OpaqueRef) -> Result<(), XapiError> {
        self.invoke_void("VM.hard_shutdown", vec![json!(vm)]).await
    }

    pub async fn vm_clean_reboot(&self, vm: &OpaqueRef) -> Result<(), XapiError> {
        self.invoke_void("VM.clean_reboot", vec![json!(vm)]).await
    }

    pub async fn vm_clone(&self, vm: &OpaqueRef, new_name: &str) -> Result<OpaqueRef, XapiError> {
        self.invoke("VM.clone", vec![json!(vm), json!(new_name)])
            .await
    }

    pub async fn vm_set_memory_limits(
        &self,
        vm: &OpaqueRef,
        static_min: i64,
        static_max: i64,
        dynamic_min: i64,
        dynamic_max: i64,
    ) -> Result<(), XapiError> {
        self.invoke_void(
            "VM.set_memory_limits",
            vec![
                json!(vm),
                json!(static_min),
                json!(static_max),
                json!(dynamic_min),
                json!(dynamic_max),
            ],
        )
        .await
    }

    pub async fn vm_set_vcpus_max(&self, vm: &OpaqueRef, count: i64) -> Result<(), XapiError> {
        self.invoke_void("VM.set_VCPUs_max", vec![json!(vm), json!(count)])
            .await
    }

    pub async fn vm_set_vcpus_at_startup(
        &self,
        vm: &OpaqueRef,
        count: i64,
    ) -> Result<(), XapiError> {
        self.invoke_void("VM.set_VCPUs_at_startup", vec![json!(vm), json!(count)])
            .await
    }

    pub async fn vm_destroy(&self, vm: &OpaqueRef) -> Result<(), XapiError> {
        self.invoke_void("VM.destroy", vec![json!(vm)]).await
    }

    pub async fn subject_create(&self, subject_identifier: &str) -> Result<OpaqueRef, XapiError> {
        let record = json!({
            "subject_identifier": subject_identifier,
            "other_config": {},
        });
        self.invoke("subject.create", vec![record]).await
    }

    pub async fn subject_add_to_other_config(
        &self,
        subject: &OpaqueRef,
        key: &str,
        value: &str,
    ) -> Result<(), XapiError> {
        self.invoke_void(
            "subject.add_to_other_config",
            vec![json!(subject), json!(key), json!(value)],
        )
        .await
    }

    pub async fn subject_add_to_roles(
        &self,
        subject: &OpaqueRef,
        role: &OpaqueRef,
    ) -> Result<(), XapiError> {
        self.invoke_void("subject.add_to_roles", vec![json!(subject), json!(role)])
            .await
    }

    pub async fn subject_get_all_records(
        &self,
    ) -> Result<Vec<(OpaqueRef, SubjectRecord)>, XapiError> {
        self.records("subject.get_all_records").await
    }

    pub async fn subject_destroy(&self, subject: &OpaqueRef) -> Result<(), XapiError> {
        self.invoke_void("subject.destroy", vec![json!(subject)])
            .await
    }

    pub async fn role_get_by_name_label(&self, label: &str) -> Result<Vec<OpaqueRef>, XapiError> {
        self.invoke("role.get_by_name_label", vec![json!(label)])
            .await
    }

    pub async fn role_get_record(&self, role: &OpaqueRef) -> Result<RoleRecord, XapiError> {
        self.invoke("role.get_record", vec![json!(role)]).await
    }
}
