//! `coordination.k8s.io/v1` Lease backend

use super::backend::{LeaseBackend, LeaseError, LeaseRecord};
use async_trait::async_trait;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::PostParams;
use kube::{Api, Client};
use std::time::Duration;

/// Lease record stored as a Kubernetes `Lease` object
#[derive(Clone)]
pub struct KubeLeaseBackend {
    api: Api<Lease>,
    name: String,
    namespace: String,
}

impl KubeLeaseBackend {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn map_error(&self, err: kube::Error) -> LeaseError {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => LeaseError::Conflict(self.describe()),
            kube::Error::Api(resp) if resp.code == 404 => LeaseError::NotFound(self.describe()),
            other => LeaseError::Backend(other.to_string()),
        }
    }

    fn to_lease(&self, record: &LeaseRecord) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: record.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(lease_spec(record)),
        }
    }
}

pub(crate) fn lease_spec(record: &LeaseRecord) -> LeaseSpec {
    LeaseSpec {
        holder_identity: Some(record.holder_identity.clone()),
        lease_duration_seconds: Some(lease_duration_seconds(record.lease_duration)),
        acquire_time: Some(MicroTime(record.acquire_time)),
        renew_time: Some(MicroTime(record.renew_time)),
        lease_transitions: Some(i32::try_from(record.lease_transitions).unwrap_or(i32::MAX)),
        ..Default::default()
    }
}

/// Whole seconds, rounded up so other candidates never see a shorter lease
fn lease_duration_seconds(duration: Duration) -> i32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    i32::try_from(secs).unwrap_or(i32::MAX)
}

/// Read a stored lease; absent spec fields read as zero values
pub(crate) fn lease_record(lease: &Lease) -> LeaseRecord {
    let spec = lease.spec.clone().unwrap_or_default();

    LeaseRecord {
        holder_identity: spec.holder_identity.unwrap_or_default(),
        lease_duration: Duration::from_secs(
            spec.lease_duration_seconds.unwrap_or(0).max(0) as u64,
        ),
        acquire_time: spec.acquire_time.map(|t| t.0).unwrap_or_default(),
        renew_time: spec.renew_time.map(|t| t.0).unwrap_or_default(),
        lease_transitions: spec.lease_transitions.unwrap_or(0).max(0) as u32,
        resource_version: lease.metadata.resource_version.clone(),
    }
}

#[async_trait]
impl LeaseBackend for KubeLeaseBackend {
    async fn get(&self) -> Result<Option<LeaseRecord>, LeaseError> {
        let lease = self
            .api
            .get_opt(&self.name)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(lease.as_ref().map(lease_record))
    }

    async fn create(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let mut lease = self.to_lease(record);
        lease.metadata.resource_version = None;
        let created = self
            .api
            .create(&PostParams::default(), &lease)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(lease_record(&created))
    }

    async fn update(&self, record: &LeaseRecord) -> Result<LeaseRecord, LeaseError> {
        let lease = self.to_lease(record);
        let replaced = self
            .api
            .replace(&self.name, &PostParams::default(), &lease)
            .await
            .map_err(|e| self.map_error(e))?;
        Ok(lease_record(&replaced))
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
