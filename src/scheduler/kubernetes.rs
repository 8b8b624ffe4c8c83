use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::Client;

use super::{CascadePolicy, DeleteOptions, MemberPhase, MemberStatus, Scheduler, WorkloadSpec};
use crate::error::{ProvisionError, Result};

/// Kubernetes-backed scheduler: workloads are Deployments, members are the
/// Pods selected by `<label_key>=<label>`.
#[derive(Clone)]
pub struct KubeScheduler {
    client: Client,
    namespace: String,
    label_key: String,
}

impl KubeScheduler {
    pub fn new(client: Client, namespace: impl Into<String>, label_key: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            label_key: label_key.into(),
        }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(
        namespace: impl Into<String>,
        label_key: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            ProvisionError::SchedulerUnavailable(format!("Failed to create k8s client: {}", e))
        })?;
        Ok(Self::new(client, namespace, label_key))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn label_selector(&self, label: &str) -> String {
        format!("{}={}", self.label_key, label)
    }
}

#[async_trait]
impl Scheduler for KubeScheduler {
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<()> {
        let deployment = parse_deployment(&spec.document)?;
        check_workload(&deployment, &spec.name, &self.label_key)?;

        let created = self
            .deployments()
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| classify(e, &spec.name))?;

        tracing::info!(
            workload = %spec.name,
            namespace = %self.namespace,
            status = ?created.status,
            "Deployment created"
        );
        Ok(())
    }

    async fn member_statuses(&self, label: &str) -> Result<Vec<MemberStatus>> {
        let lp = ListParams::default().labels(&self.label_selector(label));
        let pods = self
            .pods()
            .list(&lp)
            .await
            .map_err(|e| classify(e, label))?;

        Ok(pods.items.iter().filter_map(member_status).collect())
    }

    async fn delete_workload(&self, name: &str, options: DeleteOptions) -> Result<()> {
        self.deployments()
            .delete(name, &delete_params(options))
            .await
            .map_err(|e| classify(e, name))?;

        tracing::info!(workload = %name, namespace = %self.namespace, "Deployment deleted");
        Ok(())
    }
}

/// Parse a rendered document into a Deployment.
pub fn parse_deployment(document: &str) -> Result<Deployment> {
    serde_yaml::from_str(document).map_err(|e| ProvisionError::InvalidWorkloadSpec(e.to_string()))
}

/// A rendered Deployment must be named after its label and stamp
/// `<label_key>=<label>` on its pods, otherwise teardown and the member
/// query would address a different object.
fn check_workload(deployment: &Deployment, label: &str, label_key: &str) -> Result<()> {
    let name = deployment.metadata.name.as_deref();
    if name != Some(label) {
        return Err(ProvisionError::InvalidWorkloadSpec(format!(
            "deployment name {:?} does not match workload {}",
            name.unwrap_or(""),
            label
        )));
    }
    let pod_label = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.metadata.as_ref())
        .and_then(|m| m.labels.as_ref())
        .and_then(|labels| labels.get(label_key));
    if pod_label.map(String::as_str) != Some(label) {
        return Err(ProvisionError::InvalidWorkloadSpec(format!(
            "pod template of {} lacks label {}={}",
            label, label_key, label
        )));
    }
    Ok(())
}

/// Convert a Pod into a member status. Pods already marked for deletion are
/// skipped: they belong to a workload on its way out.
fn member_status(pod: &Pod) -> Option<MemberStatus> {
    if pod.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let name = pod.metadata.name.clone().unwrap_or_default();
    let status = pod.status.as_ref();
    let phase = status
        .and_then(|s| s.phase.as_deref())
        .map(MemberPhase::parse)
        .unwrap_or(MemberPhase::Unknown);
    let address = status
        .and_then(|s| s.pod_ip.clone())
        .filter(|ip| !ip.is_empty());
    Some(MemberStatus::new(name, phase, address))
}

fn delete_params(options: DeleteOptions) -> DeleteParams {
    let propagation = match options.cascade {
        CascadePolicy::Foreground => PropagationPolicy::Foreground,
        CascadePolicy::Background => PropagationPolicy::Background,
        CascadePolicy::Orphan => PropagationPolicy::Orphan,
    };
    DeleteParams {
        grace_period_seconds: Some(
            u32::try_from(options.grace_period.as_secs()).unwrap_or(u32::MAX),
        ),
        propagation_policy: Some(propagation),
        ..Default::default()
    }
}

fn classify(err: kube::Error, workload: &str) -> ProvisionError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => {
            ProvisionError::NotFound(workload.to_string())
        }
        kube::Error::Api(resp) if resp.code == 409 => ProvisionError::Validation(format!(
            "workload {} already exists: {}",
            workload, resp.message
        )),
        kube::Error::Api(resp) if resp.code == 400 || resp.code == 422 => {
            ProvisionError::InvalidWorkloadSpec(resp.message)
        }
        other => ProvisionError::SchedulerUnavailable(format!("{}: {}", workload, other)),
    }
}
