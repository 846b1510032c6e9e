#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Sidecar injection for the service mesh.
//!
//! [`MeshWebhook::handle`] decides whether an admitted pod joins the mesh,
//! builds a [`MutationPlan`] of the containers, volumes, environment and
//! metadata it needs, and returns the JSON patch from the admitted pod to the
//! mutated one.

pub mod annotations;
pub mod config;
mod init_container;
pub mod metrics;
mod mutate;
pub mod patch;
pub mod policy;
mod probes;
mod redirect_traffic;
pub mod resources;
mod sidecar;
mod upstreams;
mod volumes;

pub use self::{
    annotations::{AnnotationError, InvalidAnnotations, PodAnnotations},
    config::Config,
    mutate::MutationPlan,
    policy::{InjectionPolicy, MultiPortConflict},
    redirect_traffic::RedirectTrafficConfig,
    sidecar::{UidConflict, SIDECAR_CONTAINER},
};
use consul_k8s_api::annotations as anno;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, ServiceAccount};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error;
use tracing::{debug, info};

/// Read-only cluster lookups the webhook performs while admitting a pod.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    async fn namespace(&self, name: &str) -> anyhow::Result<Namespace>;

    async fn service_account(&self, namespace: &str, name: &str)
        -> anyhow::Result<ServiceAccount>;

    async fn secrets(&self, namespace: &str) -> anyhow::Result<Vec<Secret>>;
}

#[derive(Clone)]
pub struct MeshWebhook<C> {
    config: Arc<Config>,
    cluster: C,
}

#[derive(Debug)]
pub enum Admitted {
    /// The pod is left as is.
    Skipped,
    Injected(json_patch::Patch),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Annotations(#[from] InvalidAnnotations),

    #[error(transparent)]
    MultiPort(#[from] MultiPortConflict),

    #[error(transparent)]
    Uid(#[from] UidConflict),

    #[error("error getting namespace metadata for container: {0}")]
    Namespace(anyhow::Error),

    #[error("unable to get service account {name:?}: {error}")]
    ServiceAccount { name: String, error: anyhow::Error },

    #[error("unable to list secrets: {0}")]
    Secrets(anyhow::Error),

    #[error("unable to find a secret for service account {service_account:?}")]
    MissingSecret { service_account: String },

    #[error("unable to find service account token volumeMount")]
    MissingTokenMount,

    #[error("failed to encode pod: {0}")]
    Json(#[from] serde_json::Error),
}

// === impl Error ===

impl Error {
    /// The admission status reported for this error: malformed pods and
    /// unsupported combinations are the requester's fault.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Annotations(_) | Self::MultiPort(_) | Self::Uid(_) => 400,
            _ => 500,
        }
    }
}

// === impl MeshWebhook ===

impl<C: Cluster> MeshWebhook<C> {
    pub fn new(config: Arc<Config>, cluster: C) -> Self {
        Self { config, cluster }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Admits a pod created in `namespace`.
    pub async fn handle(&self, namespace: &str, pod: Pod) -> Result<Admitted, Error> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .or(pod.metadata.generate_name.as_deref())
            .unwrap_or_default()
            .to_string();

        if !policy::should_inject(&self.config, &pod, namespace)? {
            debug!(%namespace, %name, "Skipping pod");
            return Ok(Admitted::Skipped);
        }

        let raw = pod.metadata.annotations.clone().unwrap_or_default();
        let annotations = PodAnnotations::parse(&raw)?;

        let ns = self
            .cluster
            .namespace(namespace)
            .await
            .map_err(Error::Namespace)?;
        let policy = InjectionPolicy::resolve(&self.config, &ns, &pod, &annotations)?;
        policy.check_multi_port()?;

        let service_account_secrets = self
            .service_account_secrets(namespace, &pod, &policy)
            .await?;

        let plan = MutationPlan::build(&mutate::Target {
            config: &self.config,
            policy: &policy,
            annotations: &annotations,
            pod: &pod,
            service_account_secrets: &service_account_secrets,
        })?;
        let mutated = plan.apply(&pod);
        let patch = patch::diff(&pod, &mutated)?;

        info!(
            %namespace,
            %name,
            services = ?policy.service_names,
            transparent_proxy = policy.transparent_proxy,
            ops = patch.0.len(),
            "Injected",
        );
        Ok(Admitted::Injected(patch))
    }

    /// Finds the token secret of each multi-port service that logs in with
    /// a service account other than the pod's own.
    async fn service_account_secrets(
        &self,
        namespace: &str,
        pod: &Pod,
        policy: &InjectionPolicy,
    ) -> Result<BTreeMap<String, String>, Error> {
        let mut out = BTreeMap::new();
        if !policy.multi_port || policy.auth_method.is_none() {
            return Ok(out);
        }

        let pod_service_account = pod
            .spec
            .as_ref()
            .and_then(|s| s.service_account_name.as_deref())
            .unwrap_or_default();
        let mut listed: Option<Vec<Secret>> = None;
        for svc in &policy.service_names {
            if svc == pod_service_account {
                continue;
            }

            let sa = self
                .cluster
                .service_account(namespace, svc)
                .await
                .map_err(|error| Error::ServiceAccount {
                    name: svc.clone(),
                    error,
                })?;
            if let Some(secret) = sa
                .secrets
                .as_ref()
                .and_then(|s| s.first())
                .and_then(|r| r.name.clone())
            {
                out.insert(svc.clone(), secret);
                continue;
            }

            // Newer clusters no longer link token secrets from the service
            // account, so look for one annotated with its name.
            if listed.is_none() {
                listed = Some(
                    self.cluster
                        .secrets(namespace)
                        .await
                        .map_err(Error::Secrets)?,
                );
            }
            let secret = listed
                .iter()
                .flatten()
                .find(|s| is_token_for(s, svc))
                .and_then(|s| s.metadata.name.clone())
                .ok_or_else(|| Error::MissingSecret {
                    service_account: svc.clone(),
                })?;
            out.insert(svc.clone(), secret);
        }

        Ok(out)
    }
}

fn is_token_for(secret: &Secret, service_account: &str) -> bool {
    secret.type_.as_deref() == Some(anno::SECRET_TYPE_SERVICE_ACCOUNT_TOKEN)
        && secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(anno::SERVICE_ACCOUNT_NAME_KEY))
            .is_some_and(|n| n == service_account)
}
