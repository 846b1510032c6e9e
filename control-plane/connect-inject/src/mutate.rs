//! Builds the set of edits that attach a pod to the mesh and applies them to
//! a copy of the pod.

use crate::{
    annotations::PodAnnotations,
    config::Config,
    init_container,
    policy::InjectionPolicy,
    probes::{self, ProbeRewrite},
    redirect_traffic::RedirectTrafficConfig,
    sidecar, upstreams, volumes, Error,
};
use consul_k8s_api::annotations as anno;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, Volume, VolumeMount};
use std::collections::BTreeMap;

/// The service a generated init container and sidecar pair belongs to.
#[derive(Copy, Clone, Debug)]
pub(crate) struct ServiceTarget<'a> {
    pub(crate) name: &'a str,
    pub(crate) index: usize,
    pub(crate) multi_port: bool,
}

/// Where a service account token is mounted for the login flow.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ServiceAccountToken {
    pub(crate) mount: VolumeMount,
    pub(crate) path: String,
}

/// Structural edits to a pod, applied once to a copy of it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MutationPlan {
    pub volumes: Vec<Volume>,
    /// Extra mounts for application containers, by container index.
    pub volume_mounts: BTreeMap<usize, Vec<VolumeMount>>,
    /// Appended to every application container.
    pub container_env: Vec<EnvVar>,
    /// Appended to the pod's own init containers.
    pub init_container_env: Vec<EnvVar>,
    pub init_containers: Vec<Container>,
    pub sidecars: Vec<Container>,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub probe_rewrites: Vec<ProbeRewrite>,
}

/// Inputs gathered by the webhook before the plan is built.
pub(crate) struct Target<'a> {
    pub(crate) config: &'a Config,
    pub(crate) policy: &'a InjectionPolicy,
    pub(crate) annotations: &'a PodAnnotations,
    pub(crate) pod: &'a Pod,
    /// Token secret names for multi-port services that log in with their own
    /// service account.
    pub(crate) service_account_secrets: &'a BTreeMap<String, String>,
}

// === impl MutationPlan ===

impl MutationPlan {
    pub(crate) fn build(target: &Target<'_>) -> Result<Self, Error> {
        let Target {
            config,
            policy,
            annotations,
            pod,
            service_account_secrets,
        } = *target;
        let containers = pod
            .spec
            .as_ref()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default();

        let mut plan = MutationPlan {
            volumes: vec![volumes::data_volume()],
            ..Default::default()
        };

        for (idx, c) in containers.iter().enumerate() {
            if annotations.mount_volumes.iter().any(|name| *name == c.name) {
                plan.volume_mounts
                    .entry(idx)
                    .or_default()
                    .push(volumes::data_volume_mount());
            }
        }

        plan.volumes
            .extend(annotations.sidecar_user_volumes.iter().cloned());

        let upstream_env = upstreams::env_vars(&annotations.upstreams);
        plan.container_env.clone_from(&upstream_env);
        plan.init_container_env = upstream_env;

        let redirect_traffic = if policy.transparent_proxy {
            Some(RedirectTrafficConfig::new(policy, annotations, containers).to_json()?)
        } else {
            None
        };

        let pod_service_account = pod
            .spec
            .as_ref()
            .and_then(|s| s.service_account_name.as_deref())
            .unwrap_or_default();
        for (index, name) in policy.service_names.iter().enumerate() {
            let svc = ServiceTarget {
                name,
                index,
                multi_port: policy.multi_port,
            };

            if svc.multi_port && policy.auth_method.is_some() && svc.name != pod_service_account {
                let secret = service_account_secrets.get(svc.name).ok_or_else(|| {
                    Error::MissingSecret {
                        service_account: svc.name.to_string(),
                    }
                })?;
                plan.volumes
                    .push(volumes::service_account_volume(svc.name, secret));
            }

            let token = match policy.auth_method {
                Some(_) => {
                    let multi_port_service = svc.multi_port.then_some(svc.name);
                    let (mount, path) =
                        volumes::find_service_account_mount(pod, &plan.volumes, multi_port_service)
                            .ok_or(Error::MissingTokenMount)?;
                    Some(ServiceAccountToken { mount, path })
                }
                None => None,
            };

            // Without CNI the init container programs the redirection itself.
            let init_redirect = redirect_traffic.as_deref().filter(|_| !config.enable_cni);
            plan.init_containers.push(init_container::build(
                config,
                policy,
                pod,
                &svc,
                token.as_ref(),
                init_redirect,
            ));
            plan.sidecars.push(sidecar::build(
                config,
                policy,
                annotations,
                pod,
                &svc,
                token.as_ref(),
            )?);
        }

        plan.annotations = default_annotations(pod, annotations)?;
        plan.annotations
            .insert(anno::KEY_INJECT_STATUS.to_string(), anno::INJECTED.to_string());
        if policy.transparent_proxy {
            plan.annotations.insert(
                anno::KEY_TRANSPARENT_PROXY_STATUS.to_string(),
                anno::ENABLED.to_string(),
            );
        }
        plan.annotations
            .extend(policy.metrics.prometheus_annotations());
        if config.namespaces.enabled {
            plan.annotations.insert(
                anno::ANNOTATION_CONSUL_NAMESPACE.to_string(),
                policy.consul_namespace.clone(),
            );
        }
        if let Some(cfg) = redirect_traffic.filter(|_| config.enable_cni) {
            plan.annotations
                .insert(anno::ANNOTATION_REDIRECT_TRAFFIC_CONFIG.to_string(), cfg);
        }

        plan.labels = BTreeMap::from([
            (anno::KEY_INJECT_STATUS.to_string(), anno::INJECTED.to_string()),
            (anno::KEY_MANAGED_BY.to_string(), anno::MANAGED_BY_VALUE.to_string()),
        ]);

        if policy.overwrite_probes {
            plan.probe_rewrites = probes::rewrites(containers, sidecar::SIDECAR_CONTAINER);
        }

        Ok(plan)
    }

    /// Returns a copy of `pod` with every edit applied. Lists are only
    /// created when there is something to put in them.
    pub fn apply(self, pod: &Pod) -> Pod {
        let mut pod = pod.clone();

        if !self.annotations.is_empty() {
            pod.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .extend(self.annotations);
        }
        if !self.labels.is_empty() {
            pod.metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .extend(self.labels);
        }

        let spec = pod.spec.get_or_insert_with(Default::default);

        if !self.volumes.is_empty() {
            spec.volumes
                .get_or_insert_with(Vec::new)
                .extend(self.volumes);
        }

        for (idx, mounts) in self.volume_mounts {
            if let Some(c) = spec.containers.get_mut(idx) {
                c.volume_mounts
                    .get_or_insert_with(Vec::new)
                    .extend(mounts);
            }
        }

        if !self.container_env.is_empty() {
            for c in &mut spec.containers {
                c.env
                    .get_or_insert_with(Vec::new)
                    .extend(self.container_env.iter().cloned());
            }
        }
        if !self.init_container_env.is_empty() {
            for c in spec.init_containers.iter_mut().flatten() {
                c.env
                    .get_or_insert_with(Vec::new)
                    .extend(self.init_container_env.iter().cloned());
            }
        }

        probes::apply(&mut spec.containers, &self.probe_rewrites);

        if !self.init_containers.is_empty() {
            spec.init_containers
                .get_or_insert_with(Vec::new)
                .extend(self.init_containers);
        }
        spec.containers.extend(self.sidecars);

        pod
    }
}

/// Records the pod as it was admitted and, unless the pod names one, the
/// port of its first container.
fn default_annotations(
    pod: &Pod,
    annotations: &PodAnnotations,
) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    out.insert(
        anno::ANNOTATION_ORIGINAL_POD.to_string(),
        serde_json::to_string(pod)?,
    );

    if annotations.port.is_none() {
        let port = pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.ports.as_ref()?.first());
        if let Some(port) = port {
            let value = match port.name.as_deref().filter(|n| !n.is_empty()) {
                Some(name) => name.to_string(),
                None => port.container_port.to_string(),
            };
            out.insert(anno::ANNOTATION_PORT.to_string(), value);
        }
    }

    Ok(out)
}
