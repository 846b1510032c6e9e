use crate::{
    annotations::PodAnnotations,
    config::Config,
    init_container::{field_ref, value},
    mutate::{ServiceAccountToken, ServiceTarget},
    policy::InjectionPolicy,
    redirect_traffic::{DNS_BIND_PORT, PROXY_INBOUND_PORT},
    volumes,
};
use k8s_openapi::{
    api::core::v1::{Container, Pod, Probe, SecurityContext, TCPSocketAction},
    apimachinery::pkg::util::intstr::IntOrString,
};
use thiserror::Error;

pub const SIDECAR_CONTAINER: &str = "consul-dataplane";
pub const SIDECAR_UID: i64 = 5995;

const ENVOY_ADMIN_PORT_START: usize = 19000;
const DEFAULT_BEARER_TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const CONSUL_CA_FILE: &str = "/consul/connect-inject/consul-ca.pem";

/// The sidecar runs as a fixed UID which traffic redirection relies on, so
/// no other container may share it.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum UidConflict {
    #[error("pod's security context cannot have the same UID as consul-dataplane: 5995")]
    Pod,

    #[error(
        "container {name:?} has runAsUser set to the same UID \"5995\" as consul-dataplane which is not allowed"
    )]
    Container { name: String },
}

/// Builds the consul-dataplane sidecar for one service of the pod.
pub(crate) fn build(
    config: &Config,
    policy: &InjectionPolicy,
    annotations: &PodAnnotations,
    pod: &Pod,
    svc: &ServiceTarget<'_>,
    token: Option<&ServiceAccountToken>,
) -> Result<Container, UidConflict> {
    check_uids(pod)?;

    let name = if svc.multi_port {
        format!("{SIDECAR_CONTAINER}-{}", svc.name)
    } else {
        SIDECAR_CONTAINER.to_string()
    };

    let mut volume_mounts = vec![volumes::data_volume_mount()];
    if svc.multi_port {
        if let Some(token) = token {
            volume_mounts.push(token.mount.clone());
        }
    }
    volume_mounts.extend(annotations.sidecar_user_volume_mounts.iter().cloned());

    let resources = config
        .sidecar_resources
        .merge(&annotations.sidecar_resources)
        .requirements();

    Ok(Container {
        name,
        image: Some(config.images.consul_dataplane.clone()),
        // The root filesystem is read-only, so temporary files go to the
        // data volume.
        env: Some(vec![
            value("TMPDIR", volumes::DATA_MOUNT_PATH),
            field_ref("NODE_NAME", "spec.nodeName"),
            value("DP_SERVICE_NODE_NAME", "$(NODE_NAME)-virtual"),
            field_ref("POD_NAME", "metadata.name"),
            field_ref("POD_NAMESPACE", "metadata.namespace"),
        ]),
        args: Some(args(config, policy, annotations, svc, token)),
        volume_mounts: Some(volume_mounts),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(i32::from(PROXY_INBOUND_PORT) + svc.index as i32),
                ..Default::default()
            }),
            initial_delay_seconds: Some(1),
            ..Default::default()
        }),
        resources,
        security_context: Some(SecurityContext {
            run_as_user: Some(SIDECAR_UID),
            run_as_group: Some(SIDECAR_UID),
            run_as_non_root: Some(true),
            read_only_root_filesystem: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn check_uids(pod: &Pod) -> Result<(), UidConflict> {
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(());
    };

    let pod_uid = spec.security_context.as_ref().and_then(|sc| sc.run_as_user);
    if pod_uid == Some(SIDECAR_UID) {
        return Err(UidConflict::Pod);
    }

    for c in &spec.containers {
        let uid = c.security_context.as_ref().and_then(|sc| sc.run_as_user);
        if c.name != SIDECAR_CONTAINER && uid == Some(SIDECAR_UID) {
            return Err(UidConflict::Container {
                name: c.name.clone(),
            });
        }
    }
    Ok(())
}

fn args(
    config: &Config,
    policy: &InjectionPolicy,
    annotations: &PodAnnotations,
    svc: &ServiceTarget<'_>,
    token: Option<&ServiceAccountToken>,
) -> Vec<String> {
    let proxy_id_file = if svc.multi_port {
        format!("{}/proxyid-{}", volumes::DATA_MOUNT_PATH, svc.name)
    } else {
        format!("{}/proxyid", volumes::DATA_MOUNT_PATH)
    };
    let concurrency = annotations
        .envoy_concurrency
        .unwrap_or(config.envoy_concurrency);

    let mut args = vec![
        "-addresses".to_string(),
        config.consul.addresses.clone(),
        format!("-grpc-port={}", config.consul.grpc_port),
        format!("-proxy-service-id-path={proxy_id_file}"),
        format!("-log-level={}", config.log_level),
        format!("-log-json={}", config.log_json),
        format!("-envoy-concurrency={concurrency}"),
    ];

    if let Some(method) = policy.auth_method.as_deref() {
        let token_file = match token {
            Some(token) if svc.multi_port => token.path.as_str(),
            _ => DEFAULT_BEARER_TOKEN_FILE,
        };
        args.push("-credential-type=login".to_string());
        args.push(format!("-login-auth-method={method}"));
        args.push(format!("-login-bearer-token-path={token_file}"));
        // Controller-created pods are only named once admitted.
        args.push("-login-meta=pod=$(POD_NAMESPACE)/$(POD_NAME)".to_string());
        if config.namespaces.enabled {
            let login_ns = if config.namespaces.mirroring {
                "default"
            } else {
                policy.consul_namespace.as_str()
            };
            args.push(format!("-login-namespace={login_ns}"));
        }
        if let Some(partition) = config.partition() {
            args.push(format!("-login-partition={partition}"));
        }
    }

    if config.namespaces.enabled {
        args.push(format!("-service-namespace={}", policy.consul_namespace));
    }
    if let Some(partition) = config.partition() {
        args.push(format!("-service-partition={partition}"));
    }

    match &config.consul.tls {
        Some(tls) => {
            if let Some(name) = tls.server_name.as_deref().filter(|n| !n.is_empty()) {
                args.push(format!("-tls-server-name={name}"));
            }
            if tls.ca_cert.as_deref().is_some_and(|c| !c.is_empty()) {
                args.push(format!("-ca-certs={CONSUL_CA_FILE}"));
            }
        }
        None => args.push("-tls-disabled".to_string()),
    }

    if svc.multi_port {
        args.push(format!(
            "-envoy-admin-bind-port={}",
            ENVOY_ADMIN_PORT_START + svc.index
        ));
    }

    let metrics = &policy.metrics;
    if metrics.run_merged_metrics_server() {
        args.push(format!(
            "-telemetry-prom-scrape-path={}",
            metrics.prometheus_scrape_path
        ));
        args.push(format!(
            "-telemetry-prom-merge-port={}",
            metrics.merged_metrics_port
        ));
        args.push(format!(
            "-telemetry-prom-service-metrics-url={}",
            metrics.service_metrics_url()
        ));
    }

    if policy.consul_dns {
        args.push(format!("-consul-dns-bind-port={DNS_BIND_PORT}"));
    }

    // Envoy's own flags follow `--`; each instance of a multi-port pod needs
    // a distinct base ID.
    let mut envoy_args = Vec::new();
    if svc.multi_port {
        envoy_args.push("--base-id".to_string());
        envoy_args.push(svc.index.to_string());
    }
    let extra = annotations
        .envoy_extra_args
        .as_deref()
        .or(config.envoy_extra_args.as_deref());
    if let Some(extra) = extra {
        envoy_args.extend(extra.split_whitespace().map(str::to_string));
    }
    if !envoy_args.is_empty() {
        args.push("--".to_string());
        args.extend(envoy_args);
    }

    args
}
