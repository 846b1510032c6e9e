use crate::{
    config::Config,
    mutate::{ServiceAccountToken, ServiceTarget},
    policy::InjectionPolicy,
    volumes,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, ObjectFieldSelector, Pod, SecurityContext,
};

pub const INIT_CONTAINER_NAME: &str = "consul-connect-inject-init";
pub const INIT_CONTAINER_UID: i64 = 5996;
pub const CONSUL_NODE_NAME: &str = "k8s-service-mesh";

const ROOT_UID: i64 = 0;
const NET_ADMIN: &str = "NET_ADMIN";

/// Builds the init container that waits for the service's registration,
/// writes the proxy ID to the data volume and, without CNI, programs the
/// traffic redirection rules.
pub(crate) fn build(
    config: &Config,
    policy: &InjectionPolicy,
    pod: &Pod,
    svc: &ServiceTarget<'_>,
    token: Option<&ServiceAccountToken>,
    redirect_traffic: Option<&str>,
) -> Container {
    let name = if svc.multi_port {
        format!("{INIT_CONTAINER_NAME}-{}", svc.name)
    } else {
        INIT_CONTAINER_NAME.to_string()
    };

    let mut volume_mounts = vec![volumes::data_volume_mount()];
    if let Some(token) = token {
        volume_mounts.push(token.mount.clone());
    }

    let mut env = vec![
        field_ref("POD_NAME", "metadata.name"),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        value("CONSUL_ADDRESSES", &config.consul.addresses),
        value("CONSUL_GRPC_PORT", &config.consul.grpc_port.to_string()),
        value("CONSUL_HTTP_PORT", &config.consul.http_port.to_string()),
        value("CONSUL_API_TIMEOUT", &config.consul.api_timeout_string()),
    ];

    if let Some(tls) = &config.consul.tls {
        env.push(value("CONSUL_USE_TLS", "true"));
        env.push(value(
            "CONSUL_CACERT_PEM",
            tls.ca_cert.as_deref().unwrap_or_default(),
        ));
        env.push(value(
            "CONSUL_TLS_SERVER_NAME",
            tls.server_name.as_deref().unwrap_or_default(),
        ));
    }

    if let (Some(method), Some(token)) = (policy.auth_method.as_deref(), token) {
        env.push(value("CONSUL_LOGIN_AUTH_METHOD", method));
        env.push(value("CONSUL_LOGIN_BEARER_TOKEN_FILE", &token.path));
        env.push(value("CONSUL_LOGIN_META", "pod=$(POD_NAMESPACE)/$(POD_NAME)"));
        if config.namespaces.enabled {
            // With mirroring, the auth method lives in the default namespace.
            let login_ns = if config.namespaces.mirroring {
                "default"
            } else {
                policy.consul_namespace.as_str()
            };
            env.push(value("CONSUL_LOGIN_NAMESPACE", login_ns));
        }
        if let Some(partition) = config.partition() {
            env.push(value("CONSUL_LOGIN_PARTITION", partition));
        }
    }

    if config.namespaces.enabled {
        env.push(value("CONSUL_NAMESPACE", &policy.consul_namespace));
    }
    if let Some(partition) = config.partition() {
        env.push(value("CONSUL_PARTITION", partition));
    }

    let mut security_context = None;
    if policy.transparent_proxy {
        if config.enable_cni {
            security_context = Some(SecurityContext {
                run_as_user: Some(INIT_CONTAINER_UID),
                run_as_group: Some(INIT_CONTAINER_UID),
                run_as_non_root: Some(true),
                privileged: Some(false),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            });
        } else {
            if let Some(cfg) = redirect_traffic {
                env.push(value("CONSUL_REDIRECT_TRAFFIC_CONFIG", cfg));
            }
            // iptables needs root and NET_ADMIN, even if the pod disallows root.
            security_context = Some(SecurityContext {
                run_as_user: Some(ROOT_UID),
                run_as_group: Some(ROOT_UID),
                run_as_non_root: Some(false),
                privileged: Some(true),
                capabilities: Some(Capabilities {
                    add: Some(vec![NET_ADMIN.to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
    }

    Container {
        name,
        image: Some(config.images.consul_k8s.clone()),
        command: Some(command(config, policy, pod, svc)),
        env: Some(env),
        resources: config.init_container_resources.requirements(),
        volume_mounts: Some(volume_mounts),
        security_context,
        ..Default::default()
    }
}

fn command(
    config: &Config,
    policy: &InjectionPolicy,
    pod: &Pod,
    svc: &ServiceTarget<'_>,
) -> Vec<String> {
    let mut cmd = vec![
        "consul-k8s-control-plane".to_string(),
        "connect-init".to_string(),
        "-pod-name=$(POD_NAME)".to_string(),
        "-pod-namespace=$(POD_NAMESPACE)".to_string(),
        format!("-consul-node-name={CONSUL_NODE_NAME}"),
        format!("-log-level={}", config.log_level),
        format!("-log-json={}", config.log_json),
    ];

    if policy.auth_method.is_some() {
        // Multi-port services must each run as the service account of the
        // same name.
        let service_account = if svc.multi_port {
            svc.name
        } else {
            pod.spec
                .as_ref()
                .and_then(|s| s.service_account_name.as_deref())
                .unwrap_or_default()
        };
        cmd.push(format!("-service-account-name={service_account}"));
        cmd.push(format!("-service-name={}", svc.name));
    }

    if svc.multi_port {
        cmd.push("-multiport=true".to_string());
        cmd.push(format!(
            "-proxy-id-file={}/proxyid-{}",
            volumes::DATA_MOUNT_PATH,
            svc.name
        ));
        if policy.auth_method.is_none() {
            cmd.push(format!("-service-name={}", svc.name));
        }
    }

    cmd
}

pub(crate) fn value(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub(crate) fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
