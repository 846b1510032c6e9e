use crate::{metrics::MetricsDefaults, resources::ResourceSettings};
use std::{collections::BTreeSet, time::Duration};

/// Process-wide settings for the mesh webhook, built once from flags.
#[derive(Clone, Debug)]
pub struct Config {
    /// When set, pods are only injected if they carry the inject annotation.
    pub require_annotation: bool,
    pub allow_k8s_namespaces: BTreeSet<String>,
    pub deny_k8s_namespaces: BTreeSet<String>,

    pub namespaces: NamespaceMapping,
    /// The admin partition, when partitions are enabled.
    pub partition: Option<String>,
    /// The Kubernetes auth method injected proxies log in with.
    pub auth_method: Option<String>,

    pub images: Images,
    pub consul: ConsulConnection,

    pub transparent_proxy: bool,
    pub overwrite_probes: bool,
    pub enable_cni: bool,
    pub consul_dns: bool,

    pub metrics: MetricsDefaults,

    pub init_container_resources: ResourceSettings,
    pub sidecar_resources: ResourceSettings,
    pub envoy_concurrency: u32,
    pub envoy_extra_args: Option<String>,

    /// Log settings handed to injected components.
    pub log_level: String,
    pub log_json: bool,
}

/// Maps Kubernetes namespaces onto Consul namespaces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamespaceMapping {
    pub enabled: bool,
    pub destination: String,
    pub mirroring: bool,
    pub mirroring_prefix: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Images {
    pub consul_dataplane: String,
    pub consul_k8s: String,
}

/// How injected components reach the Consul servers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsulConnection {
    pub addresses: String,
    pub grpc_port: u16,
    pub http_port: u16,
    pub api_timeout: Duration,
    pub tls: Option<ConsulTls>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsulTls {
    /// PEM-encoded CA certificate.
    pub ca_cert: Option<String>,
    pub server_name: Option<String>,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            require_annotation: false,
            allow_k8s_namespaces: BTreeSet::new(),
            deny_k8s_namespaces: BTreeSet::new(),
            namespaces: NamespaceMapping::default(),
            partition: None,
            auth_method: None,
            images: Images::default(),
            consul: ConsulConnection::default(),
            transparent_proxy: false,
            overwrite_probes: false,
            enable_cni: false,
            consul_dns: false,
            metrics: MetricsDefaults::default(),
            init_container_resources: ResourceSettings::default(),
            sidecar_resources: ResourceSettings::default(),
            envoy_concurrency: 2,
            envoy_extra_args: None,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Config {
    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref().filter(|p| !p.is_empty())
    }

    pub fn auth_method(&self) -> Option<&str> {
        self.auth_method.as_deref().filter(|m| !m.is_empty())
    }

    pub fn consul_namespace(&self, k8s_ns: &str) -> String {
        self.namespaces.consul_namespace(k8s_ns)
    }
}

// === impl NamespaceMapping ===

impl NamespaceMapping {
    /// Returns the Consul namespace for services in `k8s_ns`, or an empty
    /// string when namespaces are disabled.
    pub fn consul_namespace(&self, k8s_ns: &str) -> String {
        if !self.enabled {
            return String::new();
        }
        if self.mirroring {
            return format!("{}{}", self.mirroring_prefix, k8s_ns);
        }
        self.destination.clone()
    }
}

// === impl ConsulConnection ===

impl Default for ConsulConnection {
    fn default() -> Self {
        Self {
            addresses: String::new(),
            grpc_port: 8502,
            http_port: 8500,
            api_timeout: Duration::from_secs(5),
            tls: None,
        }
    }
}

impl ConsulConnection {
    /// Renders the API timeout the way the connect-init command parses it.
    pub fn api_timeout_string(&self) -> String {
        if self.api_timeout.subsec_nanos() == 0 {
            format!("{}s", self.api_timeout.as_secs())
        } else {
            format!("{}ms", self.api_timeout.as_millis())
        }
    }
}
