//! Annotation and label keys read or written on pods and namespaces.
//!
//! These keys are part of the public contract with users' manifests and must
//! not change.

/// Set on pods once they have been mutated. Present as both an annotation and
/// a label so that it may be used in selectors.
pub const KEY_INJECT_STATUS: &str = "consul.hashicorp.com/connect-inject-status";

/// Set on pods when transparent proxy has been enabled for them.
pub const KEY_TRANSPARENT_PROXY_STATUS: &str = "consul.hashicorp.com/transparent-proxy-status";

/// Label identifying the controller that manages an injected pod's
/// registration.
pub const KEY_MANAGED_BY: &str = "consul.hashicorp.com/connect-inject-managed-by";

/// Enables transparent proxy for a pod (annotation) or every pod in a
/// namespace (label).
pub const KEY_TRANSPARENT_PROXY: &str = "consul.hashicorp.com/transparent-proxy";

/// Enables Consul DNS for a pod (annotation) or every pod in a namespace
/// (label).
pub const KEY_CONSUL_DNS: &str = "consul.hashicorp.com/consul-dns";

pub const INJECTED: &str = "injected";
pub const ENABLED: &str = "enabled";
pub const MANAGED_BY_VALUE: &str = "consul-k8s-endpoints-controller";

pub const ANNOTATION_INJECT: &str = "consul.hashicorp.com/connect-inject";
pub const ANNOTATION_INJECT_MOUNT_VOLUMES: &str =
    "consul.hashicorp.com/connect-inject-mount-volume";
pub const ANNOTATION_CONSUL_SIDECAR_USER_VOLUME: &str =
    "consul.hashicorp.com/consul-sidecar-user-volume";
pub const ANNOTATION_CONSUL_SIDECAR_USER_VOLUME_MOUNT: &str =
    "consul.hashicorp.com/consul-sidecar-user-volume-mount";
pub const ANNOTATION_ORIGINAL_POD: &str = "consul.hashicorp.com/original-pod";
pub const ANNOTATION_SERVICE: &str = "consul.hashicorp.com/connect-service";
pub const ANNOTATION_PORT: &str = "consul.hashicorp.com/connect-service-port";
pub const ANNOTATION_UPSTREAMS: &str = "consul.hashicorp.com/connect-service-upstreams";
pub const ANNOTATION_CONSUL_NAMESPACE: &str = "consul.hashicorp.com/consul-namespace";
pub const ANNOTATION_REDIRECT_TRAFFIC_CONFIG: &str =
    "consul.hashicorp.com/redirect-traffic-config";

pub const ANNOTATION_TRANSPARENT_PROXY_OVERWRITE_PROBES: &str =
    "consul.hashicorp.com/transparent-proxy-overwrite-probes";
pub const ANNOTATION_TPROXY_EXCLUDE_INBOUND_PORTS: &str =
    "consul.hashicorp.com/transparent-proxy-exclude-inbound-ports";
pub const ANNOTATION_TPROXY_EXCLUDE_OUTBOUND_PORTS: &str =
    "consul.hashicorp.com/transparent-proxy-exclude-outbound-ports";
pub const ANNOTATION_TPROXY_EXCLUDE_OUTBOUND_CIDRS: &str =
    "consul.hashicorp.com/transparent-proxy-exclude-outbound-cidrs";
pub const ANNOTATION_TPROXY_EXCLUDE_UIDS: &str =
    "consul.hashicorp.com/transparent-proxy-exclude-uids";

pub const ANNOTATION_ENABLE_METRICS: &str = "consul.hashicorp.com/enable-metrics";
pub const ANNOTATION_ENABLE_METRICS_MERGING: &str = "consul.hashicorp.com/enable-metrics-merging";
pub const ANNOTATION_MERGED_METRICS_PORT: &str = "consul.hashicorp.com/merged-metrics-port";
pub const ANNOTATION_PROMETHEUS_SCRAPE_PORT: &str = "consul.hashicorp.com/prometheus-scrape-port";
pub const ANNOTATION_PROMETHEUS_SCRAPE_PATH: &str = "consul.hashicorp.com/prometheus-scrape-path";
pub const ANNOTATION_SERVICE_METRICS_PORT: &str = "consul.hashicorp.com/service-metrics-port";
pub const ANNOTATION_SERVICE_METRICS_PATH: &str = "consul.hashicorp.com/service-metrics-path";

pub const ANNOTATION_PROMETHEUS_SCRAPE: &str = "prometheus.io/scrape";
pub const ANNOTATION_PROMETHEUS_PORT: &str = "prometheus.io/port";
pub const ANNOTATION_PROMETHEUS_PATH: &str = "prometheus.io/path";

pub const ANNOTATION_SIDECAR_PROXY_CPU_LIMIT: &str = "consul.hashicorp.com/sidecar-proxy-cpu-limit";
pub const ANNOTATION_SIDECAR_PROXY_CPU_REQUEST: &str =
    "consul.hashicorp.com/sidecar-proxy-cpu-request";
pub const ANNOTATION_SIDECAR_PROXY_MEMORY_LIMIT: &str =
    "consul.hashicorp.com/sidecar-proxy-memory-limit";
pub const ANNOTATION_SIDECAR_PROXY_MEMORY_REQUEST: &str =
    "consul.hashicorp.com/sidecar-proxy-memory-request";

pub const ANNOTATION_ENVOY_EXTRA_ARGS: &str = "consul.hashicorp.com/envoy-extra-args";
pub const ANNOTATION_ENVOY_PROXY_CONCURRENCY: &str =
    "consul.hashicorp.com/consul-envoy-proxy-concurrency";

/// Name under which the service account token secret records its owner.
pub const SERVICE_ACCOUNT_NAME_KEY: &str = "kubernetes.io/service-account.name";

/// Secret type of legacy service account tokens.
pub const SECRET_TYPE_SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";
