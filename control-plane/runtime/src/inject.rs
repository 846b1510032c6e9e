use crate::{
    admission::Admission,
    args::RuntimeArgs,
    cluster::KubeCluster,
    connect_inject::{
        config::{ConsulConnection, ConsulTls, Images, NamespaceMapping},
        metrics::MetricsDefaults,
        resources::{Quantity, ResourceSettings},
        Config, MeshWebhook,
    },
    metrics::AdmissionMetrics,
};
use anyhow::{anyhow, bail, ensure, Context, Result};
use clap::ArgAction;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug, clap::Args)]
pub(crate) struct InjectConnect {
    #[clap(flatten)]
    runtime: RuntimeArgs,

    #[clap(flatten)]
    flags: InjectFlags,
}

/// Settings for the pods the webhook injects.
#[derive(Debug, clap::Args)]
pub(crate) struct InjectFlags {
    /// The control plane image used for the connect-init container.
    #[clap(long, env = "CONSUL_K8S_IMAGE")]
    consul_k8s_image: String,

    #[clap(long, env = "CONSUL_DATAPLANE_IMAGE")]
    consul_dataplane_image: String,

    /// Inject pods that do not carry the inject annotation.
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    default_inject: bool,

    /// Kubernetes namespaces to inject; `*` allows all.
    #[clap(long = "allow-k8s-namespace", default_value = "*")]
    allow_k8s_namespaces: Vec<String>,

    /// Kubernetes namespaces never to inject. Takes precedence over allowed
    /// namespaces.
    #[clap(long = "deny-k8s-namespace")]
    deny_k8s_namespaces: Vec<String>,

    #[clap(long)]
    enable_namespaces: bool,

    #[clap(long, default_value = "default")]
    consul_destination_namespace: String,

    #[clap(long)]
    enable_k8s_namespace_mirroring: bool,

    #[clap(long, default_value = "")]
    k8s_namespace_mirroring_prefix: String,

    #[clap(long)]
    enable_partitions: bool,

    #[clap(long)]
    partition: Option<String>,

    /// The Kubernetes auth method injected services log in with.
    #[clap(long)]
    acl_auth_method: Option<String>,

    #[clap(long, env = "CONSUL_ADDRESSES")]
    consul_addresses: String,

    #[clap(long, default_value = "8502", env = "CONSUL_GRPC_PORT")]
    consul_grpc_port: u16,

    #[clap(long, default_value = "8500", env = "CONSUL_HTTP_PORT")]
    consul_http_port: u16,

    #[clap(long, default_value = "5000")]
    consul_api_timeout_ms: u64,

    #[clap(long, env = "CONSUL_USE_TLS")]
    consul_use_tls: bool,

    /// A PEM file with the CA that signs the Consul servers' certificates.
    #[clap(long, env = "CONSUL_CACERT_FILE")]
    consul_ca_cert_file: Option<PathBuf>,

    #[clap(long, env = "CONSUL_TLS_SERVER_NAME")]
    consul_tls_server_name: Option<String>,

    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    default_enable_transparent_proxy: bool,

    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    transparent_proxy_default_overwrite_probes: bool,

    /// Traffic redirection is configured by the CNI plugin rather than the
    /// init container.
    #[clap(long)]
    enable_cni: bool,

    #[clap(long)]
    enable_consul_dns: bool,

    #[clap(long)]
    default_enable_metrics: bool,

    #[clap(long)]
    default_enable_metrics_merging: bool,

    #[clap(long, default_value = "20100")]
    default_merged_metrics_port: String,

    #[clap(long, default_value = "20200")]
    default_prometheus_scrape_port: String,

    #[clap(long, default_value = "/metrics")]
    default_prometheus_scrape_path: String,

    #[clap(long)]
    default_sidecar_proxy_cpu_request: Option<String>,

    #[clap(long)]
    default_sidecar_proxy_cpu_limit: Option<String>,

    #[clap(long)]
    default_sidecar_proxy_memory_request: Option<String>,

    #[clap(long)]
    default_sidecar_proxy_memory_limit: Option<String>,

    #[clap(long, default_value = "50m")]
    init_container_cpu_request: String,

    #[clap(long, default_value = "50m")]
    init_container_cpu_limit: String,

    #[clap(long, default_value = "25Mi")]
    init_container_memory_request: String,

    #[clap(long, default_value = "150Mi")]
    init_container_memory_limit: String,

    #[clap(long, default_value = "2", allow_negative_numbers = true)]
    default_envoy_proxy_concurrency: i64,

    #[clap(long)]
    envoy_extra_args: Option<String>,

    /// The log level of injected components.
    #[clap(long, default_value = "info")]
    dataplane_log_level: String,

    #[clap(long)]
    dataplane_log_json: bool,
}

// === impl InjectConnect ===

impl InjectConnect {
    pub(crate) async fn run(self) -> Result<()> {
        let Self { runtime, flags } = self;
        let RuntimeArgs {
            log_level,
            log_format,
            client,
            server,
            admin,
        } = runtime;

        let config = Arc::new(flags.into_config()?);

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(Some(server))
            .build()
            .await?;

        info!(
            transparent_proxy = config.transparent_proxy,
            cni = config.enable_cni,
            namespaces = config.namespaces.enabled,
            partition = config.partition().unwrap_or_default(),
            "Serving sidecar injection webhook",
        );
        let webhook = MeshWebhook::new(config, KubeCluster::new(runtime.client()));
        let admission = Admission::mesh(webhook, metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

// === impl InjectFlags ===

impl InjectFlags {
    /// Validates the flags and builds the webhook configuration.
    pub(crate) fn into_config(self) -> Result<Config> {
        let partition = self.partition.filter(|p| !p.is_empty());
        match (self.enable_partitions, &partition) {
            (true, None) => {
                bail!("--partition must be set if --enable-partitions is set to 'true'")
            }
            (false, Some(_)) => {
                bail!("--enable-partitions must be set to 'true' if --partition is set")
            }
            _ => {}
        }

        ensure!(
            self.default_envoy_proxy_concurrency >= 0,
            "--default-envoy-proxy-concurrency must be >= 0 if set"
        );
        let envoy_concurrency = u32::try_from(self.default_envoy_proxy_concurrency)
            .context("--default-envoy-proxy-concurrency is too large")?;

        let sidecar_resources = ResourceSettings {
            cpu_request: sidecar_quantity(
                "--default-sidecar-proxy-cpu-request",
                self.default_sidecar_proxy_cpu_request.as_deref(),
            )?,
            cpu_limit: sidecar_quantity(
                "--default-sidecar-proxy-cpu-limit",
                self.default_sidecar_proxy_cpu_limit.as_deref(),
            )?,
            memory_request: sidecar_quantity(
                "--default-sidecar-proxy-memory-request",
                self.default_sidecar_proxy_memory_request.as_deref(),
            )?,
            memory_limit: sidecar_quantity(
                "--default-sidecar-proxy-memory-limit",
                self.default_sidecar_proxy_memory_limit.as_deref(),
            )?,
        };
        check_limits("--default-sidecar-proxy", &sidecar_resources)?;

        let init_container_resources = ResourceSettings {
            cpu_request: init_quantity(
                "--init-container-cpu-request",
                &self.init_container_cpu_request,
            )?,
            cpu_limit: init_quantity("--init-container-cpu-limit", &self.init_container_cpu_limit)?,
            memory_request: init_quantity(
                "--init-container-memory-request",
                &self.init_container_memory_request,
            )?,
            memory_limit: init_quantity(
                "--init-container-memory-limit",
                &self.init_container_memory_limit,
            )?,
        };
        check_limits("--init-container", &init_container_resources)?;

        unprivileged_port(
            "--default-merged-metrics-port",
            &self.default_merged_metrics_port,
        )?;
        unprivileged_port(
            "--default-prometheus-scrape-port",
            &self.default_prometheus_scrape_port,
        )?;

        let tls = if self.consul_use_tls {
            let ca_cert = self
                .consul_ca_cert_file
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))
                })
                .transpose()?;
            Some(ConsulTls {
                ca_cert,
                server_name: self.consul_tls_server_name.filter(|n| !n.is_empty()),
            })
        } else {
            None
        };

        Ok(Config {
            require_annotation: !self.default_inject,
            allow_k8s_namespaces: self.allow_k8s_namespaces.into_iter().collect(),
            deny_k8s_namespaces: self.deny_k8s_namespaces.into_iter().collect(),
            namespaces: NamespaceMapping {
                enabled: self.enable_namespaces,
                destination: self.consul_destination_namespace,
                mirroring: self.enable_k8s_namespace_mirroring,
                mirroring_prefix: self.k8s_namespace_mirroring_prefix,
            },
            partition,
            auth_method: self.acl_auth_method.filter(|m| !m.is_empty()),
            images: Images {
                consul_dataplane: self.consul_dataplane_image,
                consul_k8s: self.consul_k8s_image,
            },
            consul: ConsulConnection {
                addresses: self.consul_addresses,
                grpc_port: self.consul_grpc_port,
                http_port: self.consul_http_port,
                api_timeout: Duration::from_millis(self.consul_api_timeout_ms),
                tls,
            },
            transparent_proxy: self.default_enable_transparent_proxy,
            overwrite_probes: self.transparent_proxy_default_overwrite_probes,
            enable_cni: self.enable_cni,
            consul_dns: self.enable_consul_dns,
            metrics: MetricsDefaults {
                enable_metrics: self.default_enable_metrics,
                enable_metrics_merging: self.default_enable_metrics_merging,
                merged_metrics_port: self.default_merged_metrics_port,
                prometheus_scrape_port: self.default_prometheus_scrape_port,
                prometheus_scrape_path: self.default_prometheus_scrape_path,
            },
            init_container_resources,
            sidecar_resources,
            envoy_concurrency,
            envoy_extra_args: self.envoy_extra_args.filter(|a| !a.trim().is_empty()),
            log_level: self.dataplane_log_level,
            log_json: self.dataplane_log_json,
        })
    }
}

fn sidecar_quantity(flag: &str, value: Option<&str>) -> Result<Option<Quantity>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| v.parse().map_err(|error| anyhow!("{flag} is invalid: {error}")))
        .transpose()
}

fn init_quantity(flag: &str, value: &str) -> Result<Option<Quantity>> {
    if value.is_empty() {
        return Ok(None);
    }
    let q = value
        .parse()
        .map_err(|error| anyhow!("{flag} '{value}' is invalid: {error}"))?;
    Ok(Some(q))
}

fn check_limits(prefix: &str, resources: &ResourceSettings) -> Result<()> {
    if let Some((resource, request, limit)) = resources.exceeded_limit() {
        bail!(
            "request must be <= limit: {prefix}-{resource}-request value of {:?} is greater than the {prefix}-{resource}-limit value of {:?}",
            request.as_str(),
            limit.as_str(),
        );
    }
    Ok(())
}

fn unprivileged_port(flag: &str, value: &str) -> Result<()> {
    let port = value
        .parse::<i64>()
        .map_err(|_| anyhow!("{flag} value of {value} is not a valid integer."))?;
    ensure!(
        (1024..=65535).contains(&port),
        "{flag} value of {port} is not in the unprivileged port range 1024-65535"
    );
    Ok(())
}
