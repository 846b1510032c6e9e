use crate::{
    admission::{Admission, TERMINATING_GATEWAY_SERVICES_PATH},
    args::RuntimeArgs,
    cluster::KubeCluster,
    metrics::AdmissionMetrics,
};
use anyhow::{bail, ensure, Result};
use clap::ArgAction;
use prometheus_client::registry::Registry;
use tracing::info;

#[derive(Debug, clap::Args)]
pub(crate) struct Controller {
    #[clap(flatten)]
    runtime: RuntimeArgs,

    /// The Consul datacenter the resources are registered in.
    #[clap(long, env = "CONSUL_DATACENTER", default_value = "")]
    datacenter: String,

    /// Serves the validation webhooks. When disabled the process only
    /// exposes its admin server.
    #[clap(long, default_value_t = true, action = ArgAction::Set)]
    enable_webhooks: bool,
}

// === impl Controller ===

impl Controller {
    pub(crate) async fn run(self) -> Result<()> {
        let Self {
            runtime,
            datacenter,
            enable_webhooks,
        } = self;
        ensure!(!datacenter.is_empty(), "--datacenter must be set");

        let RuntimeArgs {
            log_level,
            log_format,
            client,
            server,
            admin,
        } = runtime;
        let server = if enable_webhooks { Some(server) } else { None };

        let mut prom = <Registry>::default();
        let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("admission"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        info!(
            %datacenter,
            webhooks = enable_webhooks,
            path = TERMINATING_GATEWAY_SERVICES_PATH,
            "Serving custom resource webhooks",
        );
        let admission = Admission::controller(KubeCluster::new(runtime.client()), metrics);
        let runtime = runtime.spawn_server(move || admission.clone());

        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
