use crate::{
    acl::{Component, Gateway, RulesConfig},
    controller::Controller,
    inject::InjectConnect,
    k8s::TerminatingGatewayService,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use kube::CustomResourceExt;
use std::io::Write;

#[derive(Debug, Parser)]
#[clap(
    name = "consul-k8s-control-plane",
    about = "Admission webhooks and tooling that join Kubernetes workloads to a Consul service mesh"
)]
pub struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serves the pod sidecar injection webhook.
    InjectConnect(InjectConnect),

    /// Serves the custom resource validation webhooks.
    Controller(Controller),

    /// Prints the ACL policy for a control plane component.
    AclRules(AclRules),

    /// Prints the custom resource definitions.
    Crds,
}

/// Flags shared by the subcommands that run a kubert runtime.
#[derive(Debug, clap::Args)]
pub(crate) struct RuntimeArgs {
    #[clap(
        long,
        default_value = "consul_k8s=info,warn",
        env = "CONSUL_K8S_CONTROL_PLANE_LOG"
    )]
    pub(crate) log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    pub(crate) log_format: kubert::LogFormat,

    #[clap(flatten)]
    pub(crate) client: kubert::ClientArgs,

    #[clap(flatten)]
    pub(crate) server: kubert::ServerArgs,

    #[clap(flatten)]
    pub(crate) admin: kubert::AdminArgs,
}

#[derive(Debug, clap::Args)]
struct AclRules {
    #[clap(long, value_enum)]
    component: Component,

    /// The admin partition; enables partition-scoped rules.
    #[clap(long)]
    partition: Option<String>,

    #[clap(long)]
    enable_namespaces: bool,

    #[clap(long)]
    enable_peering: bool,

    #[clap(long, default_value = "default")]
    consul_destination_namespace: String,

    #[clap(long)]
    enable_k8s_namespace_mirroring: bool,

    #[clap(long, default_value = "")]
    k8s_namespace_mirroring_prefix: String,

    /// The Consul node catalog sync registers services under.
    #[clap(long, default_value = "k8s-sync")]
    sync_consul_node_name: String,

    #[clap(long, default_value = "default")]
    consul_sync_destination_namespace: String,

    #[clap(long)]
    enable_sync_k8s_namespace_mirroring: bool,

    #[clap(long, default_value = "")]
    sync_k8s_namespace_mirroring_prefix: String,

    /// The gateway's Consul service name.
    #[clap(long, default_value = "")]
    gateway_name: String,

    #[clap(long, default_value = "default")]
    gateway_namespace: String,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::InjectConnect(cmd) => cmd.run().await,
            Command::Controller(cmd) => cmd.run().await,
            Command::AclRules(cmd) => cmd.run(),
            Command::Crds => print_crds(),
        }
    }
}

// === impl AclRules ===

impl AclRules {
    fn run(self) -> Result<()> {
        let (config, component, gateway) = self.into_parts();
        let rules = config.render(component, &gateway);
        writeln!(std::io::stdout().lock(), "{rules}")?;
        Ok(())
    }

    fn into_parts(self) -> (RulesConfig, Component, Gateway) {
        let Self {
            component,
            partition,
            enable_namespaces,
            enable_peering,
            consul_destination_namespace,
            enable_k8s_namespace_mirroring,
            k8s_namespace_mirroring_prefix,
            sync_consul_node_name,
            consul_sync_destination_namespace,
            enable_sync_k8s_namespace_mirroring,
            sync_k8s_namespace_mirroring_prefix,
            gateway_name,
            gateway_namespace,
        } = self;
        let config = RulesConfig {
            partition,
            enable_namespaces,
            enable_peering,
            inject_destination_namespace: consul_destination_namespace,
            inject_mirroring: enable_k8s_namespace_mirroring,
            inject_mirroring_prefix: k8s_namespace_mirroring_prefix,
            sync_node_name: sync_consul_node_name,
            sync_destination_namespace: consul_sync_destination_namespace,
            sync_mirroring: enable_sync_k8s_namespace_mirroring,
            sync_mirroring_prefix: sync_k8s_namespace_mirroring_prefix,
        };
        let gateway = Gateway {
            name: gateway_name,
            namespace: gateway_namespace,
        };
        (config, component, gateway)
    }
}

fn print_crds() -> Result<()> {
    let yaml = serde_yaml::to_string(&TerminatingGatewayService::crd())?;
    write!(std::io::stdout().lock(), "---\n{yaml}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        let args = std::iter::once("consul-k8s-control-plane").chain(args.iter().copied());
        Args::try_parse_from(args).unwrap().command
    }

    #[test]
    fn acl_rules_flags() {
        let cmd = match parse(&[
            "acl-rules",
            "--component",
            "terminating-gateway",
            "--partition",
            "part-1",
            "--enable-namespaces",
            "--gateway-name",
            "gateway",
            "--gateway-namespace",
            "non-default",
        ]) {
            Command::AclRules(cmd) => cmd,
            cmd => panic!("unexpected command: {cmd:?}"),
        };
        let (config, component, gateway) = cmd.into_parts();
        assert_eq!(component, Component::TerminatingGateway);
        assert_eq!(config.partition.as_deref(), Some("part-1"));
        assert!(config.enable_namespaces);
        assert_eq!(config.inject_destination_namespace, "default");
        let rules = config.render(component, &gateway);
        assert!(
            rules.starts_with(
                "\npartition \"part-1\" {\n  namespace \"non-default\" {\n    service \"gateway\""
            ),
            "{rules}"
        );
    }

    #[test]
    fn acl_rules_sync_flags() {
        let cmd = match parse(&[
            "acl-rules",
            "--component",
            "sync",
            "--enable-namespaces",
            "--enable-sync-k8s-namespace-mirroring",
            "--sync-k8s-namespace-mirroring-prefix",
            "prefix-",
        ]) {
            Command::AclRules(cmd) => cmd,
            cmd => panic!("unexpected command: {cmd:?}"),
        };
        let (config, component, gateway) = cmd.into_parts();
        assert_eq!(component, Component::Sync);
        assert_eq!(config.sync_node_name, "k8s-sync");
        assert_eq!(config.sync_destination_namespace, "default");
        let rules = config.render(component, &gateway);
        assert!(rules.contains("  namespace_prefix \"prefix-\" {\n"), "{rules}");

        for component in ["replication-token", "api-gateway-controller"] {
            assert!(matches!(
                parse(&["acl-rules", "--component", component]),
                Command::AclRules(_)
            ));
        }
    }

    #[test]
    fn crds_subcommand() {
        assert!(matches!(parse(&["crds"]), Command::Crds));
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Args::try_parse_from(["consul-k8s-control-plane"]).is_err());
    }
}
