#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Consul ACL policy documents for the control plane's own tokens.
//!
//! Each document is HCL text whose shape depends on whether admin
//! partitions, Consul namespaces and cluster peering are enabled.

mod rules;


/// The components that get their own ACL policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Component {
    Agent,
    Anonymous,
    ConnectInject,
    Controller,
    Sync,
    ReplicationToken,
    MeshGateway,
    IngressGateway,
    TerminatingGateway,
    ApiGatewayController,
}

/// The cluster features that shape the rendered rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RulesConfig {
    /// The admin partition; partitions are enabled when it is non-empty.
    pub partition: Option<String>,
    pub enable_namespaces: bool,
    pub enable_peering: bool,
    /// The Consul namespace injected services register into when not
    /// mirroring Kubernetes namespaces.
    pub inject_destination_namespace: String,
    pub inject_mirroring: bool,
    pub inject_mirroring_prefix: String,
    /// The Consul node catalog sync registers Kubernetes services under.
    pub sync_node_name: String,
    pub sync_destination_namespace: String,
    pub sync_mirroring: bool,
    pub sync_mirroring_prefix: String,
}

/// A gateway's Consul service name and namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Gateway {
    pub name: String,
    pub namespace: String,
}

impl RulesConfig {
    fn partition(&self) -> Option<&str> {
        self.partition.as_deref().filter(|p| !p.is_empty())
    }

    pub fn render(&self, component: Component, gateway: &Gateway) -> String {
        match component {
            Component::Agent => self.agent_rules(),
            Component::Anonymous => self.anonymous_token_rules(),
            Component::ConnectInject => self.inject_rules(),
            Component::Controller => self.controller_rules(),
            Component::Sync => self.sync_rules(),
            Component::ReplicationToken => self.replication_token_rules(),
            Component::MeshGateway => self.mesh_gateway_rules(),
            Component::IngressGateway => self.ingress_gateway_rules(gateway),
            Component::TerminatingGateway => self.terminating_gateway_rules(gateway),
            Component::ApiGatewayController => self.api_gateway_controller_rules(),
        }
    }
}
