//! The traffic redirection settings consumed by the init container (or the
//! CNI plugin) when programming iptables for transparent proxy.

use crate::{annotations::PodAnnotations, policy::InjectionPolicy, probes, sidecar};
use k8s_openapi::api::core::v1::Container;
use serde::Serialize;

pub const PROXY_INBOUND_PORT: u16 = 20000;
pub const PROXY_OUTBOUND_PORT: u16 = 15001;
pub const DNS_BIND_HOST: &str = "127.0.0.1";
pub const DNS_BIND_PORT: u16 = 8600;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RedirectTrafficConfig {
    #[serde(rename = "ConsulDNSIP", skip_serializing_if = "String::is_empty")]
    pub consul_dns_ip: String,
    #[serde(rename = "ConsulDNSPort", skip_serializing_if = "is_zero")]
    pub consul_dns_port: u16,
    #[serde(rename = "ProxyUserID", skip_serializing_if = "String::is_empty")]
    pub proxy_user_id: String,
    #[serde(rename = "ProxyInboundPort", skip_serializing_if = "is_zero")]
    pub proxy_inbound_port: u16,
    #[serde(rename = "ProxyOutboundPort", skip_serializing_if = "is_zero")]
    pub proxy_outbound_port: u16,
    #[serde(rename = "ExcludeInboundPorts", skip_serializing_if = "Vec::is_empty")]
    pub exclude_inbound_ports: Vec<String>,
    #[serde(rename = "ExcludeOutboundPorts", skip_serializing_if = "Vec::is_empty")]
    pub exclude_outbound_ports: Vec<String>,
    #[serde(rename = "ExcludeOutboundCIDRs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_outbound_cidrs: Vec<String>,
    #[serde(rename = "ExcludeUIDs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_uids: Vec<String>,
    #[serde(rename = "NetNS", skip_serializing_if = "String::is_empty")]
    pub net_ns: String,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

impl RedirectTrafficConfig {
    pub fn new(
        policy: &InjectionPolicy,
        annotations: &PodAnnotations,
        containers: &[Container],
    ) -> Self {
        let mut exclude_inbound_ports = Vec::new();
        if policy.metrics.enabled {
            exclude_inbound_ports.push(policy.metrics.prometheus_scrape_port.clone());
        }
        // Overwritten probes are served by the sidecar directly.
        if policy.overwrite_probes {
            exclude_inbound_ports.extend(
                probes::rewrites(containers, sidecar::SIDECAR_CONTAINER)
                    .into_iter()
                    .map(|rw| rw.port.to_string()),
            );
        }
        exclude_inbound_ports.extend(annotations.exclude_inbound_ports.iter().cloned());

        let mut exclude_uids = annotations.exclude_uids.clone();
        exclude_uids.push(crate::init_container::INIT_CONTAINER_UID.to_string());

        let (consul_dns_ip, consul_dns_port) = if policy.consul_dns {
            (DNS_BIND_HOST.to_string(), DNS_BIND_PORT)
        } else {
            (String::new(), 0)
        };

        Self {
            consul_dns_ip,
            consul_dns_port,
            proxy_user_id: sidecar::SIDECAR_UID.to_string(),
            proxy_inbound_port: PROXY_INBOUND_PORT,
            proxy_outbound_port: PROXY_OUTBOUND_PORT,
            exclude_inbound_ports,
            exclude_outbound_ports: annotations.exclude_outbound_ports.clone(),
            exclude_outbound_cidrs: annotations.exclude_outbound_cidrs.clone(),
            exclude_uids,
            net_ns: String::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
