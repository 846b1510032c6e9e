use crate::k8s::{TerminatingGatewayService, TerminatingGatewayServiceSpec};
use regex::Regex;
use std::{net::IpAddr, sync::OnceLock};
use thiserror::Error;

const DNS_NAME_REGEX: &str =
    r"^[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([-a-zA-Z0-9]*[a-zA-Z0-9])?)*$";

const MAX_DNS_NAME_LEN: usize = 253;

/// Lists every terminating gateway service in the cluster.
#[async_trait::async_trait]
pub trait ListTerminatingGatewayServices: Send + Sync {
    async fn list_terminating_gateway_services(
        &self,
    ) -> anyhow::Result<Vec<TerminatingGatewayService>>;
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum FieldError {
    /// Every registration names its service.
    #[error("spec.service.serviceName: Required value")]
    MissingServiceName,

    #[error("spec.service.servicePort: Invalid value: {0}: must be between 1 and 65535, inclusive")]
    ServicePort(i32),

    /// Addresses are either IPs or DNS names.
    #[error("spec.service.{field}: Invalid value: {value:?}: must be a valid IP address or DNS name")]
    Address { field: &'static str, value: String },
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error(
    "an existing TerminatingGatewayService resource has the same service name `name: {service_name}, namespace: {namespace}`"
)]
pub struct DuplicateServiceName {
    pub service_name: String,
    pub namespace: String,
}

/// Checks the service registration, stopping at the first invalid field.
pub(crate) fn validate_service(spec: &TerminatingGatewayServiceSpec) -> Result<(), FieldError> {
    let svc = &spec.service;
    if svc.service_name.is_empty() {
        return Err(FieldError::MissingServiceName);
    }

    if let Some(port) = svc.service_port {
        if !(1..=65535).contains(&port) {
            return Err(FieldError::ServicePort(port));
        }
    }

    for (field, value) in [
        ("serviceAddress", &svc.service_address),
        ("address", &svc.address),
    ] {
        if let Some(value) = value {
            if !is_ip_or_dns_name(value) {
                return Err(FieldError::Address {
                    field,
                    value: value.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Rejects a new resource that registers a service name already claimed in
/// its namespace.
pub(crate) fn check_unique(
    existing: &[TerminatingGatewayService],
    namespace: &str,
    service_name: &str,
) -> Result<(), DuplicateServiceName> {
    let taken = existing.iter().any(|tgs| {
        tgs.metadata.namespace.as_deref().unwrap_or_default() == namespace
            && tgs.service_name() == service_name
    });
    if taken {
        return Err(DuplicateServiceName {
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
        });
    }
    Ok(())
}

fn is_ip_or_dns_name(value: &str) -> bool {
    if value.parse::<IpAddr>().is_ok() {
        return true;
    }

    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(DNS_NAME_REGEX).expect("DNS name regex must compile"));
    value.len() <= MAX_DNS_NAME_LEN && re.is_match(value)
}
