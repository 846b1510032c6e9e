#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod terminating_gateway_service;

pub use self::terminating_gateway_service::{
    CatalogService, TerminatingGatewayService, TerminatingGatewayServiceSpec,
};
pub use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, Pod, PodSpec, Probe, Secret, ServiceAccount,
    Volume, VolumeMount,
};
pub use kube::api::{ObjectMeta, ResourceExt};
