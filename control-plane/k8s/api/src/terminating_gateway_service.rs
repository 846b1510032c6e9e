use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Registers an external service with the mesh so that it is reachable
/// through a terminating gateway.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "consul.hashicorp.com",
    version = "v1alpha1",
    kind = "TerminatingGatewayService",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TerminatingGatewayServiceSpec {
    pub service: CatalogService,
}

/// The catalog registration for the external service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CatalogService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(default)]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_meta: BTreeMap<String, String>,
}

impl TerminatingGatewayService {
    pub fn service_name(&self) -> &str {
        &self.spec.service.service_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{CustomResourceExt, Resource};

    #[test]
    fn crd_names() {
        let crd = TerminatingGatewayService::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("terminatinggatewayservices.consul.hashicorp.com")
        );
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(TerminatingGatewayService::kind(&()), "TerminatingGatewayService");
    }

    #[test]
    fn crd_renders_as_yaml() {
        let yaml = serde_yaml::to_string(&TerminatingGatewayService::crd()).unwrap();
        assert!(yaml.contains("kind: CustomResourceDefinition"));
        assert!(yaml.contains("serviceName"));
    }

    #[test]
    fn decodes_camel_case_spec() {
        let spec: TerminatingGatewayServiceSpec = serde_json::from_value(serde_json::json!({
            "service": {
                "node": "legacy_node",
                "address": "10.20.10.22",
                "serviceName": "legacy",
                "servicePort": 80,
                "serviceTags": ["v1"],
            }
        }))
        .unwrap();
        assert_eq!(spec.service.service_name, "legacy");
        assert_eq!(spec.service.service_port, Some(80));
        assert_eq!(spec.service.service_tags, vec!["v1".to_string()]);
        assert_eq!(spec.service.service_address, None);
    }
}
