use crate::{
    connect_inject::Cluster,
    k8s::{Namespace, Secret, ServiceAccount, TerminatingGatewayService},
    validation::ListTerminatingGatewayServices,
};
use anyhow::Result;
use kube::api::{Api, ListParams};

/// Cluster lookups served by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    async fn namespace(&self, name: &str) -> Result<Namespace> {
        let api = Api::<Namespace>::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    async fn service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        let api = Api::<ServiceAccount>::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }
}

#[async_trait::async_trait]
impl ListTerminatingGatewayServices for KubeCluster {
    async fn list_terminating_gateway_services(&self) -> Result<Vec<TerminatingGatewayService>> {
        let api = Api::<TerminatingGatewayService>::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }
}
