use crate::annotations::{AnnotationError, PodAnnotations};
use consul_k8s_api::annotations as anno;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;

/// Process-wide metrics defaults, overridable per pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsDefaults {
    pub enable_metrics: bool,
    pub enable_metrics_merging: bool,
    pub merged_metrics_port: String,
    pub prometheus_scrape_port: String,
    pub prometheus_scrape_path: String,
}

/// The metrics settings that apply to one pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodMetrics {
    pub enabled: bool,
    pub merging: bool,
    pub merged_metrics_port: String,
    pub prometheus_scrape_port: String,
    pub prometheus_scrape_path: String,
    /// The application's own metrics port, or `"0"` when unknown.
    pub service_metrics_port: String,
    pub service_metrics_path: String,
}

impl Default for MetricsDefaults {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            enable_metrics_merging: false,
            merged_metrics_port: "20100".to_string(),
            prometheus_scrape_port: "20200".to_string(),
            prometheus_scrape_path: "/metrics".to_string(),
        }
    }
}

impl PodMetrics {
    pub fn resolve(
        defaults: &MetricsDefaults,
        pod: &Pod,
        annotations: &PodAnnotations,
    ) -> Result<Self, AnnotationError> {
        let enabled = annotations
            .enable_metrics
            .unwrap_or(defaults.enable_metrics);
        let merging = annotations
            .enable_metrics_merging
            .unwrap_or(defaults.enable_metrics_merging);

        // The application port only matters when metrics are merged.
        let service_metrics_port = if enabled && merging {
            let (key, raw) = match (&annotations.service_metrics_port, &annotations.port) {
                (Some(port), _) => (anno::ANNOTATION_SERVICE_METRICS_PORT, port.as_str()),
                (None, Some(port)) if !port.is_empty() => (anno::ANNOTATION_PORT, port.as_str()),
                _ => (anno::ANNOTATION_PORT, "0"),
            };
            resolve_port(pod, raw).ok_or_else(|| AnnotationError::Port {
                key,
                value: raw.to_string(),
            })?
        } else {
            "0".to_string()
        };

        Ok(Self {
            enabled,
            merging,
            merged_metrics_port: annotations
                .merged_metrics_port
                .clone()
                .unwrap_or_else(|| defaults.merged_metrics_port.clone()),
            prometheus_scrape_port: annotations
                .prometheus_scrape_port
                .clone()
                .unwrap_or_else(|| defaults.prometheus_scrape_port.clone()),
            prometheus_scrape_path: annotations
                .prometheus_scrape_path
                .clone()
                .unwrap_or_else(|| defaults.prometheus_scrape_path.clone()),
            service_metrics_port,
            service_metrics_path: annotations
                .service_metrics_path
                .clone()
                .unwrap_or_else(|| "/metrics".to_string()),
        })
    }

    /// The sidecar only serves merged metrics when there is an application
    /// metrics endpoint to merge.
    pub fn run_merged_metrics_server(&self) -> bool {
        self.enabled && self.merging && self.service_metrics_port != "0"
    }

    pub fn service_metrics_url(&self) -> String {
        format!(
            "http://127.0.0.1:{}{}",
            self.service_metrics_port, self.service_metrics_path
        )
    }

    /// Scrape annotations for Prometheus, empty unless metrics are enabled.
    pub fn prometheus_annotations(&self) -> BTreeMap<String, String> {
        if !self.enabled {
            return BTreeMap::new();
        }
        BTreeMap::from([
            (anno::ANNOTATION_PROMETHEUS_SCRAPE.to_string(), "true".to_string()),
            (
                anno::ANNOTATION_PROMETHEUS_PORT.to_string(),
                self.prometheus_scrape_port.clone(),
            ),
            (
                anno::ANNOTATION_PROMETHEUS_PATH.to_string(),
                self.prometheus_scrape_path.clone(),
            ),
        ])
    }
}

/// Resolves a numeric port or the name of a container port.
fn resolve_port(pod: &Pod, raw: &str) -> Option<String> {
    if raw.parse::<u16>().is_ok() {
        return Some(raw.to_string());
    }
    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|c| c.ports.iter().flatten())
        .find(|p| p.name.as_deref() == Some(raw))
        .map(|p| p.container_port.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec};

    fn pod_with_port(name: &str, port: i32) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "web".into(),
                    ports: Some(vec![ContainerPort {
                        name: Some(name.into()),
                        container_port: port,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let m = PodMetrics::resolve(
            &MetricsDefaults::default(),
            &Pod::default(),
            &PodAnnotations::default(),
        )
        .unwrap();
        assert!(!m.enabled);
        assert_eq!(m.prometheus_scrape_port, "20200");
        assert_eq!(m.prometheus_scrape_path, "/metrics");
        assert_eq!(m.service_metrics_port, "0");
        assert!(!m.run_merged_metrics_server());
    }

    #[test]
    fn merged_server_needs_service_port() {
        let defaults = MetricsDefaults {
            enable_metrics: true,
            enable_metrics_merging: true,
            ..Default::default()
        };
        let pod = pod_with_port("http", 8080);
        let annotations = PodAnnotations {
            port: Some("http".into()),
            ..Default::default()
        };
        let m = PodMetrics::resolve(&defaults, &pod, &annotations).unwrap();
        assert_eq!(m.service_metrics_port, "8080");
        assert!(m.run_merged_metrics_server());
        assert_eq!(m.service_metrics_url(), "http://127.0.0.1:8080/metrics");

        let annotations = PodAnnotations {
            port: Some("http".into()),
            service_metrics_port: Some("9090".into()),
            service_metrics_path: Some("/stats".into()),
            ..Default::default()
        };
        let m = PodMetrics::resolve(&defaults, &pod, &annotations).unwrap();
        assert_eq!(m.service_metrics_url(), "http://127.0.0.1:9090/stats");
    }

    #[test]
    fn prometheus_annotations() {
        let defaults = MetricsDefaults {
            enable_metrics: true,
            ..Default::default()
        };
        let m = PodMetrics::resolve(&defaults, &Pod::default(), &PodAnnotations::default())
            .unwrap();
        assert_eq!(
            m.prometheus_annotations(),
            maplit::btreemap! {
                "prometheus.io/scrape".to_string() => "true".to_string(),
                "prometheus.io/port".to_string() => "20200".to_string(),
                "prometheus.io/path".to_string() => "/metrics".to_string(),
            }
        );

        let m = PodMetrics::resolve(
            &MetricsDefaults::default(),
            &Pod::default(),
            &PodAnnotations::default(),
        )
        .unwrap();
        assert!(m.prometheus_annotations().is_empty());
    }

    #[test]
    fn unknown_named_port() {
        let annotations = PodAnnotations {
            port: Some("grpc".into()),
            ..Default::default()
        };
        let pod = pod_with_port("http", 8080);
        assert!(PodMetrics::resolve(&MetricsDefaults::default(), &pod, &annotations).is_ok());

        let defaults = MetricsDefaults {
            enable_metrics: true,
            enable_metrics_merging: true,
            ..Default::default()
        };
        let err = PodMetrics::resolve(&defaults, &pod, &annotations).unwrap_err();
        assert_eq!(
            err,
            AnnotationError::Port {
                key: anno::ANNOTATION_PORT,
                value: "grpc".into()
            }
        );
    }
}
