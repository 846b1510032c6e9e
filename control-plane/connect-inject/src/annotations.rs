//! A typed view of the pod annotations read by the mesh webhook.
//!
//! Annotations are parsed in a single pass so that every malformed value is
//! reported at once instead of failing on the first.

use crate::{
    resources::{Quantity, ResourceSettings},
    upstreams::Upstream,
};
use consul_k8s_api::annotations as anno;
use k8s_openapi::api::core::v1::{Volume, VolumeMount};
use std::{collections::BTreeMap, fmt};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodAnnotations {
    /// Ordered service names; more than one marks a multi-port pod.
    pub services: Vec<String>,
    pub port: Option<String>,
    pub upstreams: Vec<Upstream>,
    /// Containers that also mount the shared data volume.
    pub mount_volumes: Vec<String>,
    pub sidecar_user_volumes: Vec<Volume>,
    pub sidecar_user_volume_mounts: Vec<VolumeMount>,

    pub transparent_proxy: Option<bool>,
    pub overwrite_probes: Option<bool>,
    pub consul_dns: Option<bool>,

    pub enable_metrics: Option<bool>,
    pub enable_metrics_merging: Option<bool>,
    pub merged_metrics_port: Option<String>,
    pub prometheus_scrape_port: Option<String>,
    pub prometheus_scrape_path: Option<String>,
    pub service_metrics_port: Option<String>,
    pub service_metrics_path: Option<String>,

    pub exclude_inbound_ports: Vec<String>,
    pub exclude_outbound_ports: Vec<String>,
    pub exclude_outbound_cidrs: Vec<String>,
    pub exclude_uids: Vec<String>,

    pub sidecar_resources: ResourceSettings,
    pub envoy_extra_args: Option<String>,
    pub envoy_concurrency: Option<u32>,
}

#[derive(Debug, Error, PartialEq, Clone)]
pub enum AnnotationError {
    #[error("annotation {key} has invalid boolean value {value:?}")]
    Bool { key: &'static str, value: String },

    #[error("namespace label {key} has invalid boolean value {value:?}")]
    NamespaceLabel { key: &'static str, value: String },

    #[error("annotation {key} has invalid integer value {value:?}")]
    Integer { key: &'static str, value: String },

    #[error("annotation {key} has invalid quantity {value:?}: {source}")]
    Quantity {
        key: &'static str,
        value: String,
        source: crate::resources::QuantityError,
    },

    #[error("annotation {key} has invalid upstream {value:?}")]
    Upstream { key: &'static str, value: String },

    #[error("annotation {key} refers to unknown port {value:?}")]
    Port { key: &'static str, value: String },

    #[error("error unmarshalling sidecar user volumes: {0}")]
    UserVolumes(String),

    #[error("error unmarshalling sidecar user volume mounts: {0}")]
    UserVolumeMounts(String),
}

/// Every malformed annotation found on a pod.
#[derive(Debug, Error, PartialEq, Clone)]
pub struct InvalidAnnotations(pub Vec<AnnotationError>);

/// Parses a boolean the way flag values are parsed: `1`, `t` and `true` or
/// `0`, `f` and `false`, in any case.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Some(true),
        "0" | "f" | "false" => Some(false),
        _ => None,
    }
}

// === impl PodAnnotations ===

impl PodAnnotations {
    pub fn parse(annotations: &BTreeMap<String, String>) -> Result<Self, InvalidAnnotations> {
        let mut errors = Vec::new();
        let get = |key: &str| annotations.get(key).map(String::as_str);

        let mut boolean = |key: &'static str| {
            let value = get(key)?;
            let parsed = parse_bool(value);
            if parsed.is_none() {
                errors.push(AnnotationError::Bool {
                    key,
                    value: value.to_string(),
                });
            }
            parsed
        };
        let transparent_proxy = boolean(anno::KEY_TRANSPARENT_PROXY);
        let overwrite_probes = boolean(anno::ANNOTATION_TRANSPARENT_PROXY_OVERWRITE_PROBES);
        let consul_dns = boolean(anno::KEY_CONSUL_DNS);
        // An empty metrics annotation defers to the default.
        let enable_metrics = get(anno::ANNOTATION_ENABLE_METRICS)
            .filter(|v| !v.is_empty())
            .and_then(|_| boolean(anno::ANNOTATION_ENABLE_METRICS));
        let enable_metrics_merging = get(anno::ANNOTATION_ENABLE_METRICS_MERGING)
            .filter(|v| !v.is_empty())
            .and_then(|_| boolean(anno::ANNOTATION_ENABLE_METRICS_MERGING));

        let mut quantity = |key: &'static str| {
            let value = get(key)?;
            match value.parse::<Quantity>() {
                Ok(q) => Some(q),
                Err(source) => {
                    errors.push(AnnotationError::Quantity {
                        key,
                        value: value.to_string(),
                        source,
                    });
                    None
                }
            }
        };
        let sidecar_resources = ResourceSettings {
            cpu_request: quantity(anno::ANNOTATION_SIDECAR_PROXY_CPU_REQUEST),
            cpu_limit: quantity(anno::ANNOTATION_SIDECAR_PROXY_CPU_LIMIT),
            memory_request: quantity(anno::ANNOTATION_SIDECAR_PROXY_MEMORY_REQUEST),
            memory_limit: quantity(anno::ANNOTATION_SIDECAR_PROXY_MEMORY_LIMIT),
        };

        let envoy_concurrency = get(anno::ANNOTATION_ENVOY_PROXY_CONCURRENCY).and_then(|v| {
            let parsed = v.trim().parse::<u32>().ok();
            if parsed.is_none() {
                errors.push(AnnotationError::Integer {
                    key: anno::ANNOTATION_ENVOY_PROXY_CONCURRENCY,
                    value: v.to_string(),
                });
            }
            parsed
        });

        let mut upstreams = Vec::new();
        for raw in split_list(get(anno::ANNOTATION_UPSTREAMS)) {
            match Upstream::parse(&raw) {
                Some(u) => upstreams.push(u),
                None => errors.push(AnnotationError::Upstream {
                    key: anno::ANNOTATION_UPSTREAMS,
                    value: raw,
                }),
            }
        }

        let sidecar_user_volumes = match get(anno::ANNOTATION_CONSUL_SIDECAR_USER_VOLUME) {
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e: serde_json::Error| {
                errors.push(AnnotationError::UserVolumes(e.to_string()));
                Vec::new()
            }),
            None => Vec::new(),
        };
        let sidecar_user_volume_mounts =
            match get(anno::ANNOTATION_CONSUL_SIDECAR_USER_VOLUME_MOUNT) {
                Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e: serde_json::Error| {
                    errors.push(AnnotationError::UserVolumeMounts(e.to_string()));
                    Vec::new()
                }),
                None => Vec::new(),
            };

        let parsed = Self {
            services: split_list(get(anno::ANNOTATION_SERVICE)),
            port: get(anno::ANNOTATION_PORT).map(str::to_string),
            upstreams,
            mount_volumes: split_list(get(anno::ANNOTATION_INJECT_MOUNT_VOLUMES)),
            sidecar_user_volumes,
            sidecar_user_volume_mounts,
            transparent_proxy,
            overwrite_probes,
            consul_dns,
            enable_metrics,
            enable_metrics_merging,
            merged_metrics_port: non_empty(get(anno::ANNOTATION_MERGED_METRICS_PORT)),
            prometheus_scrape_port: non_empty(get(anno::ANNOTATION_PROMETHEUS_SCRAPE_PORT)),
            prometheus_scrape_path: non_empty(get(anno::ANNOTATION_PROMETHEUS_SCRAPE_PATH)),
            service_metrics_port: non_empty(get(anno::ANNOTATION_SERVICE_METRICS_PORT)),
            service_metrics_path: non_empty(get(anno::ANNOTATION_SERVICE_METRICS_PATH)),
            exclude_inbound_ports: split_list(get(anno::ANNOTATION_TPROXY_EXCLUDE_INBOUND_PORTS)),
            exclude_outbound_ports: split_list(get(
                anno::ANNOTATION_TPROXY_EXCLUDE_OUTBOUND_PORTS,
            )),
            exclude_outbound_cidrs: split_list(get(
                anno::ANNOTATION_TPROXY_EXCLUDE_OUTBOUND_CIDRS,
            )),
            exclude_uids: split_list(get(anno::ANNOTATION_TPROXY_EXCLUDE_UIDS)),
            sidecar_resources,
            envoy_extra_args: get(anno::ANNOTATION_ENVOY_EXTRA_ARGS).map(str::to_string),
            envoy_concurrency,
        };

        if errors.is_empty() {
            Ok(parsed)
        } else {
            Err(InvalidAnnotations(errors))
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.into_iter()
        .flat_map(|r| r.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.filter(|v| !v.is_empty()).map(str::to_string)
}

// === impl InvalidAnnotations ===

impl From<AnnotationError> for InvalidAnnotations {
    fn from(error: AnnotationError) -> Self {
        Self(vec![error])
    }
}

impl fmt::Display for InvalidAnnotations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            fmt::Display::fmt(error, f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn bools() {
        for v in ["1", "t", "T", "true", "TRUE", "True"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["0", "f", "F", "false", "FALSE"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("yes"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn empty() {
        let parsed = PodAnnotations::parse(&BTreeMap::new()).unwrap();
        assert_eq!(parsed, PodAnnotations::default());
        assert!(parsed.services.is_empty());
    }

    #[test]
    fn services_and_lists() {
        let parsed = PodAnnotations::parse(&btreemap! {
            anno::ANNOTATION_SERVICE.to_string() => "web, web-admin".to_string(),
            anno::ANNOTATION_INJECT_MOUNT_VOLUMES.to_string() => "web,,sidecar".to_string(),
            anno::ANNOTATION_TPROXY_EXCLUDE_UIDS.to_string() => "4444,44444".to_string(),
        })
        .unwrap();
        assert_eq!(parsed.services, vec!["web", "web-admin"]);
        assert_eq!(parsed.mount_volumes, vec!["web", "sidecar"]);
        assert_eq!(parsed.exclude_uids, vec!["4444", "44444"]);
    }

    #[test]
    fn empty_metrics_annotation_is_unset() {
        let parsed = PodAnnotations::parse(&btreemap! {
            anno::ANNOTATION_ENABLE_METRICS.to_string() => "".to_string(),
            anno::ANNOTATION_ENABLE_METRICS_MERGING.to_string() => "true".to_string(),
        })
        .unwrap();
        assert_eq!(parsed.enable_metrics, None);
        assert_eq!(parsed.enable_metrics_merging, Some(true));
    }

    #[test]
    fn collects_every_error() {
        let err = PodAnnotations::parse(&btreemap! {
            anno::KEY_TRANSPARENT_PROXY.to_string() => "maybe".to_string(),
            anno::ANNOTATION_SIDECAR_PROXY_CPU_LIMIT.to_string() => "lots".to_string(),
            anno::ANNOTATION_ENVOY_PROXY_CONCURRENCY.to_string() => "-1".to_string(),
            anno::ANNOTATION_UPSTREAMS.to_string() => "echo:1234,db".to_string(),
        })
        .unwrap_err();
        assert_eq!(err.0.len(), 4);
        let msg = err.to_string();
        assert!(msg.contains(anno::KEY_TRANSPARENT_PROXY), "{msg}");
        assert!(msg.contains(anno::ANNOTATION_SIDECAR_PROXY_CPU_LIMIT), "{msg}");
        assert!(msg.contains(anno::ANNOTATION_ENVOY_PROXY_CONCURRENCY), "{msg}");
        assert!(msg.contains("invalid upstream \"db\""), "{msg}");
    }

    #[test]
    fn user_volumes() {
        let parsed = PodAnnotations::parse(&btreemap! {
            anno::ANNOTATION_CONSUL_SIDECAR_USER_VOLUME.to_string() =>
                r#"[{"name":"bbb","csi":{"driver":"bob"}}]"#.to_string(),
            anno::ANNOTATION_CONSUL_SIDECAR_USER_VOLUME_MOUNT.to_string() =>
                r#"[{"name":"bbb","mountPath":"/bbb"}]"#.to_string(),
        })
        .unwrap();
        assert_eq!(parsed.sidecar_user_volumes[0].name, "bbb");
        assert_eq!(parsed.sidecar_user_volume_mounts[0].mount_path, "/bbb");

        let err = PodAnnotations::parse(&btreemap! {
            anno::ANNOTATION_CONSUL_SIDECAR_USER_VOLUME.to_string() => "[a]".to_string(),
        })
        .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("error unmarshalling sidecar user volumes: "));
    }
}
