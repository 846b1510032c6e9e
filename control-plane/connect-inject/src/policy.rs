use crate::{
    annotations::{parse_bool, AnnotationError, InvalidAnnotations, PodAnnotations},
    config::Config,
    metrics::PodMetrics,
};
use consul_k8s_api::annotations as anno;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use std::collections::BTreeMap;
use thiserror::Error;

const KUBE_SYSTEM: &str = "kube-system";
const KUBE_PUBLIC: &str = "kube-public";

/// Everything the mutator needs to know about one pod, resolved from its
/// annotations, its namespace and the process defaults.
#[derive(Clone, Debug, PartialEq)]
pub struct InjectionPolicy {
    /// Ordered service names. Contains a single empty name when the pod does
    /// not name its service.
    pub service_names: Vec<String>,
    pub multi_port: bool,
    /// The Consul namespace, empty when namespaces are disabled.
    pub consul_namespace: String,
    pub transparent_proxy: bool,
    pub overwrite_probes: bool,
    pub consul_dns: bool,
    pub metrics: PodMetrics,
    pub auth_method: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum MultiPortConflict {
    #[error("multi port services are not compatible with transparent proxy")]
    TransparentProxy,
    #[error("multi port services are not compatible with metrics")]
    Metrics,
    #[error("multi port services are not compatible with metrics merging")]
    MetricsMerging,
}

/// Decides whether a pod admitted into `namespace` gets a sidecar.
pub fn should_inject(
    config: &Config,
    pod: &Pod,
    namespace: &str,
) -> Result<bool, InvalidAnnotations> {
    if namespace == KUBE_SYSTEM || namespace == KUBE_PUBLIC {
        return Ok(false);
    }

    if config.deny_k8s_namespaces.contains(namespace) {
        return Ok(false);
    }

    let allowed = &config.allow_k8s_namespaces;
    if !allowed.contains("*") && !allowed.contains(namespace) {
        return Ok(false);
    }

    let meta = &pod.metadata;
    let injected = |map: &Option<BTreeMap<String, String>>| {
        map.as_ref()
            .and_then(|m| m.get(anno::KEY_INJECT_STATUS))
            .is_some_and(|v| !v.is_empty())
    };
    if injected(&meta.annotations) || injected(&meta.labels) {
        return Ok(false);
    }

    if let Some(raw) = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(anno::ANNOTATION_INJECT))
    {
        return parse_bool(raw).ok_or_else(|| {
            AnnotationError::Bool {
                key: anno::ANNOTATION_INJECT,
                value: raw.clone(),
            }
            .into()
        });
    }

    Ok(!config.require_annotation)
}

/// Resolves an option from the pod annotation, else the namespace label,
/// else the process default.
fn pod_or_namespace(
    pod_value: Option<bool>,
    namespace: &Namespace,
    key: &'static str,
    default: bool,
) -> Result<bool, AnnotationError> {
    if let Some(v) = pod_value {
        return Ok(v);
    }
    match namespace.metadata.labels.as_ref().and_then(|l| l.get(key)) {
        Some(raw) => parse_bool(raw).ok_or_else(|| AnnotationError::NamespaceLabel {
            key,
            value: raw.clone(),
        }),
        None => Ok(default),
    }
}

// === impl InjectionPolicy ===

impl InjectionPolicy {
    pub fn resolve(
        config: &Config,
        namespace: &Namespace,
        pod: &Pod,
        annotations: &PodAnnotations,
    ) -> Result<Self, InvalidAnnotations> {
        let mut errors = Vec::new();
        let mut ok = |res: Result<bool, AnnotationError>| {
            res.unwrap_or_else(|e| {
                errors.push(e);
                false
            })
        };

        let transparent_proxy = ok(pod_or_namespace(
            annotations.transparent_proxy,
            namespace,
            anno::KEY_TRANSPARENT_PROXY,
            config.transparent_proxy,
        ));
        let consul_dns = ok(pod_or_namespace(
            annotations.consul_dns,
            namespace,
            anno::KEY_CONSUL_DNS,
            config.consul_dns,
        ));
        let metrics = PodMetrics::resolve(&config.metrics, pod, annotations);

        let metrics = match metrics {
            Ok(m) if errors.is_empty() => m,
            Ok(_) => return Err(InvalidAnnotations(errors)),
            Err(e) => {
                errors.push(e);
                return Err(InvalidAnnotations(errors));
            }
        };

        let service_names = if annotations.services.is_empty() {
            vec![String::new()]
        } else {
            annotations.services.clone()
        };

        let k8s_ns = namespace.metadata.name.as_deref().unwrap_or_default();
        Ok(Self {
            multi_port: service_names.len() > 1,
            service_names,
            consul_namespace: config.consul_namespace(k8s_ns),
            transparent_proxy,
            overwrite_probes: transparent_proxy
                && annotations
                    .overwrite_probes
                    .unwrap_or(config.overwrite_probes),
            consul_dns,
            metrics,
            auth_method: config.auth_method().map(str::to_string),
        })
    }

    /// Multi-port pods support neither transparent proxy nor metrics.
    pub fn check_multi_port(&self) -> Result<(), MultiPortConflict> {
        if !self.multi_port {
            return Ok(());
        }
        if self.transparent_proxy {
            return Err(MultiPortConflict::TransparentProxy);
        }
        if self.metrics.enabled {
            return Err(MultiPortConflict::Metrics);
        }
        if self.metrics.merging {
            return Err(MultiPortConflict::MetricsMerging);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use maplit::{btreemap, btreeset};
    use std::collections::BTreeSet;

    fn pod(annotations: BTreeMap<String, String>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn namespace(name: &str, labels: BTreeMap<String, String>) -> Namespace {
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn should_inject_namespaces() {
        struct Case {
            name: &'static str,
            namespaces_enabled: bool,
            allow: &'static [&'static str],
            deny: &'static [&'static str],
            namespace: &'static str,
            expected: bool,
        }
        let mut cases = vec![
            Case {
                name: "kube-system not injected",
                namespaces_enabled: false,
                allow: &["*"],
                deny: &[],
                namespace: "kube-system",
                expected: false,
            },
            Case {
                name: "kube-public not injected",
                namespaces_enabled: false,
                allow: &["*"],
                deny: &[],
                namespace: "kube-public",
                expected: false,
            },
        ];
        for namespaces_enabled in [false, true] {
            let matrix: [(&str, &[&str], &[&str], bool); 8] = [
                ("empty allow/deny lists", &[], &[], false),
                ("allow *", &["*"], &[], true),
                ("allow default", &["default"], &[], true),
                ("allow * and default", &["*", "default"], &[], true),
                ("allow only ns1 and ns2", &["ns1", "ns2"], &[], false),
                ("deny default ns", &[], &["default"], false),
                ("allow *, deny default ns", &["*"], &["default"], false),
                (
                    "default ns in both allow and deny lists",
                    &["default"],
                    &["default"],
                    false,
                ),
            ];
            for (name, allow, deny, expected) in matrix {
                cases.push(Case {
                    name,
                    namespaces_enabled,
                    allow,
                    deny,
                    namespace: "default",
                    expected,
                });
            }
        }

        for case in cases {
            let mut config = Config {
                allow_k8s_namespaces: set(case.allow),
                deny_k8s_namespaces: set(case.deny),
                ..Default::default()
            };
            config.namespaces.enabled = case.namespaces_enabled;
            let injected = should_inject(&config, &Pod::default(), case.namespace).unwrap();
            assert_eq!(
                injected, case.expected,
                "{} (namespaces enabled: {})",
                case.name, case.namespaces_enabled
            );
        }
    }

    #[test]
    fn should_inject_annotations() {
        let config = Config {
            allow_k8s_namespaces: btreeset! {"*".to_string()},
            ..Default::default()
        };

        let already = pod(btreemap! {
            anno::KEY_INJECT_STATUS.to_string() => anno::INJECTED.to_string(),
        });
        assert!(!should_inject(&config, &already, "default").unwrap());

        let labeled = Pod {
            metadata: ObjectMeta {
                labels: Some(btreemap! {
                    anno::KEY_INJECT_STATUS.to_string() => anno::INJECTED.to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(!should_inject(&config, &labeled, "default").unwrap());

        let disabled = pod(btreemap! {
            anno::ANNOTATION_INJECT.to_string() => "false".to_string(),
        });
        assert!(!should_inject(&config, &disabled, "default").unwrap());

        let truthy = pod(btreemap! {
            anno::ANNOTATION_INJECT.to_string() => "t".to_string(),
        });
        let require = Config {
            require_annotation: true,
            ..config.clone()
        };
        assert!(should_inject(&require, &truthy, "default").unwrap());
        assert!(!should_inject(&require, &Pod::default(), "default").unwrap());

        let invalid = pod(btreemap! {
            anno::ANNOTATION_INJECT.to_string() => "sure".to_string(),
        });
        let err = should_inject(&config, &invalid, "default").unwrap_err();
        assert!(err.to_string().contains(anno::ANNOTATION_INJECT));
    }

    fn resolve(
        config: &Config,
        ns: &Namespace,
        annotations: BTreeMap<String, String>,
    ) -> InjectionPolicy {
        let pod = pod(annotations);
        let parsed = PodAnnotations::parse(pod.metadata.annotations.as_ref().unwrap()).unwrap();
        InjectionPolicy::resolve(config, ns, &pod, &parsed).unwrap()
    }

    #[test]
    fn transparent_proxy_precedence() {
        let config = Config::default();
        let plain = namespace("default", BTreeMap::new());
        let labeled = namespace(
            "default",
            btreemap! { anno::KEY_TRANSPARENT_PROXY.to_string() => "true".to_string() },
        );

        assert!(!resolve(&config, &plain, BTreeMap::new()).transparent_proxy);
        assert!(resolve(&config, &labeled, BTreeMap::new()).transparent_proxy);
        assert!(
            !resolve(
                &config,
                &labeled,
                btreemap! { anno::KEY_TRANSPARENT_PROXY.to_string() => "false".to_string() },
            )
            .transparent_proxy
        );

        let enabled = Config {
            transparent_proxy: true,
            overwrite_probes: true,
            ..Default::default()
        };
        let policy = resolve(&enabled, &plain, BTreeMap::new());
        assert!(policy.transparent_proxy);
        assert!(policy.overwrite_probes);
        let policy = resolve(
            &enabled,
            &plain,
            btreemap! {
                anno::ANNOTATION_TRANSPARENT_PROXY_OVERWRITE_PROBES.to_string() => "false".to_string(),
            },
        );
        assert!(!policy.overwrite_probes);
    }

    #[test]
    fn invalid_namespace_label() {
        let ns = namespace(
            "default",
            btreemap! { anno::KEY_CONSUL_DNS.to_string() => "nope".to_string() },
        );
        let pod = Pod::default();
        let err =
            InjectionPolicy::resolve(&Config::default(), &ns, &pod, &PodAnnotations::default())
                .unwrap_err();
        assert_eq!(
            err.0,
            vec![AnnotationError::NamespaceLabel {
                key: anno::KEY_CONSUL_DNS,
                value: "nope".into()
            }]
        );
    }

    #[test]
    fn unnamed_service_is_single_port() {
        let policy = resolve(
            &Config::default(),
            &namespace("default", BTreeMap::new()),
            BTreeMap::new(),
        );
        assert_eq!(policy.service_names, vec![String::new()]);
        assert!(!policy.multi_port);
        assert!(policy.check_multi_port().is_ok());
    }

    #[test]
    fn multi_port_conflicts() {
        let cases = [
            (
                anno::KEY_TRANSPARENT_PROXY,
                "multi port services are not compatible with transparent proxy",
            ),
            (
                anno::ANNOTATION_ENABLE_METRICS,
                "multi port services are not compatible with metrics",
            ),
            (
                anno::ANNOTATION_ENABLE_METRICS_MERGING,
                "multi port services are not compatible with metrics merging",
            ),
        ];
        for (key, expected) in cases {
            let policy = resolve(
                &Config::default(),
                &namespace("default", BTreeMap::new()),
                btreemap! {
                    anno::ANNOTATION_SERVICE.to_string() => "web,web-admin".to_string(),
                    key.to_string() => "true".to_string(),
                },
            );
            assert!(policy.multi_port);
            assert_eq!(policy.check_multi_port().unwrap_err().to_string(), expected);
        }
    }
}
