//! Kubernetes resource quantities for injected containers.

use k8s_openapi::{
    api::core::v1::ResourceRequirements, apimachinery::pkg::api::resource::Quantity as K8sQuantity,
};
use regex::Regex;
use std::{collections::BTreeMap, fmt, str::FromStr, sync::OnceLock};
use thiserror::Error;

const QUANTITY_REGEX: &str = r"^([+-]?[0-9.]+)([eEinumkKMGTP]*[-+]?[0-9]*)$";

/// A validated resource quantity such as `50m` or `25Mi`.
#[derive(Clone, Debug, PartialEq)]
pub struct Quantity {
    raw: String,
    value: f64,
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("quantities must match the regular expression '{}'", QUANTITY_REGEX)]
pub struct QuantityError(());

/// Requests and limits for a single container.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSettings {
    pub cpu_request: Option<Quantity>,
    pub cpu_limit: Option<Quantity>,
    pub memory_request: Option<Quantity>,
    pub memory_limit: Option<Quantity>,
}

// === impl Quantity ===

impl Quantity {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The quantity in base units, used only for comparisons.
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re =
            RE.get_or_init(|| Regex::new(QUANTITY_REGEX).expect("quantity regex must compile"));
        let caps = re.captures(s).ok_or(QuantityError(()))?;

        let number = caps[1].parse::<f64>().map_err(|_| QuantityError(()))?;
        let scale = suffix_scale(&caps[2]).ok_or(QuantityError(()))?;
        Ok(Self {
            raw: s.to_string(),
            value: number * scale,
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.raw.fmt(f)
    }
}

fn suffix_scale(suffix: &str) -> Option<f64> {
    let scale = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp => {
            let exp = exp.strip_prefix('e').or_else(|| exp.strip_prefix('E'))?;
            10f64.powi(exp.parse::<i32>().ok()?)
        }
    };
    Some(scale)
}

// === impl ResourceSettings ===

impl ResourceSettings {
    /// Returns the names of the first request/limit pair in which the
    /// request exceeds a non-zero limit.
    pub fn exceeded_limit(&self) -> Option<(&'static str, &Quantity, &Quantity)> {
        let pairs = [
            ("cpu", &self.cpu_request, &self.cpu_limit),
            ("memory", &self.memory_request, &self.memory_limit),
        ];
        pairs.into_iter().find_map(|(name, req, lim)| match (req, lim) {
            (Some(req), Some(lim)) if lim.value() != 0.0 && req.value() > lim.value() => {
                Some((name, req, lim))
            }
            _ => None,
        })
    }

    /// Overrides each value that is set in `other`.
    pub fn merge(&self, other: &ResourceSettings) -> ResourceSettings {
        ResourceSettings {
            cpu_request: other.cpu_request.clone().or_else(|| self.cpu_request.clone()),
            cpu_limit: other.cpu_limit.clone().or_else(|| self.cpu_limit.clone()),
            memory_request: other
                .memory_request
                .clone()
                .or_else(|| self.memory_request.clone()),
            memory_limit: other
                .memory_limit
                .clone()
                .or_else(|| self.memory_limit.clone()),
        }
    }

    /// Renders the container resources, omitting empty request or limit maps.
    pub fn requirements(&self) -> Option<ResourceRequirements> {
        let list = |cpu: &Option<Quantity>, memory: &Option<Quantity>| {
            let mut list = BTreeMap::new();
            if let Some(q) = cpu {
                list.insert("cpu".to_string(), K8sQuantity(q.raw.clone()));
            }
            if let Some(q) = memory {
                list.insert("memory".to_string(), K8sQuantity(q.raw.clone()));
            }
            Some(list).filter(|l| !l.is_empty())
        };

        let requests = list(&self.cpu_request, &self.memory_request);
        let limits = list(&self.cpu_limit, &self.memory_limit);
        if requests.is_none() && limits.is_none() {
            return None;
        }
        Some(ResourceRequirements {
            requests,
            limits,
            ..Default::default()
        })
    }
}
