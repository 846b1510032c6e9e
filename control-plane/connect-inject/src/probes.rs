use k8s_openapi::{
    api::core::v1::{Container, Probe},
    apimachinery::pkg::util::intstr::IntOrString,
};

/// Overwritten probes are exposed by the sidecar on a fixed range per probe
/// kind, offset by the container's index.
pub const LIVENESS_PORTS_START: i32 = 20300;
pub const READINESS_PORTS_START: i32 = 20400;
pub const STARTUP_PORTS_START: i32 = 20500;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProbeKind {
    Liveness,
    Readiness,
    Startup,
}

/// A probe whose HTTP port moves to the sidecar's exposed range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeRewrite {
    pub container: usize,
    pub kind: ProbeKind,
    pub port: i32,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [Self::Liveness, Self::Readiness, Self::Startup];

    fn range_start(self) -> i32 {
        match self {
            Self::Liveness => LIVENESS_PORTS_START,
            Self::Readiness => READINESS_PORTS_START,
            Self::Startup => STARTUP_PORTS_START,
        }
    }

    fn probe(self, c: &Container) -> Option<&Probe> {
        match self {
            Self::Liveness => c.liveness_probe.as_ref(),
            Self::Readiness => c.readiness_probe.as_ref(),
            Self::Startup => c.startup_probe.as_ref(),
        }
    }

    fn probe_mut(self, c: &mut Container) -> Option<&mut Probe> {
        match self {
            Self::Liveness => c.liveness_probe.as_mut(),
            Self::Readiness => c.readiness_probe.as_mut(),
            Self::Startup => c.startup_probe.as_mut(),
        }
    }
}

/// Lists the HTTP probes of `containers` that move to the exposed ranges.
/// The sidecar's own probes are left alone.
pub(crate) fn rewrites(containers: &[Container], sidecar_name: &str) -> Vec<ProbeRewrite> {
    let mut rewrites = Vec::new();
    for (idx, c) in containers.iter().enumerate() {
        if c.name == sidecar_name {
            continue;
        }
        for kind in ProbeKind::ALL {
            if kind.probe(c).is_some_and(|p| p.http_get.is_some()) {
                rewrites.push(ProbeRewrite {
                    container: idx,
                    kind,
                    port: kind.range_start() + idx as i32,
                });
            }
        }
    }
    rewrites
}

pub(crate) fn apply(containers: &mut [Container], rewrites: &[ProbeRewrite]) {
    for rw in rewrites {
        let http_get = containers
            .get_mut(rw.container)
            .and_then(|c| rw.kind.probe_mut(c))
            .and_then(|p| p.http_get.as_mut());
        if let Some(http_get) = http_get {
            http_get.port = IntOrString::Int(rw.port);
        }
    }
}
