use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    responses: Family<Labels, Counter>,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    webhook: &'static str,
    verdict: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let responses = Family::<Labels, Counter>::default();
        reg.register(
            "responses",
            "Count of admission responses by webhook and verdict",
            responses.clone(),
        );
        Self { responses }
    }

    pub(crate) fn record(&self, webhook: &'static str, allowed: bool) {
        let verdict = if allowed { "allowed" } else { "denied" };
        self.responses
            .get_or_create(&Labels { webhook, verdict })
            .inc();
    }
}
