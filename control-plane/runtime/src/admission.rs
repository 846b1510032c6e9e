use crate::{
    connect_inject::{Admitted, Cluster, MeshWebhook},
    k8s::{Pod, TerminatingGatewayService, TerminatingGatewayServiceSpec},
    metrics::AdmissionMetrics,
    validation::{self, ListTerminatingGatewayServices},
};
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::{
    core::{admission::Operation, DynamicObject},
    Resource, ResourceExt,
};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub(crate) const MUTATE_PATH: &str = "/mutate";
pub(crate) const TERMINATING_GATEWAY_SERVICES_PATH: &str =
    "/mutate-v1alpha1-terminatinggatewayservices";

const VALID_TERMINATING_GATEWAY_SERVICE: &str = "valid TerminatingGatewayService request";

/// Serves the webhooks enabled for this process.
#[derive(Clone)]
pub struct Admission<C> {
    mesh: Option<MeshWebhook<C>>,
    terminating_gateway_services: Option<C>,
    metrics: AdmissionMetrics,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Webhook {
    Mesh,
    TerminatingGatewayServices,
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl<C> tower::Service<Request<hyper::body::Incoming>> for Admission<C>
where
    C: Cluster + ListTerminatingGatewayServices + Clone + 'static,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        let webhook = match self.route(req.method(), req.uri().path()) {
            Some(webhook) => webhook,
            None => {
                return Box::pin(future::ok(
                    Response::builder()
                        .status(http::StatusCode::NOT_FOUND)
                        .body(Body::default())
                        .expect("not found response must be valid"),
                ))
            }
        };

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(webhook, req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl<C> Admission<C>
where
    C: Cluster + ListTerminatingGatewayServices,
{
    /// Serves only the pod injection webhook.
    pub fn mesh(webhook: MeshWebhook<C>, metrics: AdmissionMetrics) -> Self {
        Self {
            mesh: Some(webhook),
            terminating_gateway_services: None,
            metrics,
        }
    }

    /// Serves only the custom resource webhooks.
    pub fn controller(cluster: C, metrics: AdmissionMetrics) -> Self {
        Self {
            mesh: None,
            terminating_gateway_services: Some(cluster),
            metrics,
        }
    }

    fn route(&self, method: &http::Method, path: &str) -> Option<Webhook> {
        if method != http::Method::POST {
            return None;
        }
        match path {
            MUTATE_PATH if self.mesh.is_some() => Some(Webhook::Mesh),
            TERMINATING_GATEWAY_SERVICES_PATH if self.terminating_gateway_services.is_some() => {
                Some(Webhook::TerminatingGatewayServices)
            }
            _ => None,
        }
    }

    async fn admit(&self, webhook: Webhook, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = match (webhook, &self.mesh, &self.terminating_gateway_services) {
            (Webhook::Mesh, Some(mesh), _) => admit_pod(mesh, req).await,
            (Webhook::TerminatingGatewayServices, _, Some(services)) => {
                admit_terminating_gateway_service(services, req).await
            }
            _ => AdmissionResponse::invalid("webhook is not enabled"),
        };
        self.metrics.record(webhook.name(), rsp.allowed);
        rsp
    }
}

// === impl Webhook ===

impl Webhook {
    fn name(self) -> &'static str {
        match self {
            Self::Mesh => "mutate",
            Self::TerminatingGatewayServices => "terminatinggatewayservices",
        }
    }
}

async fn admit_pod<C: Cluster>(mesh: &MeshWebhook<C>, req: AdmissionRequest) -> AdmissionResponse {
    let rsp = AdmissionResponse::from(&req);
    if !is_kind::<Pod>(&req) {
        return unsupported(&req);
    }

    let namespace = req.namespace.clone().unwrap_or_default();
    let pod = match parse_object::<Pod>(req) {
        Ok(pod) => pod,
        Err(error) => {
            info!(%error, %namespace, "Failed to decode pod");
            return deny(rsp, 400, format_args!("could not unmarshal request to pod: {error}"));
        }
    };

    match mesh.handle(&namespace, pod).await {
        Ok(Admitted::Skipped) => rsp,
        Ok(Admitted::Injected(patch)) => {
            let fallback = rsp.clone();
            match rsp.with_patch(patch) {
                Ok(rsp) => rsp,
                Err(error) => {
                    warn!(%error, %namespace, "Failed to encode patch");
                    deny(fallback, 500, format_args!("could not create patch: {error}"))
                }
            }
        }
        Err(error) => {
            info!(%error, %namespace, "Denied");
            let code = error.status_code();
            deny(rsp, code, error)
        }
    }
}

async fn admit_terminating_gateway_service<L: ListTerminatingGatewayServices>(
    services: &L,
    req: AdmissionRequest,
) -> AdmissionResponse {
    let rsp = AdmissionResponse::from(&req);
    if !is_kind::<TerminatingGatewayService>(&req) {
        return unsupported(&req);
    }

    let create = matches!(req.operation, Operation::Create);
    let req_ns = req.namespace.clone();
    let (obj, spec) = match parse_spec::<TerminatingGatewayServiceSpec>(req) {
        Ok(spec) => spec,
        Err(error) => {
            info!(%error, "Failed to parse TerminatingGatewayService spec");
            return deny(rsp, 400, error);
        }
    };
    let ns = obj.namespace().or(req_ns).unwrap_or_default();
    let name = obj.name_any();

    if let Err(error) = validation::validate_service(&spec) {
        info!(%error, %ns, %name, "Denied");
        return deny(
            rsp,
            400,
            format_args!("TerminatingGatewayService.consul.hashicorp.com {name:?} is invalid: {error}"),
        );
    }

    if create {
        let existing = match services.list_terminating_gateway_services().await {
            Ok(existing) => existing,
            Err(error) => {
                warn!(%error, %ns, %name, "Failed to list TerminatingGatewayServices");
                return deny(rsp, 500, error);
            }
        };
        if let Err(error) = validation::check_unique(&existing, &ns, &spec.service.service_name) {
            info!(%error, %ns, %name, "Denied");
            return deny(rsp, 400, error);
        }
    }

    let mut rsp = rsp;
    rsp.result.message = VALID_TERMINATING_GATEWAY_SERVICE.to_string();
    rsp
}

fn deny(rsp: AdmissionResponse, code: u16, reason: impl ToString) -> AdmissionResponse {
    let mut rsp = rsp.deny(reason);
    rsp.result.code = code;
    rsp
}

fn unsupported(req: &AdmissionRequest) -> AdmissionResponse {
    AdmissionResponse::invalid(format_args!(
        "unsupported resource type: {}.{}.{}",
        req.kind.group, req.kind.version, req.kind.kind
    ))
}

fn is_kind<T>(req: &AdmissionRequest) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    req.kind.group.eq_ignore_ascii_case(&T::group(&dt))
        && req.kind.kind.eq_ignore_ascii_case(&T::kind(&dt))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_object<T: DeserializeOwned>(req: AdmissionRequest) -> Result<T> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj, spec))
}
