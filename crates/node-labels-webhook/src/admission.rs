//! Pod admission review handling
//!
//! Turns an `AdmissionReview` into an `AdmissionResponse`: validates that the
//! request carries a creatable Pod, runs the mutation, and attaches the
//! resulting JSON Patch. Validation failures become denied responses that echo
//! the request uid; they never surface as HTTP errors.

use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::mutation::{is_already_injected, mutate_pod, InjectionSettings};

const POD_KIND: &str = "Pod";

/// Outcome of validating an admission request.
#[derive(Debug)]
pub enum PodAdmission {
    /// The pod should be mutated; `raw` is the document the patch applies to
    Mutate { pod: Box<Pod>, raw: Value },
    /// The request is allowed unchanged, with the reason
    Skip(&'static str),
}

/// Validate the request and decode the pod it carries.
pub fn validate_pod_request(request: &AdmissionRequest<DynamicObject>) -> Result<PodAdmission> {
    if request.kind.kind != POD_KIND {
        return Err(Error::InvalidRequest(format!(
            "expected kind {POD_KIND}, got {}",
            request.kind.kind
        )));
    }

    if !matches!(request.operation, Operation::Create) {
        return Ok(PodAdmission::Skip("operation is not CREATE"));
    }

    let object = request
        .object
        .as_ref()
        .ok_or_else(|| Error::InvalidRequest("request has no object".to_string()))?;

    let raw = serde_json::to_value(object)?;
    let pod: Pod = serde_json::from_value(raw.clone())
        .map_err(|e| Error::InvalidRequest(format!("object is not a valid Pod: {e}")))?;

    let spec = pod.spec.as_ref().ok_or(Error::MissingPodSpec)?;
    if spec.containers.is_empty() {
        return Err(Error::InvalidRequest("pod has no containers".to_string()));
    }

    if is_already_injected(&pod) {
        return Ok(PodAdmission::Skip("populator init container already present"));
    }

    Ok(PodAdmission::Mutate {
        pod: Box::new(pod),
        raw,
    })
}

/// Build the admission response for one request.
pub fn admit_pod(
    request: &AdmissionRequest<DynamicObject>,
    settings: &InjectionSettings,
) -> AdmissionResponse {
    let uid = &request.uid;
    let allowed = AdmissionResponse::from(request);

    let (pod, raw) = match validate_pod_request(request) {
        Ok(PodAdmission::Mutate { pod, raw }) => (pod, raw),
        Ok(PodAdmission::Skip(reason)) => {
            debug!(uid = %uid, reason, "Allowing pod unchanged");
            return allowed;
        }
        Err(e) => {
            warn!(uid = %uid, error = %e, "Rejecting invalid admission request");
            return allowed.deny(e.to_string());
        }
    };

    let patch = match mutate_pod(&pod, settings).and_then(|mutation| {
        let patch = mutation.patch_for(&raw)?;
        info!(
            uid = %uid,
            namespace = ?request.namespace,
            generate_name = ?pod.metadata.generate_name,
            config_map = %mutation.config_map_name,
            patch_ops = patch.0.len(),
            "Injecting node labels populator"
        );
        Ok(patch)
    }) {
        Ok(patch) => patch,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to compute pod patch");
            return allowed.deny(e.to_string());
        }
    };

    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            allowed.deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Handle a full admission review, producing the review to send back.
pub fn review_pod_admission(
    review: AdmissionReview<DynamicObject>,
    settings: &InjectionSettings,
) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return AdmissionResponse::invalid(e.to_string()).into_review();
        }
    };

    admit_pod(&request, settings).into_review()
}
