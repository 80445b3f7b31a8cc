//! Pod mutation
//!
//! Builds the JSON Patch that injects the node-labels populator init
//! container and the generated ConfigMap `envFrom` reference into a pod.
//!
//! The original pod is only borrowed. [`mutate_pod`] returns the mutated copy,
//! and [`PodMutation::patch_for`] emits `add` operations addressed by the
//! indices of the raw admitted document, so fields the typed model does not
//! know about are never rewritten.

pub mod env;
pub mod init_container;
pub mod naming;

pub use env::{add_config_map_based_env_vars, config_map_env_source};
pub use init_container::{build_init_container, sync_endpoint, INIT_CONTAINER_NAME};
pub use naming::{generate_config_map_name, MAX_CONFIG_MAP_NAME_LENGTH};

use crate::error::{Error, Result};
use json_patch::{AddOperation, Patch, PatchOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, Pod};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const INIT_CONTAINERS: &str = "initContainers";
const CONTAINERS: &str = "containers";
const ENV_FROM: &str = "envFrom";

/// Settings the mutation depends on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectionSettings {
    /// Externally reachable base URL of this webhook, used by the init container callback
    pub webhook_external_base_url: String,

    /// Name prefix used when the pod has no `generateName`
    pub default_config_map_prefix: String,
}

/// Result of mutating a pod.
#[derive(Debug, Clone)]
pub struct PodMutation {
    pub config_map_name: String,
    pub init_container: Container,
    pub pod: Pod,
}

impl PodMutation {
    /// JSON Patch applying this mutation to the raw pod document `original`.
    ///
    /// Every operation is an `add`: `envFrom` references are prepended to each
    /// existing init container and container, then the populator is inserted
    /// as the first init container.
    pub fn patch_for(&self, original: &Value) -> Result<Patch> {
        let spec = original
            .get("spec")
            .filter(|spec| spec.is_object())
            .ok_or(Error::MissingPodSpec)?;
        let env_source = serde_json::to_value(config_map_env_source(&self.config_map_name))?;

        let mut ops = Vec::new();
        for field in [INIT_CONTAINERS, CONTAINERS] {
            if let Some(containers) = spec.get(field).and_then(Value::as_array) {
                for (index, container) in containers.iter().enumerate() {
                    ops.push(prepend_env_from(field, index, container, &env_source));
                }
            }
        }

        let init_container = serde_json::to_value(&self.init_container)?;
        if spec.get(INIT_CONTAINERS).is_some_and(Value::is_array) {
            ops.push(add(&["spec", INIT_CONTAINERS, "0"], init_container));
        } else {
            ops.push(add(&["spec", INIT_CONTAINERS], Value::Array(vec![init_container])));
        }

        Ok(Patch(ops))
    }

    /// [`patch_for`](Self::patch_for) against the serialized typed pod.
    pub fn patch_from(&self, original: &Pod) -> Result<Patch> {
        self.patch_for(&serde_json::to_value(original)?)
    }
}

fn prepend_env_from(field: &str, index: usize, container: &Value, source: &Value) -> PatchOperation {
    let index = index.to_string();
    if container.get(ENV_FROM).is_some_and(Value::is_array) {
        add(&["spec", field, &index, ENV_FROM, "0"], source.clone())
    } else {
        add(
            &["spec", field, &index, ENV_FROM],
            Value::Array(vec![source.clone()]),
        )
    }
}

fn add(tokens: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(tokens.iter().copied()),
        value,
    })
}

/// Apply the injection to a copy of `pod`.
pub fn mutate_pod(pod: &Pod, settings: &InjectionSettings) -> Result<PodMutation> {
    if pod.spec.is_none() {
        return Err(Error::MissingPodSpec);
    }

    let config_map_name = generate_config_map_name(pod, &settings.default_config_map_prefix);
    let init_container =
        build_init_container(&config_map_name, &settings.webhook_external_base_url);
    let mutated = add_config_map_based_env_vars(pod.clone(), &config_map_name);
    let mutated = with_leading_init_container(mutated, init_container.clone());

    Ok(PodMutation {
        config_map_name,
        init_container,
        pod: mutated,
    })
}

/// Compute the JSON Patch injecting the populator init container and the
/// ConfigMap `envFrom` reference into `pod`.
pub fn mutate_pod_admission(pod: &Pod, settings: &InjectionSettings) -> Result<Patch> {
    mutate_pod(pod, settings)?.patch_from(pod)
}

fn with_leading_init_container(mut pod: Pod, container: Container) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        let mut init_containers = spec.init_containers.take().unwrap_or_default();
        init_containers.insert(0, container);
        spec.init_containers = Some(init_containers);
    }
    pod
}

/// Whether the populator init container is already the first init container.
pub fn is_already_injected(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .and_then(|init_containers| init_containers.first())
        .is_some_and(|container| container.name == INIT_CONTAINER_NAME)
}
