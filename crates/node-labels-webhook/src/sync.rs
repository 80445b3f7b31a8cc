//! Node label sync
//!
//! Backs the `/sync-pod` callback issued by the injected init container. The
//! labels of the node the pod was scheduled on are written into the ConfigMap
//! named by the mutation, which the pod's containers already reference through
//! `envFrom`. The ConfigMap is owned by the pod so it is garbage-collected
//! with it.
//!
//! The callback is unauthenticated, so a sync is only honoured for a pod that
//! carries the populator init container pointing at the requested ConfigMap,
//! and an existing ConfigMap is only replaced when this webhook wrote it for
//! that same pod.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, PostParams};
use kube::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::mutation::{INIT_CONTAINER_NAME, MAX_CONFIG_MAP_NAME_LENGTH};

/// Prefix of every data key written to the ConfigMap.
pub const ENV_KEY_PREFIX: &str = "NODE_LABEL_";

/// Label marking ConfigMaps written by this webhook.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "node-labels-webhook";

/// Label recording which node the data came from.
pub const SOURCE_NODE_LABEL: &str = "node-labels-webhook/node";

const MAX_LABEL_VALUE_LENGTH: usize = 63;

/// Query parameters sent by the init container.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPodRequest {
    pub node_name: String,
    pub pod_name: String,
    pub namespace: String,
    pub config_map_name: String,
}

impl SyncPodRequest {
    /// Reject empty identifiers and over-long ConfigMap names.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("nodeName", &self.node_name),
            ("podName", &self.pod_name),
            ("namespace", &self.namespace),
            ("configMapName", &self.config_map_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::InvalidRequest(format!("{field} must not be empty")));
            }
        }

        if self.config_map_name.len() > MAX_CONFIG_MAP_NAME_LENGTH {
            return Err(Error::InvalidRequest(format!(
                "configMapName exceeds {MAX_CONFIG_MAP_NAME_LENGTH} bytes"
            )));
        }

        Ok(())
    }
}

/// Summary returned to the caller after a sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPodResponse {
    pub status: &'static str,
    pub config_map: String,
    pub namespace: String,
    pub labels: usize,
}

/// Cluster operations the sync needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Labels of the named node.
    async fn node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>>;

    /// The named pod.
    async fn pod(&self, namespace: &str, pod_name: &str) -> Result<Pod>;

    /// The named ConfigMap, if it exists.
    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    /// Create a ConfigMap; fails with [`Error::Conflict`] if it already exists.
    async fn create_config_map(&self, namespace: &str, config_map: ConfigMap) -> Result<()>;

    /// Replace an existing ConfigMap. `config_map` carries the resourceVersion.
    async fn replace_config_map(&self, namespace: &str, config_map: ConfigMap) -> Result<()>;
}

/// [`ClusterOps`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterOps {
    client: Client,
}

impl KubeClusterOps {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn not_found_or(err: kube::Error, what: String) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound(what),
        other => Error::Kube(other),
    }
}

fn config_map_name(config_map: &ConfigMap) -> Result<&str> {
    config_map
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::InvalidRequest("ConfigMap has no name".to_string()))
}

#[async_trait]
impl ClusterOps for KubeClusterOps {
    async fn node_labels(&self, node_name: &str) -> Result<BTreeMap<String, String>> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node = nodes
            .get(node_name)
            .await
            .map_err(|e| not_found_or(e, format!("node {node_name}")))?;
        Ok(node.metadata.labels.unwrap_or_default())
    }

    async fn pod(&self, namespace: &str, pod_name: &str) -> Result<Pod> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get(pod_name)
            .await
            .map_err(|e| not_found_or(e, format!("pod {namespace}/{pod_name}")))
    }

    async fn config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(configmaps.get_opt(name).await?)
    }

    async fn create_config_map(&self, namespace: &str, config_map: ConfigMap) -> Result<()> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = config_map_name(&config_map)?;

        match configmaps.create(&PostParams::default(), &config_map).await {
            Ok(_) => {
                debug!(namespace, config_map = %name, "Created ConfigMap");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::Conflict(format!(
                "ConfigMap {namespace}/{name} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_config_map(&self, namespace: &str, config_map: ConfigMap) -> Result<()> {
        let configmaps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = config_map_name(&config_map)?;

        configmaps
            .replace(name, &PostParams::default(), &config_map)
            .await
            .map_err(|e| not_found_or(e, format!("ConfigMap {namespace}/{name}")))?;
        debug!(namespace, config_map = %name, "Replaced existing ConfigMap");
        Ok(())
    }
}

/// Turn a node label key into an environment variable name.
///
/// `topology.kubernetes.io/zone` becomes `NODE_LABEL_TOPOLOGY_KUBERNETES_IO_ZONE`.
pub fn env_key_for_label(label_key: &str) -> String {
    let sanitized: String = label_key
        .chars()
        .map(|c| {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() || upper.is_ascii_digit() || upper == '_' {
                upper
            } else {
                '_'
            }
        })
        .collect();
    format!("{ENV_KEY_PREFIX}{sanitized}")
}

fn sanitize_label_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_VALUE_LENGTH)
        .collect();
    cleaned
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

/// Build the ConfigMap holding the node's labels for one pod.
pub fn build_config_map(
    request: &SyncPodRequest,
    node_labels: &BTreeMap<String, String>,
    pod_uid: &str,
) -> ConfigMap {
    // BTreeMap iteration is ordered, so on key collision the later label wins
    let data: BTreeMap<String, String> = node_labels
        .iter()
        .map(|(key, value)| (env_key_for_label(key), value.clone()))
        .collect();

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(
        SOURCE_NODE_LABEL.to_string(),
        sanitize_label_value(&request.node_name),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(request.config_map_name.clone()),
            namespace: Some(request.namespace.clone()),
            labels: Some(labels),
            owner_references: Some(vec![OwnerReference {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
                name: request.pod_name.clone(),
                uid: pod_uid.to_string(),
                controller: Some(false),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// UID of the pod, provided it was injected for `request.config_map_name`.
///
/// The first init container must be the populator and its `CONFIG_MAP_NAME`
/// must name the requested ConfigMap.
pub fn injected_pod_uid(pod: &Pod, request: &SyncPodRequest) -> Result<String> {
    let pod_ref = format!("{}/{}", request.namespace, request.pod_name);
    let populator = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.init_containers.as_ref())
        .and_then(|init_containers| init_containers.first())
        .filter(|container| container.name == INIT_CONTAINER_NAME)
        .ok_or_else(|| Error::Forbidden(format!("pod {pod_ref} was not injected by this webhook")))?;

    let target = populator
        .env
        .iter()
        .flatten()
        .find(|var| var.name == "CONFIG_MAP_NAME")
        .and_then(|var| var.value.as_deref());
    if target != Some(request.config_map_name.as_str()) {
        return Err(Error::Forbidden(format!(
            "pod {pod_ref} does not use ConfigMap {}",
            request.config_map_name
        )));
    }

    pod.metadata
        .uid
        .clone()
        .ok_or_else(|| Error::NotFound(format!("uid of pod {pod_ref}")))
}

/// Whether `config_map` was written by this webhook for the pod with `pod_uid`.
pub fn is_owned_by_pod(config_map: &ConfigMap, pod_uid: &str) -> bool {
    let managed = config_map
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .is_some_and(|value| value == MANAGED_BY_VALUE);
    let owned = config_map
        .metadata
        .owner_references
        .iter()
        .flatten()
        .any(|owner| owner.kind == "Pod" && owner.uid == pod_uid);
    managed && owned
}

/// Write the node's labels into the pod's ConfigMap.
pub async fn sync_pod(cluster: &dyn ClusterOps, request: &SyncPodRequest) -> Result<SyncPodResponse> {
    request.validate()?;

    let pod = cluster.pod(&request.namespace, &request.pod_name).await?;
    let pod_uid = injected_pod_uid(&pod, request)?;
    let labels = cluster.node_labels(&request.node_name).await?;
    let mut config_map = build_config_map(request, &labels, &pod_uid);

    match cluster
        .config_map(&request.namespace, &request.config_map_name)
        .await?
    {
        Some(existing) => {
            if !is_owned_by_pod(&existing, &pod_uid) {
                warn!(
                    namespace = %request.namespace,
                    config_map = %request.config_map_name,
                    pod = %request.pod_name,
                    "Refusing to overwrite ConfigMap not owned by the pod"
                );
                return Err(Error::Conflict(format!(
                    "ConfigMap {}/{} is not managed for pod {}",
                    request.namespace, request.config_map_name, request.pod_name
                )));
            }
            config_map.metadata.resource_version = existing.metadata.resource_version;
            cluster
                .replace_config_map(&request.namespace, config_map)
                .await?;
        }
        None => {
            cluster
                .create_config_map(&request.namespace, config_map)
                .await?;
        }
    }

    info!(
        node = %request.node_name,
        pod = %request.pod_name,
        namespace = %request.namespace,
        config_map = %request.config_map_name,
        labels = labels.len(),
        "Synced node labels into ConfigMap"
    );

    Ok(SyncPodResponse {
        status: "ok",
        config_map: request.config_map_name.clone(),
        namespace: request.namespace.clone(),
        labels: labels.len(),
    })
}
