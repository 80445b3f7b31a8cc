use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector};

/// Name of the injected init container.
pub const INIT_CONTAINER_NAME: &str = "node-labels-to-configmap-populator";

/// Image used by the injected init container.
pub const INIT_CONTAINER_IMAGE: &str = "curlimages/curl:7.75.0";

const IMAGE_PULL_POLICY: &str = "IfNotPresent";

/// Path on the webhook server that the init container calls back.
pub const SYNC_POD_PATH: &str = "/sync-pod";

/// Build the URL the init container POSTs to.
///
/// The `$(VAR)` references are expanded by the kubelet from the container's
/// own environment, not here.
pub fn sync_endpoint(webhook_external_base_url: &str) -> String {
    format!(
        "{webhook_external_base_url}{SYNC_POD_PATH}?nodeName=$(NODE_NAME)&podName=$(POD_NAME)&namespace=$(NAMESPACE)&configMapName=$(CONFIG_MAP_NAME)"
    )
}

/// Build the init container that reports node and pod identity to the webhook.
pub fn build_init_container(config_map_name: &str, webhook_external_base_url: &str) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(INIT_CONTAINER_IMAGE.to_string()),
        image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
        env: Some(vec![
            field_ref_env("NODE_NAME", "spec.nodeName"),
            field_ref_env("POD_NAME", "metadata.name"),
            field_ref_env("NAMESPACE", "metadata.namespace"),
            literal_env("CONFIG_MAP_NAME", config_map_name),
            literal_env("ENDPOINT", &sync_endpoint(webhook_external_base_url)),
        ]),
        args: Some(vec![
            "-kX".to_string(),
            "POST".to_string(),
            "$(ENDPOINT)".to_string(),
        ]),
        ..Default::default()
    }
}

fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn literal_env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}
