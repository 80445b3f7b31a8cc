use k8s_openapi::api::core::v1::{ConfigMapEnvSource, Container, EnvFromSource, Pod};

/// Prepend a reference to `config_map_name` to the `envFrom` list of every
/// init container and every container of the pod.
///
/// Init containers are visited before regular containers. Calling this twice
/// prepends two references.
pub fn add_config_map_based_env_vars(mut pod: Pod, config_map_name: &str) -> Pod {
    if let Some(spec) = pod.spec.as_mut() {
        if let Some(init_containers) = spec.init_containers.take() {
            spec.init_containers = Some(
                init_containers
                    .into_iter()
                    .map(|container| with_config_map_env_from(container, config_map_name))
                    .collect(),
            );
        }
        spec.containers = std::mem::take(&mut spec.containers)
            .into_iter()
            .map(|container| with_config_map_env_from(container, config_map_name))
            .collect();
    }
    pod
}

fn with_config_map_env_from(mut container: Container, config_map_name: &str) -> Container {
    let mut env_from = Vec::with_capacity(container.env_from.as_ref().map_or(0, Vec::len) + 1);
    env_from.push(config_map_env_source(config_map_name));
    env_from.extend(container.env_from.take().unwrap_or_default());
    container.env_from = Some(env_from);
    container
}

/// `envFrom` entry sourcing every key of the named ConfigMap.
pub fn config_map_env_source(config_map_name: &str) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name: config_map_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
