//! Patch generation properties checked over generated pods.

use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, Container, EnvFromSource, Pod, PodSpec, SecretEnvSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use node_labels_webhook::mutation::{
    mutate_pod, mutate_pod_admission, sync_endpoint, InjectionSettings, INIT_CONTAINER_NAME,
    MAX_CONFIG_MAP_NAME_LENGTH,
};
use proptest::prelude::*;
use serde_json::json;

const BASE_URL: &str = "http://webhook.svc";

fn settings(prefix: &str) -> InjectionSettings {
    InjectionSettings {
        webhook_external_base_url: BASE_URL.to_string(),
        default_config_map_prefix: prefix.to_string(),
    }
}

fn env_source(index: usize) -> EnvFromSource {
    if index % 2 == 0 {
        EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: format!("secret-{index}"),
                ..Default::default()
            }),
            ..Default::default()
        }
    } else {
        EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: format!("existing-{index}"),
                ..Default::default()
            }),
            prefix: Some("APP_".to_string()),
            ..Default::default()
        }
    }
}

fn container(name: String, env_from_len: Option<usize>) -> Container {
    Container {
        name,
        image: Some("busybox:1.36".to_string()),
        env_from: env_from_len.map(|len| (0..len).map(env_source).collect()),
        args: Some(vec!["sleep".to_string(), "3600".to_string()]),
        ..Default::default()
    }
}

fn containers(prefix: &'static str, shapes: Vec<Option<usize>>) -> Vec<Container> {
    shapes
        .into_iter()
        .enumerate()
        .map(|(i, len)| container(format!("{prefix}-{i}"), len))
        .collect()
}

fn arb_pod() -> impl Strategy<Value = Pod> {
    (
        proptest::option::of("[a-z][a-z0-9-]{0,80}"),
        proptest::option::of(proptest::collection::vec(
            proptest::option::of(0usize..3),
            0..3,
        )),
        proptest::collection::vec(proptest::option::of(0usize..3), 1..4),
    )
        .prop_map(|(generate_name, init, main)| Pod {
            metadata: ObjectMeta {
                generate_name,
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                init_containers: init.map(|shapes| containers("init", shapes)),
                containers: containers("app", main),
                ..Default::default()
            }),
            ..Default::default()
        })
}

fn apply(original: &Pod, patch: &json_patch::Patch) -> Pod {
    let mut doc = serde_json::to_value(original).unwrap();
    json_patch::patch(&mut doc, &patch.0).unwrap();
    serde_json::from_value(doc).unwrap()
}

fn first_ref(container: &Container) -> Option<&str> {
    container
        .env_from
        .as_ref()?
        .first()?
        .config_map_ref
        .as_ref()
        .map(|source| source.name.as_str())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn patch_applies_to_mutated_pod(pod in arb_pod()) {
        let mutation = mutate_pod(&pod, &settings("node-labels-")).unwrap();
        let patch = mutation.patch_from(&pod).unwrap();

        prop_assert_eq!(apply(&pod, &patch), mutation.pod);
    }

    #[test]
    fn patch_preserves_fields_unknown_to_typed_model(pod in arb_pod()) {
        let mut raw = serde_json::to_value(&pod).unwrap();
        for field in ["initContainers", "containers"] {
            if let Some(containers) = raw["spec"][field].as_array_mut() {
                for (index, container) in containers.iter_mut().enumerate() {
                    container["stopSignal"] = json!(format!("SIGUSR{index}"));
                }
            }
        }
        let mutation = mutate_pod(&pod, &settings("node-labels-")).unwrap();
        let patch = mutation.patch_for(&raw).unwrap();

        let mut doc = raw.clone();
        json_patch::patch(&mut doc, &patch.0).unwrap();

        let shifted = doc["spec"]["initContainers"].as_array().unwrap()[1..].to_vec();
        let before = raw["spec"]["initContainers"].as_array().cloned().unwrap_or_default();
        prop_assert_eq!(shifted.len(), before.len());
        for (old, new) in before.iter().zip(&shifted) {
            prop_assert_eq!(&old["stopSignal"], &new["stopSignal"]);
            prop_assert_eq!(&old["name"], &new["name"]);
        }
        for (old, new) in raw["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .zip(doc["spec"]["containers"].as_array().unwrap())
        {
            prop_assert_eq!(&old["stopSignal"], &new["stopSignal"]);
        }

        let typed: Pod = serde_json::from_value(doc).unwrap();
        prop_assert_eq!(typed, mutation.pod);
    }

    #[test]
    fn original_pod_never_changes(pod in arb_pod()) {
        let snapshot = pod.clone();
        mutate_pod_admission(&pod, &settings("node-labels-")).unwrap();

        prop_assert_eq!(pod, snapshot);
    }

    #[test]
    fn injection_invariants_hold(pod in arb_pod(), prefix in "[a-z0-9-]{0,100}") {
        let mutation = mutate_pod(&pod, &settings(&prefix)).unwrap();
        let name = mutation.config_map_name.as_str();
        prop_assert!(name.len() <= MAX_CONFIG_MAP_NAME_LENGTH);

        let before = pod.spec.unwrap();
        let after = mutation.pod.spec.unwrap();

        let old_init = before.init_containers.unwrap_or_default();
        let new_init = after.init_containers.unwrap();
        prop_assert_eq!(new_init.len(), old_init.len() + 1);
        prop_assert_eq!(new_init[0].name.as_str(), INIT_CONTAINER_NAME);
        prop_assert!(new_init[0].env_from.is_none());

        let pairs = old_init
            .iter()
            .zip(&new_init[1..])
            .chain(before.containers.iter().zip(&after.containers));
        for (old, new) in pairs {
            prop_assert_eq!(&old.name, &new.name);
            prop_assert_eq!(first_ref(new), Some(name));

            let old_sources = old.env_from.clone().unwrap_or_default();
            let new_sources = new.env_from.clone().unwrap();
            prop_assert_eq!(&new_sources[1..], old_sources.as_slice());
        }
    }
}

#[test]
fn endpoint_is_built_from_base_url() {
    let pod = Pod {
        spec: Some(PodSpec {
            containers: vec![container("app".to_string(), None)],
            ..Default::default()
        }),
        ..Default::default()
    };
    let mutation = mutate_pod(&pod, &settings("node-labels-")).unwrap();
    let init_containers = mutation.pod.spec.unwrap().init_containers.unwrap();
    let endpoint = init_containers[0]
        .env
        .as_ref()
        .unwrap()
        .iter()
        .find(|var| var.name == "ENDPOINT")
        .and_then(|var| var.value.clone());

    assert_eq!(endpoint, Some(sync_endpoint(BASE_URL)));
    assert_eq!(
        sync_endpoint(BASE_URL),
        "http://webhook.svc/sync-pod?nodeName=$(NODE_NAME)&podName=$(POD_NAME)&namespace=$(NAMESPACE)&configMapName=$(CONFIG_MAP_NAME)"
    );
}

#[test]
fn worker_pod_patch_adds_init_containers_and_env_from() {
    let pod = Pod {
        metadata: ObjectMeta {
            generate_name: Some("worker-".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    let patch = mutate_pod_admission(&pod, &settings("unused-")).unwrap();
    let patched = apply(&pod, &patch);
    let spec = patched.spec.unwrap();

    let init = spec.init_containers.unwrap();
    assert_eq!(init.len(), 1);
    assert_eq!(init[0].name, INIT_CONTAINER_NAME);

    let env_from = spec.containers[0].env_from.clone().unwrap();
    assert_eq!(env_from.len(), 1);
    let name = &env_from[0].config_map_ref.as_ref().unwrap().name;
    assert!(name.starts_with("worker-env-"));
    assert_eq!(name.len(), "worker-env-".len() + 36);
}
