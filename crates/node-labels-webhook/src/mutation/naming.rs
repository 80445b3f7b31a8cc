use k8s_openapi::api::core::v1::Pod;
use uuid::Uuid;

/// Kubernetes object name limit applied to generated ConfigMap names.
pub const MAX_CONFIG_MAP_NAME_LENGTH: usize = 63;

const CONFIG_MAP_SUFFIX_PREFIX: &str = "env-";

/// Generate a unique ConfigMap name for a pod.
///
/// Format: `{prefix}env-{uuid}`. The prefix is the pod's `generateName` when
/// set, otherwise `default_prefix`, cut down so the whole name fits in
/// [`MAX_CONFIG_MAP_NAME_LENGTH`]. The suffix is never shortened.
pub fn generate_config_map_name(pod: &Pod, default_prefix: &str) -> String {
    let suffix = format!("{CONFIG_MAP_SUFFIX_PREFIX}{}", Uuid::new_v4().hyphenated());
    config_map_name_with_suffix(name_prefix(pod, default_prefix), &suffix)
}

fn name_prefix<'a>(pod: &'a Pod, default_prefix: &'a str) -> &'a str {
    pod.metadata
        .generate_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .unwrap_or(default_prefix)
}

// The limit is in bytes; the prefix is cut back to the nearest char boundary.
fn config_map_name_with_suffix(prefix: &str, suffix: &str) -> String {
    let mut end = MAX_CONFIG_MAP_NAME_LENGTH
        .saturating_sub(suffix.len())
        .min(prefix.len());
    while !prefix.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{suffix}", &prefix[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use proptest::prelude::*;

    fn pod_with_generate_name(generate_name: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                generate_name: generate_name.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn assert_uuid_suffix(name: &str) {
        let (_, uuid) = name
            .rsplit_once(CONFIG_MAP_SUFFIX_PREFIX)
            .expect("name should contain the env- marker");
        assert_eq!(uuid.len(), 36);
        assert!(Uuid::parse_str(uuid).is_ok());
    }

    #[test]
    fn uses_generate_name_as_prefix() {
        let pod = pod_with_generate_name(Some("worker-"));
        let name = generate_config_map_name(&pod, "node-labels-");

        assert!(name.starts_with("worker-env-"));
        assert_eq!(name.len(), "worker-env-".len() + 36);
        assert_uuid_suffix(&name);
    }

    #[test]
    fn falls_back_to_default_prefix_when_generate_name_missing() {
        let pod = pod_with_generate_name(None);
        let name = generate_config_map_name(&pod, "node-labels-");

        assert!(name.starts_with("node-labels-env-"));
    }

    #[test]
    fn falls_back_to_default_prefix_when_generate_name_empty() {
        let pod = pod_with_generate_name(Some(""));
        let name = generate_config_map_name(&pod, "fallback-");

        assert!(name.starts_with("fallback-env-"));
    }

    #[test]
    fn long_prefix_is_truncated_to_fit() {
        let prefix = "a".repeat(100);
        let pod = pod_with_generate_name(Some(&prefix));
        let name = generate_config_map_name(&pod, "unused-");

        assert_eq!(name.len(), MAX_CONFIG_MAP_NAME_LENGTH);
        assert!(name.starts_with(&"a".repeat(23)));
        assert_uuid_suffix(&name);
    }

    #[test]
    fn names_are_unique_per_call() {
        let pod = pod_with_generate_name(Some("worker-"));
        let first = generate_config_map_name(&pod, "x-");
        let second = generate_config_map_name(&pod, "x-");

        assert_ne!(first, second);
    }

    #[test]
    fn suffix_is_kept_even_when_longer_than_limit() {
        let suffix = "s".repeat(70);
        assert_eq!(config_map_name_with_suffix("prefix-", &suffix), suffix);
    }

    #[test]
    fn truncation_counts_bytes_at_char_boundaries() {
        let prefix = "é".repeat(40);
        let name = config_map_name_with_suffix(&prefix, &"s".repeat(40));

        assert!(name.len() <= MAX_CONFIG_MAP_NAME_LENGTH);
        assert_eq!(name.len(), 62);
        assert!(name.starts_with(&"é".repeat(11)));
        assert!(!name.starts_with(&"é".repeat(12)));
    }

    proptest! {
        #[test]
        fn generated_name_never_exceeds_limit(
            generate_name in proptest::option::of("\\PC{0,120}"),
            default_prefix in "[a-z0-9-]{0,120}",
        ) {
            let pod = pod_with_generate_name(generate_name.as_deref());
            let name = generate_config_map_name(&pod, &default_prefix);

            prop_assert!(name.len() <= MAX_CONFIG_MAP_NAME_LENGTH);
            prop_assert!(name.contains(CONFIG_MAP_SUFFIX_PREFIX));
        }
    }
}
