use k8s_openapi::api::core::v1::{
    EmptyDirVolumeSource, Pod, SecretVolumeSource, Volume, VolumeMount,
};

/// The volume shared between the init container and the sidecar.
pub const DATA_VOLUME: &str = "consul-connect-inject-data";
pub const DATA_MOUNT_PATH: &str = "/consul/connect-inject";

const SA_TOKEN_MOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

pub(crate) fn data_volume() -> Volume {
    Volume {
        name: DATA_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            medium: Some("Memory".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn data_volume_mount() -> VolumeMount {
    VolumeMount {
        name: DATA_VOLUME.to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }
}

fn service_account_volume_name(service: &str) -> String {
    format!("{service}-service-account")
}

/// A secret volume exposing the token of the service account named after a
/// multi-port service.
pub(crate) fn service_account_volume(service: &str, secret_name: &str) -> Volume {
    Volume {
        name: service_account_volume_name(service),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Finds where the service account token is mounted and the path of the
/// token file inside that mount.
///
/// A multi-port service uses its own service account volume, which may be
/// among `added` volumes that have not been applied to the pod yet. Otherwise
/// the token mounted into the pod's containers is used.
pub(crate) fn find_service_account_mount(
    pod: &Pod,
    added: &[Volume],
    multi_port_service: Option<&str>,
) -> Option<(VolumeMount, String)> {
    if let Some(service) = multi_port_service {
        let name = service_account_volume_name(service);
        let existing = pod.spec.iter().flat_map(|s| s.volumes.iter().flatten());
        if existing.chain(added).any(|v| v.name == name) {
            let mount_path = format!("/consul/serviceaccount-{service}");
            let token = format!("{mount_path}/token");
            let mount = VolumeMount {
                name,
                mount_path,
                read_only: Some(true),
                ..Default::default()
            };
            return Some((mount, token));
        }
    }

    pod.spec
        .iter()
        .flat_map(|s| s.containers.iter())
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .find(|m| m.mount_path == SA_TOKEN_MOUNT_PATH)
        .map(|m| (m.clone(), format!("{SA_TOKEN_MOUNT_PATH}/token")))
}
