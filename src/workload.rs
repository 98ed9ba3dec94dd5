use crate::image_reference::ImageReference;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

static DEFAULT_WORKLOAD_GROUP: &str = "apps";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

impl WorkloadKind {
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Deployment" => Some(Self::Deployment),
            "StatefulSet" => Some(Self::StatefulSet),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one workload within an application: `{kind}/{name}`.
pub fn resource_key(kind: WorkloadKind, name: &str) -> String {
    format!("{}/{}", kind, name)
}

/// Coordinates of one tracked workload, as needed to read or patch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub group: String,
    pub version: String,
}

impl WorkloadRef {
    pub fn new(
        kind: WorkloadKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
        group: &str,
        version: impl Into<String>,
    ) -> Self {
        let group = if group.is_empty() {
            DEFAULT_WORKLOAD_GROUP
        } else {
            group
        };
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
            group: group.to_string(),
            version: version.into(),
        }
    }

    pub fn resource_key(&self) -> String {
        resource_key(self.kind, &self.name)
    }
}

/// Workload resource types whose pod template carries the containers we manage.
pub trait Workload
where
    Self: Resource<DynamicType = (), Scope = NamespaceResourceScope> + DeserializeOwned,
{
    const KIND: WorkloadKind;

    fn pod_spec(&self) -> Option<&PodSpec>;
}

impl Workload for Deployment {
    const KIND: WorkloadKind = WorkloadKind::Deployment;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl Workload for StatefulSet {
    const KIND: WorkloadKind = WorkloadKind::StatefulSet;

    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

/// The parts of a workload manifest the image records are built from.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadManifest {
    pub api_version: String,
    pub kind: WorkloadKind,
    pub metadata: ObjectMeta,
    pub pod_spec: PodSpec,
}

impl WorkloadManifest {
    pub fn parse(kind: WorkloadKind, raw: &str) -> Result<Self, serde_json::Error> {
        match kind {
            WorkloadKind::Deployment => Self::decode::<Deployment>(raw),
            WorkloadKind::StatefulSet => Self::decode::<StatefulSet>(raw),
        }
    }

    fn decode<W: Workload>(raw: &str) -> Result<Self, serde_json::Error> {
        let workload: W = serde_json::from_str(raw)?;
        Ok(Self {
            api_version: W::api_version(&()).into_owned(),
            kind: W::KIND,
            pod_spec: workload.pod_spec().cloned().unwrap_or_default(),
            metadata: workload.meta().clone(),
        })
    }

    pub fn name(&self) -> String {
        self.metadata.name.clone().unwrap_or_default()
    }

    pub fn resource_key(&self) -> String {
        resource_key(self.kind, &self.name())
    }

    /// Coordinates for patching this manifest, taken from its own
    /// `apiVersion` (`apps/v1` is group `apps`, version `v1`).
    pub fn workload_ref(&self) -> WorkloadRef {
        let (group, version) = self
            .api_version
            .rsplit_once('/')
            .unwrap_or(("", self.api_version.as_str()));
        WorkloadRef {
            kind: self.kind,
            name: self.name(),
            namespace: self.metadata.namespace.clone().unwrap_or_default(),
            group: group.to_string(),
            version: version.to_string(),
        }
    }
}

/// Images of every container in a pod spec, in container order.
pub fn container_images(pod_spec: &PodSpec) -> impl Iterator<Item = (&str, ImageReference)> {
    pod_spec.containers.iter().filter_map(|container| {
        container
            .image
            .as_deref()
            .map(|image| (container.name.as_str(), ImageReference::parse(image)))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn manifest_json(kind: &str, name: &str, images: &[(&str, &str)]) -> String {
        let containers: Vec<_> = images
            .iter()
            .map(|(container, image)| json!({ "name": container, "image": image }))
            .collect();
        json!({
            "apiVersion": "apps/v1",
            "kind": kind,
            "metadata": { "name": name, "namespace": "shop" },
            "spec": {
                "selector": { "matchLabels": { "app": name } },
                "serviceName": name,
                "template": {
                    "metadata": { "labels": { "app": name } },
                    "spec": { "containers": containers }
                }
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_deployment_manifest() {
        let raw = manifest_json(
            "Deployment",
            "web",
            &[("web", "host:5000/shop/web:v1"), ("proxy", "envoy:1.30")],
        );
        let manifest = WorkloadManifest::parse(WorkloadKind::Deployment, &raw).unwrap();

        assert_eq!(manifest.resource_key(), "Deployment/web");
        assert_eq!(manifest.api_version, "apps/v1");
        assert_eq!(manifest.pod_spec.containers.len(), 2);

        let images: Vec<_> = container_images(&manifest.pod_spec).collect();
        assert_eq!(images[0].0, "web");
        assert_eq!(images[0].1, ImageReference::new("host:5000/shop/web", "v1"));
        assert_eq!(images[1].1, ImageReference::new("envoy", "1.30"));
    }

    #[test]
    fn test_parse_statefulset_manifest() {
        let raw = manifest_json("StatefulSet", "db", &[("db", "postgres:16")]);
        let manifest = WorkloadManifest::parse(WorkloadKind::StatefulSet, &raw).unwrap();
        assert_eq!(manifest.resource_key(), "StatefulSet/db");
    }

    #[test]
    fn test_parse_rejects_malformed_manifest() {
        assert!(WorkloadManifest::parse(WorkloadKind::Deployment, "{not json").is_err());
    }

    #[test]
    fn test_workload_ref_from_api_version() {
        let raw = manifest_json("Deployment", "web", &[("web", "web:v1")]);
        let manifest = WorkloadManifest::parse(WorkloadKind::Deployment, &raw).unwrap();
        let workload = manifest.workload_ref();
        assert_eq!(workload.group, "apps");
        assert_eq!(workload.version, "v1");
        assert_eq!(workload.namespace, "shop");
        assert_eq!(workload.resource_key(), "Deployment/web");
    }

    #[test]
    fn test_workload_ref_defaults_group() {
        let workload = WorkloadRef::new(WorkloadKind::StatefulSet, "db", "shop", "", "v1");
        assert_eq!(workload.group, "apps");
    }

    #[test]
    fn test_workload_kind() {
        assert_eq!(WorkloadKind::from_kind("StatefulSet"), Some(WorkloadKind::StatefulSet));
        assert_eq!(WorkloadKind::from_kind("DaemonSet"), None);
        assert_eq!(resource_key(WorkloadKind::Deployment, "web"), "Deployment/web");
    }
}
