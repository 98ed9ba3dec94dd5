use crate::argocd::ApplicationApi;
use crate::error::ImageTagError;
use crate::image_reference::ImageReference;
use crate::record::ImageRecord;
use crate::store::{InFlightGuard, SharedStore};
use k8s_openapi::api::core::v1::PodSpec;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use tracing::{debug, info, warn};

/// A tag change the operator asked for on one image of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTarget {
    pub resource: String,
    pub image_url: String,
    pub new_tag: String,
}

impl UpdateTarget {
    /// The record's pending edit: its selected image and new tag.
    pub fn from_record(record: &ImageRecord) -> Result<Self, ImageTagError> {
        let image_url = record.selected_image();
        if record.image(image_url).is_none() {
            return Err(ImageTagError::UnknownImage {
                resource: record.resource.clone(),
                image: image_url.to_string(),
            });
        }
        let new_tag = record.new_tag.trim();
        if new_tag.is_empty() {
            return Err(ImageTagError::EmptyTag {
                resource: record.resource.clone(),
                image: image_url.to_string(),
            });
        }
        Ok(Self {
            resource: record.resource.clone(),
            image_url: image_url.to_string(),
            new_tag: new_tag.to_string(),
        })
    }

    fn image(&self) -> ImageReference {
        ImageReference::new(self.image_url.clone(), self.new_tag.clone())
    }
}

/// Confirmation prompt shown before the update is submitted.
impl fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Update {} to tag {}?", self.image_url, self.new_tag)
    }
}

/// Copy of `pod_spec` with every container running `target`'s image moved to its new tag.
pub fn retag_containers(pod_spec: &PodSpec, target: &UpdateTarget) -> PodSpec {
    let mut updated = pod_spec.clone();
    let image = target.image().to_string();
    for container in &mut updated.containers {
        let matches = container
            .image
            .as_deref()
            .is_some_and(|current| ImageReference::parse(current).url == target.image_url);
        if matches {
            container.image = Some(image.clone());
        }
    }
    updated
}

/// Merge patch replacing the pod template spec of a workload.
pub fn pod_spec_patch(pod_spec: &PodSpec) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "spec": pod_spec
            }
        }
    })
}

/// Applies the pending tag edit of the record at `key`.
///
/// The resource is flagged as updating until this returns. On success the new
/// tag is folded into the record's history; on failure the record is left as
/// it was.
pub async fn update_image_tag<A: ApplicationApi>(
    api: &A,
    application: &str,
    store: &SharedStore,
    key: &str,
) -> Result<UpdateTarget, ImageTagError> {
    let record = store
        .read()
        .get(key)
        .cloned()
        .ok_or_else(|| ImageTagError::UnknownResource(key.to_string()))?;
    let target = UpdateTarget::from_record(&record)?;

    let _in_flight = InFlightGuard::begin(store, key);

    let pod_spec = retag_containers(&record.pod_spec, &target);
    let patch = pod_spec_patch(&pod_spec);
    info!(
        "Updating image {} of {} to tag {}",
        target.image_url, key, target.new_tag
    );
    debug!("Patching {} with patch {}", key, patch);

    if let Err(source) = api
        .patch_resource(application, &record.workload, &patch)
        .await
    {
        let e = ImageTagError::PatchSubmission {
            resource: key.to_string(),
            source,
        };
        warn!("{}", e);
        return Err(e);
    }

    let applied = store
        .write()
        .apply_tag(key, &target.image_url, &target.new_tag, pod_spec);
    if applied {
        info!("Successfully updated {} to {}", key, target.image());
    } else {
        warn!(
            "Updated {} to {}, but its record was replaced by a refresh in the meantime",
            key,
            target.image()
        );
    }

    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::FakeApi;
    use crate::record::tests::record;
    use crate::store::ImageRecordStore;
    use crate::argocd::Application;
    use crate::tag_history::TagHistory;
    use crate::workload::WorkloadRef;
    use anyhow::anyhow;
    use indexmap::IndexMap;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn store_with(items: Vec<ImageRecord>) -> SharedStore {
        let store = ImageRecordStore::shared();
        let records: IndexMap<_, _> = items
            .into_iter()
            .map(|record| (record.resource.clone(), record))
            .collect();
        let ticket = store.write().begin_refresh();
        store.write().complete_refresh(ticket, records, &[]);
        store
    }

    /// Notes whether the resource is flagged as updating while its patch is sent.
    struct WatchingApi {
        store: SharedStore,
        seen: Mutex<Option<bool>>,
        hang: bool,
    }

    impl WatchingApi {
        fn new(store: &SharedStore, hang: bool) -> Self {
            Self {
                store: store.clone(),
                seen: Mutex::new(None),
                hang,
            }
        }
    }

    impl ApplicationApi for WatchingApi {
        async fn application(&self, _name: &str) -> anyhow::Result<Application> {
            Err(anyhow!("not served"))
        }

        async fn resource_manifest(
            &self,
            _app: &str,
            _workload: &WorkloadRef,
        ) -> anyhow::Result<String> {
            Err(anyhow!("not served"))
        }

        async fn patch_resource(
            &self,
            _app: &str,
            workload: &WorkloadRef,
            _patch: &serde_json::Value,
        ) -> anyhow::Result<()> {
            let updating = self.store.read().is_updating(&workload.resource_key());
            *self.seen.lock() = Some(updating);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn container_images(patch: &serde_json::Value) -> Vec<String> {
        patch["spec"]["template"]["spec"]["containers"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["image"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_confirmation_message() {
        let mut web = record("web", &[("web", "host:5000/shop/web:v1")]);
        web.new_tag = "v2".to_string();
        let target = UpdateTarget::from_record(&web).unwrap();
        assert_eq!(target.to_string(), "Update host:5000/shop/web to tag v2?");
    }

    #[test]
    fn test_retag_only_matching_image() {
        let mut web = record(
            "web",
            &[
                ("web", "host:5000/shop/web:v1"),
                ("migrate", "host:5000/shop/web:v0"),
                ("sidecar", "host:5000/shop/web-sidecar:v1"),
            ],
        );
        web.new_tag = "v2".to_string();
        let target = UpdateTarget::from_record(&web).unwrap();

        let patch = pod_spec_patch(&retag_containers(&web.pod_spec, &target));

        assert_eq!(
            container_images(&patch),
            [
                "host:5000/shop/web:v2",
                "host:5000/shop/web:v2",
                "host:5000/shop/web-sidecar:v1"
            ]
        );
        assert_eq!(
            web.pod_spec.containers[0].image.as_deref(),
            Some("host:5000/shop/web:v1")
        );
    }

    #[tokio::test]
    async fn test_update_success_mutates_one_entry() {
        let mut web = record("web", &[("web", "web:v1"), ("proxy", "envoy:1.30")]);
        web.image_mut("web").unwrap().history = TagHistory::seeded("v1", ["v0"]);
        web.new_tag = "v2".to_string();
        let worker = record("worker", &[("worker", "worker:v1")]);
        let store = store_with(vec![web.clone(), worker.clone()]);
        let api = FakeApi::default();

        let target = update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();
        assert_eq!(target.new_tag, "v2");

        let store = store.read();
        let updated = store.get("Deployment/web").unwrap();
        let image = updated.image("web").unwrap();
        assert_eq!(image.image_tag, "v2");
        assert_eq!(image.history.iter().collect::<Vec<_>>(), ["v2", "v1", "v0"]);
        assert_eq!(updated.new_tag, "v2");
        assert_eq!(updated.image("envoy"), web.image("envoy"));
        assert_eq!(store.get("Deployment/worker"), Some(&worker));
        assert!(!store.is_updating("Deployment/web"));

        let patches = api.patches.lock();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].0, "Deployment/web");
        assert_eq!(container_images(&patches[0].1), ["web:v2", "envoy:1.30"]);
    }

    #[tokio::test]
    async fn test_update_failure_leaves_record_unchanged() {
        let mut web = record("web", &[("web", "web:v1")]);
        web.new_tag = "v2".to_string();
        let store = store_with(vec![web.clone()]);
        let api = FakeApi {
            fail_patches: true,
            ..Default::default()
        };

        let err = update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap_err();

        assert!(matches!(err, ImageTagError::PatchSubmission { .. }));
        let store = store.read();
        assert_eq!(store.get("Deployment/web"), Some(&web));
        assert!(!store.is_updating("Deployment/web"));
    }

    #[tokio::test]
    async fn test_update_rejects_empty_tag() {
        let mut web = record("web", &[("web", "web:v1")]);
        web.new_tag = "  ".to_string();
        let store = store_with(vec![web]);
        let api = FakeApi::default();

        let err = update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap_err();

        assert!(matches!(err, ImageTagError::EmptyTag { .. }));
        assert!(api.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_update_unknown_resource() {
        let store = ImageRecordStore::shared();
        let err = update_image_tag(&FakeApi::default(), "shop", &store, "Deployment/web")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageTagError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_update_same_tag_twice_keeps_history() {
        let mut web = record("web", &[("web", "web:v1")]);
        web.new_tag = "v2".to_string();
        let store = store_with(vec![web]);
        let api = FakeApi::default();

        update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();
        update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();

        let store = store.read();
        let image = store.get("Deployment/web").unwrap().image("web").unwrap();
        assert_eq!(image.history.iter().collect::<Vec<_>>(), ["v2", "v1"]);
    }

    #[tokio::test]
    async fn test_shared_image_histories_are_independent() {
        let mut web = record("web", &[("web", "shop/app:v1")]);
        web.new_tag = "v2".to_string();
        let worker = record("worker", &[("worker", "shop/app:v1")]);
        let store = store_with(vec![web, worker]);

        update_image_tag(&FakeApi::default(), "shop", &store, "Deployment/web")
            .await
            .unwrap();

        let store = store.read();
        let web = store.get("Deployment/web").unwrap().image("shop/app").unwrap();
        let worker = store.get("Deployment/worker").unwrap().image("shop/app").unwrap();
        assert_eq!(web.history.iter().collect::<Vec<_>>(), ["v2", "v1"]);
        assert_eq!(worker.history.iter().collect::<Vec<_>>(), ["v1"]);
        assert_eq!(worker.image_tag, "v1");
    }

    #[tokio::test]
    async fn test_second_image_update_keeps_first() {
        let mut web = record("web", &[("web", "web:v1"), ("proxy", "envoy:1.30")]);
        web.new_tag = "v2".to_string();
        let store = store_with(vec![web]);
        let api = FakeApi::default();

        update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();
        store
            .write()
            .select_image("Deployment/web", "envoy")
            .unwrap();
        store
            .write()
            .set_new_tag("Deployment/web", "1.31")
            .unwrap();
        update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();

        let patches = api.patches.lock();
        assert_eq!(container_images(&patches[1].1), ["web:v2", "envoy:1.31"]);
    }

    #[tokio::test]
    async fn test_resource_flagged_while_patch_is_sent() {
        let mut web = record("web", &[("web", "web:v1")]);
        web.new_tag = "v2".to_string();
        let store = store_with(vec![web]);
        let api = WatchingApi::new(&store, false);

        update_image_tag(&api, "shop", &store, "Deployment/web")
            .await
            .unwrap();

        assert_eq!(*api.seen.lock(), Some(true));
        assert!(!store.read().is_updating("Deployment/web"));
    }

    #[tokio::test]
    async fn test_cancelled_update_clears_flag() {
        let mut web = record("web", &[("web", "web:v1")]);
        web.new_tag = "v2".to_string();
        let store = store_with(vec![web.clone()]);
        let api = WatchingApi::new(&store, true);

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            update_image_tag(&api, "shop", &store, "Deployment/web"),
        )
        .await;

        assert!(outcome.is_err());
        assert_eq!(*api.seen.lock(), Some(true));
        let store = store.read();
        assert!(!store.is_updating("Deployment/web"));
        assert_eq!(store.get("Deployment/web"), Some(&web));
    }
}
