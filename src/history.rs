use crate::argocd::ResourceResult;
use crate::error::ImageTagError;
use crate::image_reference::ImageReference;
use crate::workload::{WorkloadKind, WorkloadManifest, container_images, resource_key};
use indexmap::IndexSet;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Tags each image ran with in the live states recorded by the last sync,
/// keyed by resource key, then image url.
#[derive(Debug, Default)]
pub struct HistoryIndex {
    by_resource: HashMap<String, HashMap<String, IndexSet<String>>>,
}

impl HistoryIndex {
    /// Builds the index from the resources of the last sync result.
    ///
    /// A live state that fails to parse is skipped and reported; it never
    /// stops the other resources from being indexed.
    pub fn extract(resources: &[ResourceResult]) -> (Self, Vec<ImageTagError>) {
        let mut index = Self::default();
        let mut failures = Vec::new();

        for resource in resources {
            let Some(kind) = WorkloadKind::from_kind(&resource.kind) else {
                continue;
            };
            let Some(live_state) = resource.live_state.as_deref() else {
                continue;
            };
            let key = resource_key(kind, &resource.name);

            match WorkloadManifest::parse(kind, live_state) {
                Ok(manifest) => {
                    for (_, image) in container_images(&manifest.pod_spec) {
                        index.record(&key, &image);
                    }
                }
                Err(source) => {
                    warn!("Skipping recorded live state of {}: {}", key, source);
                    failures.push(ImageTagError::HistorySnapshotParse {
                        resource: key,
                        source,
                    });
                }
            }
        }

        debug!("Indexed tag history of {} resources", index.by_resource.len());
        (index, failures)
    }

    fn record(&mut self, resource: &str, image: &ImageReference) {
        if !image.has_tag() {
            return;
        }
        self.by_resource
            .entry(resource.to_string())
            .or_default()
            .entry(image.url.clone())
            .or_default()
            .insert(image.tag.clone());
    }

    /// Recorded tags for one image of one resource, in the order they were seen.
    pub fn tags(&self, resource: &str, image_url: &str) -> impl Iterator<Item = &str> {
        self.by_resource
            .get(resource)
            .and_then(|images| images.get(image_url))
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}
