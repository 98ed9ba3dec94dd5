use crate::argocd::ApplicationApi;
use crate::error::ImageTagError;
use crate::history::HistoryIndex;
use crate::record::{ImageEntry, ImageRecord};
use crate::tag_history::TagHistory;
use crate::workload::{WorkloadManifest, WorkloadRef, container_images};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

/// Outcome of collecting every workload: the records that could be built and
/// the resources that failed.
#[derive(Debug, Default)]
pub struct Collection {
    pub records: IndexMap<String, ImageRecord>,
    pub failures: Vec<ImageTagError>,
}

/// Fetches the live manifest of each workload in turn and builds its record.
///
/// A failing workload is reported in [`Collection::failures`] and does not
/// affect the records of the others.
pub async fn collect<A: ApplicationApi>(
    api: &A,
    application: &str,
    workloads: &[WorkloadRef],
    history: &HistoryIndex,
) -> Collection {
    let mut collection = Collection::default();

    for workload in workloads {
        match collect_workload(api, application, workload, history).await {
            Ok(Some(record)) => {
                debug!(
                    "Collected {} images of {}",
                    record.images().len(),
                    record.resource
                );
                match collection.records.get_mut(&record.resource) {
                    Some(existing) => existing.merge(record),
                    None => {
                        collection.records.insert(record.resource.clone(), record);
                    }
                }
            }
            Ok(None) => debug!("{} has no container images", workload.resource_key()),
            Err(e) => {
                warn!("{}", e);
                collection.failures.push(e);
            }
        }
    }

    info!(
        "Collected {} image records, {} resources failed",
        collection.records.len(),
        collection.failures.len()
    );
    collection
}

async fn collect_workload<A: ApplicationApi>(
    api: &A,
    application: &str,
    workload: &WorkloadRef,
    history: &HistoryIndex,
) -> Result<Option<ImageRecord>, ImageTagError> {
    let manifest_fetch_error = |source: anyhow::Error| ImageTagError::ManifestFetch {
        resource: workload.resource_key(),
        source,
    };

    let raw = api
        .resource_manifest(application, workload)
        .await
        .map_err(manifest_fetch_error)?;
    let manifest = WorkloadManifest::parse(workload.kind, &raw)
        .map_err(|e| manifest_fetch_error(e.into()))?;

    Ok(build_record(&manifest, history))
}

/// Record of one manifest, or `None` when it runs no containers.
pub fn build_record(manifest: &WorkloadManifest, history: &HistoryIndex) -> Option<ImageRecord> {
    let key = manifest.resource_key();
    let mut record: Option<ImageRecord> = None;

    for (container_name, image) in container_images(&manifest.pod_spec) {
        let tags = TagHistory::seeded(&image.tag, history.tags(&key, &image.url));
        let entry = ImageEntry::new(container_name, image, tags);
        match record.as_mut() {
            Some(record) => {
                record.add_image(entry);
            }
            None => record = Some(ImageRecord::new(manifest, entry)),
        }
    }

    record
}
