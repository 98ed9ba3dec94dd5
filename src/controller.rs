use crate::argocd::ApplicationApi;
use crate::collector;
use crate::error::ImageTagError;
use crate::history::HistoryIndex;
use crate::store::{ResourceFailure, SharedStore};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub generation: u64,
    pub records: usize,
    pub failures: Vec<ResourceFailure>,
    /// A newer refresh published before this one finished, so its records were dropped.
    pub discarded: bool,
}

/// Rebuilds every image record of `application` from its last sync result and
/// the current live manifests.
///
/// Only a failure to read the application itself fails the refresh; failures
/// of single resources are reported alongside the records that were built.
pub async fn refresh<A: ApplicationApi>(
    api: &A,
    application: &str,
    store: &SharedStore,
) -> Result<RefreshReport, ImageTagError> {
    let ticket = store.write().begin_refresh();
    info!(
        "Refreshing image records of application {} (refresh {})",
        application,
        ticket.generation()
    );

    let app = api
        .application(application)
        .await
        .map_err(|source| ImageTagError::ApplicationFetch {
            application: application.to_string(),
            source,
        })?;

    let (history, mut failures) = HistoryIndex::extract(app.synced_resources());
    let workloads = app.workloads();
    info!("Collecting images of {} workloads", workloads.len());

    let collection = collector::collect(api, application, &workloads, &history).await;
    failures.extend(collection.failures);

    let records = collection.records.len();
    let applied = store
        .write()
        .complete_refresh(ticket, collection.records, &failures);
    if !applied {
        warn!(
            "Dropping results of refresh {}, a newer refresh has already published",
            ticket.generation()
        );
    }

    Ok(RefreshReport {
        generation: ticket.generation(),
        records,
        failures: failures.iter().map(ResourceFailure::from).collect(),
        discarded: !applied,
    })
}
