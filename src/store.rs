use crate::error::ImageTagError;
use crate::record::ImageRecord;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use k8s_openapi::api::core::v1::PodSpec;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

pub type SharedStore = Arc<RwLock<ImageRecordStore>>;

/// Image records of the application, keyed by resource key in application order.
#[derive(Debug, Default)]
pub struct ImageRecordStore {
    records: IndexMap<String, ImageRecord>,
    /// Running updates per resource key.
    in_flight: HashMap<String, usize>,
    /// Generation of the most recently started refresh.
    generation: u64,
    status: RefreshStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshStatus {
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub failures: Vec<ResourceFailure>,
}

/// A failure of one refresh, kept for the panel to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceFailure {
    pub resource: Option<String>,
    pub message: String,
}

impl From<&ImageTagError> for ResourceFailure {
    fn from(e: &ImageTagError) -> Self {
        Self {
            resource: e.resource().map(ToString::to_string),
            message: e.to_string(),
        }
    }
}

/// Handed out when a refresh starts; a ticket older than the last published
/// one may not publish records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket(u64);

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

impl ImageRecordStore {
    pub fn shared() -> SharedStore {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.generation += 1;
        RefreshTicket(self.generation)
    }

    /// Replaces every record with the result of a refresh.
    ///
    /// Returns `false` and leaves the store untouched when a refresh started
    /// after `ticket` was taken has already published. A newer refresh that
    /// is still running or has failed does not hold this one back.
    pub fn complete_refresh(
        &mut self,
        ticket: RefreshTicket,
        records: IndexMap<String, ImageRecord>,
        failures: &[ImageTagError],
    ) -> bool {
        if ticket.0 <= self.status.generation {
            debug!(
                "Discarding results of refresh {}, refresh {} already published",
                ticket.0, self.status.generation
            );
            return false;
        }
        self.records = records;
        self.status = RefreshStatus {
            generation: ticket.0,
            refreshed_at: Some(Utc::now()),
            failures: failures.iter().map(ResourceFailure::from).collect(),
        };
        true
    }

    pub fn status(&self) -> &RefreshStatus {
        &self.status
    }

    pub fn get(&self, key: &str) -> Option<&ImageRecord> {
        self.records.get(key)
    }

    /// Records whose resource key contains `text`, ignoring case.
    pub fn search<'a>(&'a self, text: &str) -> impl Iterator<Item = &'a ImageRecord> + use<'a> {
        let needle = text.to_lowercase();
        self.records
            .values()
            .filter(move |record| record.resource.to_lowercase().contains(&needle))
    }

    fn record_mut(&mut self, key: &str) -> Result<&mut ImageRecord, ImageTagError> {
        self.records
            .get_mut(key)
            .ok_or_else(|| ImageTagError::UnknownResource(key.to_string()))
    }

    pub fn select_image(
        &mut self,
        key: &str,
        image_url: &str,
    ) -> Result<&ImageRecord, ImageTagError> {
        let record = self.record_mut(key)?;
        record.select_image(image_url)?;
        Ok(&*record)
    }

    pub fn set_new_tag(&mut self, key: &str, tag: &str) -> Result<&ImageRecord, ImageTagError> {
        let record = self.record_mut(key)?;
        record.new_tag = tag.to_string();
        Ok(&*record)
    }

    /// Folds a successfully patched tag into the record of `key`.
    ///
    /// Returns `false` when the record or image is gone, e.g. after a refresh.
    pub fn apply_tag(
        &mut self,
        key: &str,
        image_url: &str,
        new_tag: &str,
        pod_spec: PodSpec,
    ) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            return false;
        };
        let Some(image) = record.image_mut(image_url) else {
            return false;
        };
        image.apply_tag(new_tag);
        record.new_tag = new_tag.to_string();
        record.pod_spec = pod_spec;
        true
    }

    pub fn is_updating(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }
}

/// Marks a resource as being updated for as long as the guard lives.
///
/// Advisory only: several guards may exist for one resource at a time, and
/// the flag clears once the last of them is dropped.
pub struct InFlightGuard {
    store: SharedStore,
    key: String,
}

impl InFlightGuard {
    pub fn begin(store: &SharedStore, key: &str) -> Self {
        *store.write().in_flight.entry(key.to_string()).or_insert(0) += 1;
        Self {
            store: store.clone(),
            key: key.to_string(),
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut store = self.store.write();
        if let Entry::Occupied(mut running) = store.in_flight.entry(self.key.clone()) {
            *running.get_mut() -= 1;
            if *running.get() == 0 {
                running.remove();
            }
        }
    }
}
