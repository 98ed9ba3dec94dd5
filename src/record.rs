use crate::error::ImageTagError;
use crate::image_reference::ImageReference;
use crate::tag_history::TagHistory;
use crate::workload::{WorkloadKind, WorkloadManifest, WorkloadRef};
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

/// One distinct image configured in a workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageEntry {
    pub image_url: String,
    pub image_tag: String,
    pub container_name: String,
    pub history: TagHistory,
}

/// Images of one workload together with the operator's pending edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub resource: String,
    images: Vec<ImageEntry>,
    selected_image: String,
    pub new_tag: String,
    pub metadata: ObjectMeta,
    pub api_version: String,
    pub kind: WorkloadKind,
    #[serde(skip)]
    pub workload: WorkloadRef,
    #[serde(skip)]
    pub pod_spec: PodSpec,
}

impl ImageEntry {
    pub fn new(container_name: &str, image: ImageReference, history: TagHistory) -> Self {
        Self {
            image_url: image.url,
            image_tag: image.tag,
            container_name: container_name.to_string(),
            history,
        }
    }

    /// Folds a successfully applied tag into the entry.
    pub fn apply_tag(&mut self, new_tag: &str) {
        self.history = self.history.after_update(new_tag, &self.image_tag);
        self.image_tag = new_tag.to_string();
    }
}

impl ImageRecord {
    /// Starts a record from its first image, which becomes the selected one.
    pub fn new(manifest: &WorkloadManifest, first: ImageEntry) -> Self {
        Self {
            resource: manifest.resource_key(),
            selected_image: first.image_url.clone(),
            new_tag: first.image_tag.clone(),
            images: vec![first],
            metadata: manifest.metadata.clone(),
            api_version: manifest.api_version.clone(),
            kind: manifest.kind,
            workload: manifest.workload_ref(),
            pod_spec: manifest.pod_spec.clone(),
        }
    }

    /// Adds an image unless one with the same url is already present.
    pub fn add_image(&mut self, entry: ImageEntry) -> bool {
        if self.image(&entry.image_url).is_some() {
            return false;
        }
        self.images.push(entry);
        true
    }

    pub fn images(&self) -> &[ImageEntry] {
        &self.images
    }

    pub fn image(&self, image_url: &str) -> Option<&ImageEntry> {
        self.images.iter().find(|image| image.image_url == image_url)
    }

    pub fn image_mut(&mut self, image_url: &str) -> Option<&mut ImageEntry> {
        self.images
            .iter_mut()
            .find(|image| image.image_url == image_url)
    }

    pub fn selected_image(&self) -> &str {
        &self.selected_image
    }

    pub fn selected_entry(&self) -> Option<&ImageEntry> {
        self.image(&self.selected_image)
    }

    /// Switches the edited image; the pending tag resets to that image's tag.
    pub fn select_image(&mut self, image_url: &str) -> Result<(), ImageTagError> {
        let tag = self
            .image(image_url)
            .map(|image| image.image_tag.clone())
            .ok_or_else(|| ImageTagError::UnknownImage {
                resource: self.resource.clone(),
                image: image_url.to_string(),
            })?;
        self.selected_image = image_url.to_string();
        self.new_tag = tag;
        Ok(())
    }

    /// Tags to offer for the selected image: the pending tag, then its history.
    pub fn tag_options(&self) -> Vec<String> {
        let history = self
            .selected_entry()
            .map(|image| image.history.iter())
            .into_iter()
            .flatten();
        let mut options: Vec<String> = Vec::new();
        for tag in std::iter::once(self.new_tag.as_str()).chain(history) {
            if !tag.is_empty() && !options.iter().any(|option| option == tag) {
                options.push(tag.to_string());
            }
        }
        options
    }

    /// Takes another container's images of the same resource, first url wins.
    pub fn merge(&mut self, other: ImageRecord) {
        for entry in other.images {
            self.add_image(entry);
        }
    }
}
