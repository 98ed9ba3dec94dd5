#[derive(Debug, thiserror::Error)]
pub enum ImageTagError {
    #[error("Failed to fetch application {application}: {source:#}")]
    ApplicationFetch {
        application: String,
        source: anyhow::Error,
    },
    #[error("Failed to fetch manifest of {resource}: {source:#}")]
    ManifestFetch {
        resource: String,
        source: anyhow::Error,
    },
    #[error("Failed to parse recorded live state of {resource}: {source}")]
    HistorySnapshotParse {
        resource: String,
        source: serde_json::Error,
    },
    #[error("Failed to update image tag of {resource}: {source:#}")]
    PatchSubmission {
        resource: String,
        source: anyhow::Error,
    },
    #[error("Unknown resource {0}")]
    UnknownResource(String),
    #[error("Resource {resource} has no image {image}")]
    UnknownImage { resource: String, image: String },
    #[error("No tag given for image {image} of {resource}")]
    EmptyTag { resource: String, image: String },
}

impl ImageTagError {
    /// Resource the error is about, if any.
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::ApplicationFetch { .. } => None,
            Self::ManifestFetch { resource, .. }
            | Self::HistorySnapshotParse { resource, .. }
            | Self::PatchSubmission { resource, .. }
            | Self::UnknownImage { resource, .. }
            | Self::EmptyTag { resource, .. } => Some(resource),
            Self::UnknownResource(resource) => Some(resource),
        }
    }
}
