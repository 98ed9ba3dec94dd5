use crate::argocd::ArgoCdClient;
use crate::store::SharedStore;
use std::sync::Arc;

/// State shared by the web handlers and the refresh job.
#[derive(Clone)]
pub struct AppContext {
    pub(crate) api: Arc<ArgoCdClient>,
    pub(crate) application: String,
    pub(crate) store: SharedStore,
}
