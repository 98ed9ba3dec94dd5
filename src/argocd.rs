use crate::config::Config;
use crate::token::ApiToken;
use crate::workload::{WorkloadKind, WorkloadRef};
use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::{Certificate, Client, RequestBuilder, Response};
use serde::Deserialize;
use std::fs;
use tracing::{debug, info};

static MERGE_PATCH_TYPE: &str = "application/merge-patch+json";

/// The Argo CD operations the image records are built and updated with.
pub trait ApplicationApi {
    async fn application(&self, name: &str) -> Result<Application>;

    /// Current live manifest of a workload, as a serialized JSON document.
    async fn resource_manifest(&self, app: &str, workload: &WorkloadRef) -> Result<String>;

    async fn patch_resource(
        &self,
        app: &str,
        workload: &WorkloadRef,
        patch: &serde_json::Value,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub resources: Vec<ResourceStatus>,
    #[serde(default)]
    pub operation_state: Option<OperationState>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationState {
    #[serde(default)]
    pub sync_result: Option<SyncOperationResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncOperationResult {
    #[serde(default)]
    pub resources: Vec<ResourceResult>,
}

/// A resource tracked by the application.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResourceStatus {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// A resource touched by the last sync, with the live state it was recorded in.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceResult {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub live_state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceManifest {
    manifest: String,
}

impl Application {
    /// Deployments and StatefulSets tracked by the application, in its order.
    pub fn workloads(&self) -> Vec<WorkloadRef> {
        self.status
            .resources
            .iter()
            .filter_map(|resource| {
                let kind = WorkloadKind::from_kind(&resource.kind)?;
                Some(WorkloadRef::new(
                    kind,
                    &resource.name,
                    &resource.namespace,
                    &resource.group,
                    &resource.version,
                ))
            })
            .collect()
    }

    pub fn synced_resources(&self) -> &[ResourceResult] {
        self.status
            .operation_state
            .as_ref()
            .and_then(|op| op.sync_result.as_ref())
            .map(|result| result.resources.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ArgoCdClient {
    http_client: Client,
    server: String,
    token: ApiToken,
    app_namespace: String,
}

pub fn create_client(config: &Config) -> Result<ArgoCdClient> {
    info!("Initializing Argo CD HTTP client for {}", config.argocd.server);
    // System certificates are loaded automatically with rustls-tls-native-roots
    let mut client_builder = Client::builder();

    for file_path in &config.tls.ca_certificate_paths {
        let file_content = fs::read(file_path)
            .with_context(|| format!("Failed to read file {}", file_path.display()))?;
        let cert = Certificate::from_pem(&file_content).context("Failed to parse certificate")?;
        client_builder = client_builder.add_root_certificate(cert);
    }

    let http_client = client_builder
        .build()
        .context("Failed to build HTTP client")?;

    Ok(ArgoCdClient {
        http_client,
        server: config.argocd.server.trim_end_matches('/').to_string(),
        token: config.argocd.token.clone(),
        app_namespace: config.argocd.app_namespace.clone(),
    })
}

impl ArgoCdClient {
    fn resource_url(&self, app: &str) -> String {
        format!("{}/api/v1/applications/{}/resource", self.server, app)
    }

    fn resource_query<'a>(&'a self, workload: &'a WorkloadRef) -> [(&'static str, &'a str); 7] {
        [
            ("name", workload.name.as_str()),
            ("appNamespace", self.app_namespace.as_str()),
            ("namespace", workload.namespace.as_str()),
            ("resourceName", workload.name.as_str()),
            ("version", workload.version.as_str()),
            ("kind", workload.kind.as_str()),
            ("group", workload.group.as_str()),
        ]
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request
            .header(AUTHORIZATION, self.token.bearer_header()?)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", what))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Argo CD returned error status {} while trying to {}",
                response.status(),
                what
            );
        }
        Ok(response)
    }
}

impl ApplicationApi for ArgoCdClient {
    async fn application(&self, name: &str) -> Result<Application> {
        let url = format!("{}/api/v1/applications/{}", self.server, name);
        info!("Fetching application {} from URL {}", name, url);
        let request = self
            .http_client
            .get(&url)
            .query(&[("appNamespace", self.app_namespace.as_str())]);

        self.send(request, "fetch the application")
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to decode application {}", name))
    }

    async fn resource_manifest(&self, app: &str, workload: &WorkloadRef) -> Result<String> {
        debug!("Fetching manifest of {}", workload.resource_key());
        let request = self
            .http_client
            .get(self.resource_url(app))
            .query(&self.resource_query(workload));

        let body: ResourceManifest = self
            .send(request, "fetch the resource manifest")
            .await?
            .json()
            .await
            .with_context(|| format!("Failed to decode manifest of {}", workload.resource_key()))?;
        Ok(body.manifest)
    }

    async fn patch_resource(
        &self,
        app: &str,
        workload: &WorkloadRef,
        patch: &serde_json::Value,
    ) -> Result<()> {
        // The endpoint takes the patch document as a JSON string.
        let body = serde_json::to_string(patch).context("Failed to serialize patch")?;
        let request = self
            .http_client
            .post(self.resource_url(app))
            .query(&self.resource_query(workload))
            .query(&[("patchType", MERGE_PATCH_TYPE)])
            .json(&body);

        self.send(request, "patch the resource").await?;
        Ok(())
    }
}
