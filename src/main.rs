use crate::state::AppContext;
use crate::store::ImageRecordStore;
use std::env;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod argocd;
mod collector;
mod config;
mod controller;
mod error;
mod history;
mod image_reference;
mod record;
mod rollout;
mod state;
mod store;
mod tag_history;
mod token;
mod webserver;
mod workload;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("Starting argocd-image-tags {}", env!("CARGO_PKG_VERSION"));

    let config_path =
        env::var("CONFIG_PATH").unwrap_or_else(|_| "/config/config.yaml".to_string());
    let config = config::load_config(&config_path)?;

    let ctx = AppContext {
        api: Arc::new(argocd::create_client(&config)?),
        application: config.argocd.application.clone(),
        store: ImageRecordStore::shared(),
    };

    match controller::refresh(ctx.api.as_ref(), &ctx.application, &ctx.store).await {
        Ok(report) => info!(
            "Initial refresh built {} image records, {} resources failed",
            report.records,
            report.failures.len()
        ),
        Err(e) => warn!("Initial refresh failed: {}", e),
    }

    let shutdown = CancellationToken::new();

    let mut scheduler = JobScheduler::new().await?;
    if let Some(cron_schedule) = &config.refresh_schedule {
        info!("Refreshing image records at cron schedule {}", cron_schedule);
        let job_ctx = ctx.clone();
        let job = Job::new_async(cron_schedule.clone(), move |_uuid, _l| {
            let ctx = job_ctx.clone();
            Box::pin(async move {
                if let Err(e) =
                    controller::refresh(ctx.api.as_ref(), &ctx.application, &ctx.store).await
                {
                    error!("Error running scheduled refresh: {}", e);
                }
            })
        })?;
        scheduler.add(job).await?;
    }
    scheduler.start().await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let app = webserver::create_app(ctx);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.webserver.port));
    info!("Starting webserver on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    scheduler.shutdown().await?;
    info!("Stopped");

    Ok(())
}
