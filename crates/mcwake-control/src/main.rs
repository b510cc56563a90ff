use std::sync::Arc;

use anyhow::Context;
use mcwake_control::{
    api::{self, AppState},
    config::Config,
    control_plane::HttpControlPlane,
    controller::{ControllerSettings, LifecycleController},
    probe::ServerListPing,
    progress::{FanoutSink, ProgressSink, TracingSink, WebhookSink},
    sigv4::Credentials,
    state::SharedLifecycleState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        tracing::warn!("AWS credentials not set, control plane requests will be unsigned");
    }
    let control_plane = HttpControlPlane::new(&config.control_plane, credentials)?;

    let controller = LifecycleController::new(
        Arc::new(control_plane),
        Arc::new(ServerListPing),
        SharedLifecycleState::new(),
        ControllerSettings {
            poll: config.poll,
            watchdog: config.watchdog,
            probe: config.probe,
        },
    );

    let mut sink = FanoutSink::new().with(Arc::new(TracingSink));
    if let Some(url) = &config.webhook_url {
        sink = sink.with(Arc::new(WebhookSink::new(url.clone())?));
    }
    let sink: Arc<dyn ProgressSink> = Arc::new(sink);

    let state = AppState::new(controller.clone(), sink);
    let tasks = state.tasks.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("bind {}", config.listen_addr))?;
    tracing::info!(
        addr = %config.listen_addr,
        function = %config.control_plane.function_name,
        region = %config.control_plane.region,
        "mcwake-control listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    // In-flight operations and the watchdog stop at their next checkpoint.
    let watchdog = controller.shutdown().await;
    tasks.close();
    tasks.wait().await;
    tracing::info!(?watchdog, "gracefully shut down");

    Ok(())
}
