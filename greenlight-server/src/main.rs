use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{Level, error, info, warn};

use greenlight_core::{ExemplarSink, QueuePublisher, ServiceNowClient, SlackClient};
use greenlight_server::batcher::{BatchProcessor, RequestBatcher};
use greenlight_server::config::Config;
use greenlight_server::ingress::QueueBatchProcessor;
use greenlight_server::interactive::manager::InteractiveStateManager;
use greenlight_server::interactive::repository::{
    InMemoryRepository, SqliteRepository, StateRepository,
};
use greenlight_server::supervisor::{LiveArtifactExecutor, SupervisorActions};
use greenlight_server::{AppState, create_router, get_service_version};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!(
        "Starting Greenlight approval service {}",
        get_service_version()
    );

    let config =
        Config::from_env().expect("Failed to load configuration from environment variables");

    let exemplar_sink = match &config.exemplar_log_path {
        Some(path) => match ExemplarSink::new(path.clone()) {
            Ok(sink) => {
                info!("Capturing decision exemplars to: {}", path.display());
                Some(sink)
            }
            Err(e) => {
                error!(
                    "Failed to open exemplar log {}: {}; capture disabled",
                    path.display(),
                    e
                );
                None
            }
        },
        None => None,
    };

    let repository: Arc<dyn StateRepository> = if config.state_db_in_memory {
        warn!("STATE_DB_IN_MEMORY is set; interactive states will not survive a restart");
        Arc::new(InMemoryRepository::new())
    } else {
        let db_path = config.state_dir.join("greenlight-state.db");
        info!("Using state database: {}", db_path.display());
        Arc::new(SqliteRepository::new(&db_path).expect("Failed to initialize state database"))
    };

    let manager = Arc::new(InteractiveStateManager::new(
        repository,
        exemplar_sink,
        config.state_expiry_hours,
    ));

    let slack = SlackClient::new(config.slack_bot_token.clone());
    let servicenow = ServiceNowClient::new(config.servicenow.clone());
    if servicenow.is_configured() {
        info!("ServiceNow work note delivery enabled");
    } else {
        info!("ServiceNow not configured; work note artifacts will be rejected at execution");
    }

    let executor = Arc::new(LiveArtifactExecutor::new(slack.clone(), servicenow));
    let actions = Arc::new(SupervisorActions::new(manager.clone(), executor));

    let publisher = QueuePublisher::new(config.queue_config());
    if !publisher.is_configured() {
        warn!("Queue publishing not configured; flushed approval batches will be dropped");
    }
    let publish_processor: Arc<dyn BatchProcessor> = Arc::new(QueueBatchProcessor::new(publisher));

    let app_state = Arc::new(AppState {
        manager: manager.clone(),
        actions,
        batcher: RequestBatcher::new(),
        publish_processor,
        slack,
        current_signing_key: config.current_signing_key.clone(),
        next_signing_key: config.next_signing_key.clone(),
        status_auth_token: config.status_auth_token.clone(),
    });

    // Sweep on startup, then hourly.
    let sweep_manager = manager.clone();
    tokio::spawn(async move {
        expiry_sweep_loop(sweep_manager).await;
    });

    let app = create_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn expiry_sweep_loop(manager: Arc<InteractiveStateManager>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60 * 60));
    loop {
        // The first tick fires immediately, covering the startup sweep.
        interval.tick().await;
        let removed = manager.cleanup_expired_states().await;
        if removed > 0 {
            info!("Expiry sweep removed {} interactive state(s)", removed);
        }
    }
}
