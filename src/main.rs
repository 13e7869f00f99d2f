//! Service bootstrap: configuration, adapters, engine, startup sweep, HTTP
//! server, and coordinated shutdown.

use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use rulekeeper::config::Config;
use rulekeeper::inbound::http::health::HealthState;
use rulekeeper::inbound::http::{HttpState, ListDefaults};
use rulekeeper::outbound::device_registry::HttpDeviceRegistry;
use rulekeeper::outbound::identity::HttpIdentityClient;
use rulekeeper::outbound::permissions::HttpPermissionsClient;
use rulekeeper::outbound::persistence::{PgPool, PgRuleStore, PoolConfig};
use rulekeeper::outbound::templates::{TemplateStore, DEFAULT_REFRESH_INTERVAL};
use rulekeeper::reconciler::{FatalHook, LockManager, RuleController, TableClassifier};
use rulekeeper::server::create_server;

use rulekeeper::domain::ports::RuleManager;

/// Grace period between a fatal shutdown request and the hard exit.
const FATAL_EXIT_GRACE: Duration = Duration::from_secs(25);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config_path = config_path_from_args();
    let config = Config::load(&config_path).map_err(std::io::Error::other)?;

    let default_filter = if config.debug { "debug" } else { "info" };
    if let Err(err) = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .json()
        .try_init()
    {
        eprintln!("tracing init failed: {err}");
    }
    info!(config = %config_path, "configuration loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The only deliberately fatal path: cancel everything and force-exit
    // if graceful shutdown stalls, so the orchestrator restarts cleanly.
    let fatal: FatalHook = {
        let shutdown_tx = shutdown_tx.clone();
        Arc::new(move |message: &str| {
            error!(message, "fatal shutdown requested");
            let _ = shutdown_tx.send(true);
            tokio::spawn(async {
                tokio::time::sleep(FATAL_EXIT_GRACE).await;
                error!("components did not shut down in time, failing hard");
                std::process::exit(1);
            });
        })
    };

    let statement_timeout = config.statement_timeout().map_err(std::io::Error::other)?;
    let slow_mux_lock = config.slow_mux_lock().map_err(std::io::Error::other)?;

    let pool = PgPool::connect(
        PoolConfig::new(
            &config.postgres_host,
            config.postgres_port,
            &config.postgres_user,
            &config.postgres_pw,
            &config.postgres_db,
        )
        .with_connection_timeout(statement_timeout),
    )
    .await
    .map_err(std::io::Error::other)?;
    let store = PgRuleStore::connect(
        pool,
        &config.postgres_rule_schema,
        &config.postgres_rule_table,
        statement_timeout,
    )
    .await
    .map_err(std::io::Error::other)?;

    let templates = TemplateStore::open(&config.template_dir).map_err(std::io::Error::other)?;
    templates.spawn_refresh(DEFAULT_REFRESH_INTERVAL, shutdown_rx.clone());

    let (identity, tokens) = HttpIdentityClient::new(
        &config.identity_url,
        &config.identity_client_id,
        &config.identity_client_secret,
    )
    .map_err(std::io::Error::other)?;
    let permissions = HttpPermissionsClient::new(&config.permissions_url, tokens.clone())
        .map_err(std::io::Error::other)?;
    let devices = HttpDeviceRegistry::new(&config.device_registry_url, tokens)
        .map_err(std::io::Error::other)?;

    let classifier = TableClassifier::new(
        Arc::new(permissions),
        Arc::new(identity),
        Arc::new(devices),
        config.device_id_prefix.as_str(),
        config.service_id_prefix.as_str(),
        config.default_timezone.as_str(),
    );
    let locks = LockManager::new(store.clone(), config.postgres_lock_key, slow_mux_lock, fatal);
    let controller = RuleController::new(store, classifier, templates.clone(), locks);

    if config.apply_rules_at_startup {
        info!("applying all rules at startup");
        controller
            .apply_all_rules()
            .await
            .map_err(std::io::Error::other)?;
    }

    if !config.topic_table_updates.is_empty() || !config.topic_permission_updates.is_empty() {
        // The bus consumer framework is deployed alongside this service;
        // it delivers decoded messages through the ChangeFeed port of
        // rulekeeper::inbound::events.
        warn!(
            table_topic = %config.topic_table_updates,
            permission_topic = %config.topic_permission_updates,
            "change-feed topics configured; attach the consumer framework to the event dispatcher"
        );
    }

    let http_state = HttpState::new(
        Arc::new(controller),
        templates,
        ListDefaults {
            limit: config.default_list_limit,
            offset: config.default_list_offset,
        },
    );
    let health_state = web::Data::new(HealthState::new());
    let server = create_server(http_state, health_state.clone(), config.api_port)?;
    let server_handle = server.handle();
    health_state.mark_ready();
    info!(port = config.api_port, "http server listening");

    spawn_signal_listener(shutdown_tx);

    let mut shutdown = shutdown_rx;
    tokio::select! {
        result = server => result?,
        _ = shutdown.changed() => {
            info!("shutting down http server");
            server_handle.stop(true).await;
        }
    }
    info!("shutdown complete");
    Ok(())
}

fn config_path_from_args() -> String {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return path;
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return path.to_string();
        }
    }
    "config.json".to_string()
}

fn spawn_signal_listener(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(err) => {
                        error!(error = %err, "could not install SIGTERM handler");
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("received interrupt signal"),
                _ = sigterm.recv() => info!("received terminate signal"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received interrupt signal");
        }
        let _ = shutdown_tx.send(true);
    });
}
