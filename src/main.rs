//! iddecorator - Kubernetes mutating admission webhook
//!
//! Decorates admitted objects with the submitter's username at the
//! locations configured per resource kind. Serves the mutation endpoint
//! over TLS and the admin/health/metrics surface on a separate plain port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use iddecorator::config::Config;
use iddecorator::health::{self, AdminState, HealthRegistry, Probe, TcpCheck};
use iddecorator::metrics::WebhookMetrics;
use iddecorator::webhook::{webhook_router, WebhookState};
use iddecorator::USER_ANNOTATION;

const KUBERNETES_SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
const KUBERNETES_SERVICE_PORT: &str = "KUBERNETES_SERVICE_PORT";

/// The liveness prober dials the API server at this cadence
const LIVENESS_INTERVAL: Duration = Duration::from_secs(10);
/// Restart the container if it cannot reach the API server within this timeout
const LIVENESS_DIAL_TIMEOUT: Duration = Duration::from_millis(500);
/// Stop sending traffic to the container on a slower, per-request dial
const READINESS_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Webhook server parameters
#[derive(Parser, Debug)]
#[command(name = "iddecorator", version, about = "Mutating admission webhook that annotates admitted objects with the submitter's username", long_about = None)]
struct Cli {
    /// Webhook server port
    #[arg(long, default_value_t = 443)]
    port: u16,

    /// YAML config with paths to decorate
    #[arg(long = "paths-to-decorate", default_value = "/etc/config/paths.yaml")]
    paths_to_decorate: PathBuf,

    /// Annotation key written at each discovered path
    #[arg(long = "username-annotation-key", default_value = USER_ANNOTATION)]
    username_annotation_key: String,

    /// Metrics endpoint for the webhook
    #[arg(long = "metrics-endpoint", default_value = "/metrics")]
    metrics_endpoint: String,

    /// Health-check port for the webhook
    #[arg(long = "healthcheck-port", default_value_t = 80)]
    healthcheck_port: u16,

    /// File containing the x509 certificate for HTTPS
    #[arg(long = "tlsCertFile", default_value = "/etc/webhook/certs/cert.pem")]
    tls_cert_file: PathBuf,

    /// File containing the x509 private key matching tlsCertFile
    #[arg(long = "tlsKeyFile", default_value = "/etc/webhook/certs/key.pem")]
    tls_key_file: PathBuf,

    /// Log level
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        anyhow::bail!("failed to install rustls crypto provider: {e:?}");
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .init();

    let config = Config::load(&cli.paths_to_decorate).with_context(|| {
        format!(
            "failed to load decoration config from {}",
            cli.paths_to_decorate.display()
        )
    })?;
    info!(
        path = %cli.paths_to_decorate.display(),
        kinds = config.configs.len(),
        "loaded decoration config"
    );

    let metrics = Arc::new(WebhookMetrics::new()?);

    // liveness probe target
    let apiserver_host = std::env::var(KUBERNETES_SERVICE_HOST)
        .with_context(|| format!("environment variable '{KUBERNETES_SERVICE_HOST}' was not set"))?;
    let apiserver_port = std::env::var(KUBERNETES_SERVICE_PORT)
        .with_context(|| format!("environment variable '{KUBERNETES_SERVICE_PORT}' was not set"))?;
    let apiserver_addr = format!("{apiserver_host}:{apiserver_port}");

    let mut health_registry = HealthRegistry::new();
    health_registry.add_liveness_check(
        "apiserver connectivity",
        Probe::Periodic(health::spawn_periodic(
            TcpCheck::new(&apiserver_addr, LIVENESS_DIAL_TIMEOUT),
            LIVENESS_INTERVAL,
        )),
    );
    health_registry.add_readiness_check(
        "apiserver connectivity",
        Probe::OnDemand(TcpCheck::new(&apiserver_addr, READINESS_DIAL_TIMEOUT)),
    );

    let tls_config = RustlsConfig::from_pem_file(&cli.tls_cert_file, &cli.tls_key_file)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS key pair from {} / {}",
                cli.tls_cert_file.display(),
                cli.tls_key_file.display()
            )
        })?;

    let state = Arc::new(WebhookState {
        config,
        annotation_key: cli.username_annotation_key.clone(),
        metrics: metrics.clone(),
    });
    let admin_state = Arc::new(AdminState {
        health: health_registry,
        metrics,
    });

    let webhook_addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let admin_addr = SocketAddr::from(([0, 0, 0, 0], cli.healthcheck_port));

    let webhook_handle = axum_server::Handle::new();
    let admin_handle = axum_server::Handle::new();

    let webhook_app = webhook_router(state);
    info!(addr = %webhook_addr, annotation_key = %cli.username_annotation_key, "starting HTTPS webhook server");
    let webhook_server = tokio::spawn({
        let handle = webhook_handle.clone();
        async move {
            if let Err(e) = axum_server::bind_rustls(webhook_addr, tls_config)
                .handle(handle)
                .serve(webhook_app.into_make_service())
                .await
            {
                error!(error = %e, "webhook server error");
            }
        }
    });

    let admin_app = health::admin_router(admin_state, &cli.metrics_endpoint);
    info!(addr = %admin_addr, "starting healthcheck server");
    let admin_server = tokio::spawn({
        let handle = admin_handle.clone();
        async move {
            if let Err(e) = axum_server::bind(admin_addr)
                .handle(handle)
                .serve(admin_app.into_make_service())
                .await
            {
                error!(error = %e, "healthcheck server error");
            }
        }
    });

    shutdown_signal().await;
    info!("got OS shutdown signal, shutting down webhook server gracefully...");
    webhook_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    admin_handle.graceful_shutdown(Some(Duration::from_secs(30)));
    let _ = tokio::join!(webhook_server, admin_server);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
