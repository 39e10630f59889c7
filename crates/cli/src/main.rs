use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use kplane_api::{GraphResolver, ResolverConfig};
use kplane_kubehub::{ConnectError, KubeCluster};
use kplane_server::{router, ServerOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kplane", version, about = "Read-only Crossplane aggregation server")]
struct Cli {
    /// Host to bind
    #[arg(long = "bind", env = "KP_BIND", default_value = "localhost")]
    bind: String,

    #[arg(short = 'p', long = "port", env = "KP_PORT", default_value_t = 8090)]
    port: u16,

    /// Namespace tried first when looking up objects of unknown scope
    #[arg(short = 'n', long = "namespace", env = "KP_NAMESPACE")]
    namespace: Option<String>,

    /// Provider/CRD index lifetime, seconds
    #[arg(long = "definition-ttl", env = "KP_DEFINITION_TTL_SECS", default_value_t = 300)]
    definition_ttl: u64,

    /// Managed resource listing lifetime, seconds
    #[arg(long = "instance-ttl", env = "KP_INSTANCE_TTL_SECS", default_value_t = 60)]
    instance_ttl: u64,

    /// Upper bound for each upstream cluster call, seconds
    #[arg(long = "request-timeout", env = "KP_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout: u64,

    /// How long in-flight requests may run after a shutdown signal, seconds
    #[arg(long = "shutdown-grace", env = "KP_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    shutdown_grace: u64,

    /// Directory of UI assets served at /
    #[arg(long = "static-dir", env = "KP_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Debug logging (also enabled by a non-empty DEBUG)
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    verbose: bool,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}

fn init_tracing(verbose: bool) {
    let env = if verbose || env_flag("DEBUG") {
        "debug".to_string()
    } else {
        std::env::var("KPLANE_LOG").unwrap_or_else(|_| "info".to_string())
    };
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KPLANE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KPLANE_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("shutdown: interrupt"),
        _ = terminate => info!("shutdown: terminate"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    init_metrics();

    let cluster = match KubeCluster::connect(Duration::from_secs(cli.request_timeout)).await {
        Ok(c) => c,
        Err(ConnectError::NotConfigured(reason)) => {
            error!(reason = %reason, "no cluster connection");
            eprintln!("No Kubernetes cluster connection possible: {}", reason);
            eprintln!("Set KUBECONFIG or run inside a cluster with a service account.");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("connecting to the cluster"),
    };

    let config = ResolverConfig {
        definition_ttl: Duration::from_secs(cli.definition_ttl),
        instance_ttl: Duration::from_secs(cli.instance_ttl),
        namespace_hint: cli.namespace.clone(),
        ..Default::default()
    };
    let resolver = Arc::new(GraphResolver::new(Arc::new(cluster), config));
    let options = ServerOptions { static_dir: cli.static_dir.clone(), cors_off: env_flag("KP_CORS_OFF") };
    if options.cors_off {
        warn!("CORS checks disabled");
    }
    let app = router(resolver.clone(), &options);

    let addr = format!("{}:{}", cli.bind, cli.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {}", addr))?;
    info!(addr = %addr, namespace = ?cli.namespace, "kplane listening");

    let stop = CancellationToken::new();
    let server_stop = stop.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app).with_graceful_shutdown(async move { server_stop.cancelled().await }).await
    });

    tokio::select! {
        res = &mut server => {
            resolver.shutdown();
            return res.context("server task")?.context("serving");
        }
        _ = shutdown_signal() => {}
    }

    stop.cancel();
    let grace = Duration::from_secs(cli.shutdown_grace);
    match tokio::time::timeout(grace, &mut server).await {
        Ok(Ok(Ok(()))) => info!("shutdown: in-flight requests drained"),
        Ok(Ok(Err(e))) => warn!(error = %e, "shutdown: server error while draining"),
        Ok(Err(e)) => warn!(error = %e, "shutdown: server task failed"),
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "shutdown: grace period elapsed; dropping in-flight requests");
            server.abort();
        }
    }
    resolver.shutdown();
    Ok(())
}
