// NovaGen orchestrator web server
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use tokio_util::sync::CancellationToken;

use novagen::logging::setup_logging;
use novagen::web::routes::handle_request;
use novagen_config::{DeviceProbeKind, ServerConfig, DEFAULT_CONFIG_PATH};
use novagen_engine::{
    Core, DeviceProbe, FsArtifactStore, NvidiaSmiProbe, Scheduler, SimulatedBackend, StaticProbe,
};
use novagen_types::sys_info;

/// `--config <path>`, defaulting to `assets/config.json`.
fn config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    args.windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| PathBuf::from(&w[1]))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, source) = ServerConfig::load(&config_path()).context("invalid configuration")?;
    setup_logging(&config)?;
    source.log();

    let probe: Arc<dyn DeviceProbe> = match config.device_probe {
        DeviceProbeKind::NvidiaSmi => Arc::new(NvidiaSmiProbe::new()),
        DeviceProbeKind::None => Arc::new(StaticProbe::none()),
    };
    let backend = Arc::new(SimulatedBackend::new(Duration::from_millis(
        config.simulated_step_delay_ms,
    )));
    let core = Core::from_config(&config, probe, backend.clone());

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(
        core.clone(),
        backend,
        Arc::new(FsArtifactStore::new(&config.output_dir)),
        shutdown.clone(),
    )
    .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
    .spawn();

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address()))?;

    let make_svc = make_service_fn(move |_conn| {
        let core = core.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle_request(req, core.clone())))
        }
    });

    let server = Server::try_bind(&addr)
        .with_context(|| format!("binding {addr}"))?
        .serve(make_svc)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => sys_info!("Shutdown requested"),
                    _ = shutdown.cancelled() => {}
                }
                shutdown.cancel();
            }
        });

    sys_info!("NovaGen orchestrator listening on http://{}", addr);
    sys_info!("Outputs: {}", config.output_dir.display());
    sys_info!("  POST   /jobs                 - Submit a job");
    sys_info!("  GET    /jobs/{{id}}            - Job status");
    sys_info!("  GET    /jobs/{{id}}/result     - Job result");
    sys_info!("  DELETE /jobs/{{id}}            - Cancel a job");
    sys_info!("  GET    /queue/status         - Queue counters");
    sys_info!("  GET    /gpu/status           - GPU records");
    sys_info!("  GET    /vram/usage           - Primary device memory");
    sys_info!("  POST   /vram/optimize        - Clear cached VRAM");
    sys_info!("  GET    /ws/progress/{{id}}     - Progress WebSocket");

    server.await.context("server error")?;

    shutdown.cancel();
    scheduler.await.context("scheduler task failed")?;
    sys_info!("Server stopped");
    Ok(())
}
