use actix_web::{
    App, HttpServer,
    dev::ServerHandle,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use player_portal::{
    api::Api,
    command::SystemCommandRunner,
    config::AppConfig,
    hardware::ProcCpuInfo,
    probe::SystemNetworkProbe,
    services::{config_store::ConfigStore, identity::IdentityService},
};
use std::{io::Write, sync::Arc};

type PortalApi = Api<SystemNetworkProbe, SystemCommandRunner, ProcCpuInfo>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let config = Arc::new(AppConfig::load().context("failed to load configuration")?);
    let store = Arc::new(ConfigStore::load(&config.paths.config_file));

    let api = PortalApi::new(
        store,
        config.clone(),
        SystemNetworkProbe::new().context("failed to create network probe")?,
        SystemCommandRunner,
        ProcCpuInfo::new(&config.paths.cpuinfo_file),
    );

    let device_id = IdentityService::resolve(&api.store, &api.cpu_info, &api.probe);
    info!("device id: {device_id}");

    let terminate = terminate_signal()?;

    let (server_handle, server_task) = run_server(api, config.ui.port)?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = terminate => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

/// Resolves once SIGTERM arrives
#[cfg(unix)]
fn terminate_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    Ok(async move {
        sigterm.recv().await;
    })
}

/// No SIGTERM outside unix, only ctrl-c stops the server
#[cfg(not(unix))]
fn terminate_signal() -> Result<impl Future<Output = ()>> {
    Ok(std::future::pending())
}

fn run_server(
    api: PortalApi,
    ui_port: u16,
) -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let api = Data::new(api);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(api.clone())
            .route("/", web::get().to(PortalApi::index))
            .route("/wifi-setup", web::get().to(PortalApi::wifi_setup_form))
            .route("/wifi-setup", web::post().to(PortalApi::wifi_setup_submit))
            .route("/api/status", web::get().to(PortalApi::status))
            .route("/version", web::get().to(PortalApi::version))
            .route("/healthcheck", web::get().to(PortalApi::healthcheck))
    })
    .bind(format!("0.0.0.0:{ui_port}"))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}
