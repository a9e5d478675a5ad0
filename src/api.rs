use crate::{
    command::CommandRunner,
    config::AppConfig,
    hardware::CpuInfoReader,
    http_client::handle_service_result,
    pages::{self, Landing},
    probe::NetworkProbe,
    services::{
        config_store::{ConfigStore, ConnectionSnapshot},
        identity::IdentityService,
        network::NetworkStatusService,
        wifi::WifiService,
    },
};
use actix_web::{HttpRequest, HttpResponse, Responder, http::header, web};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{net::Ipv4Addr, sync::Arc};

const HTML: &str = "text/html; charset=utf-8";

#[derive(Deserialize, Validate)]
pub struct WifiSetupForm {
    #[validate(min_length = 1)]
    ssid: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub device_id: String,
    pub registration_url: String,
    pub local_ips: Vec<Ipv4Addr>,
    pub connection: ConnectionSnapshot,
}

#[derive(Debug, Serialize)]
struct HealthcheckInfo {
    version: &'static str,
    device_id: String,
}

pub struct Api<Probe, Runner, CpuInfo>
where
    Probe: NetworkProbe,
    Runner: CommandRunner,
    CpuInfo: CpuInfoReader,
{
    pub store: Arc<ConfigStore>,
    pub config: Arc<AppConfig>,
    pub probe: Probe,
    pub runner: Runner,
    pub cpu_info: CpuInfo,
}

impl<Probe, Runner, CpuInfo> Api<Probe, Runner, CpuInfo>
where
    Probe: NetworkProbe,
    Runner: CommandRunner,
    CpuInfo: CpuInfoReader,
{
    pub fn new(
        store: Arc<ConfigStore>,
        config: Arc<AppConfig>,
        probe: Probe,
        runner: Runner,
        cpu_info: CpuInfo,
    ) -> Self {
        Api {
            store,
            config,
            probe,
            runner,
            cpu_info,
        }
    }

    pub async fn index(api: web::Data<Self>, req: HttpRequest) -> impl Responder {
        debug!("index() called");

        if !NetworkStatusService::is_connected(&api.probe) {
            debug!("not connected, redirecting to WiFi setup");
            return HttpResponse::Found()
                .insert_header((header::LOCATION, "/wifi-setup"))
                .finish();
        }

        let device_id = IdentityService::resolve(&api.store, &api.cpu_info, &api.probe);
        let report =
            NetworkStatusService::snapshot(&api.store, &api.probe, &api.config.probe).await;
        let registration_url = api.registration_url(&device_id);
        let port = Self::request_port(&req).unwrap_or(api.config.ui.port);

        HttpResponse::Ok().content_type(HTML).body(pages::landing(&Landing {
            device_id: &device_id,
            registration_url: &registration_url,
            port,
            report: &report,
            server_url: &api.config.probe.server_url,
        }))
    }

    pub async fn wifi_setup_form(api: web::Data<Self>) -> impl Responder {
        debug!("wifi_setup_form() called");

        let networks = WifiService::available_networks(&api.runner, &api.config.wifi).await;

        HttpResponse::Ok()
            .content_type(HTML)
            .body(pages::wifi_setup(&networks, None))
    }

    pub async fn wifi_setup_submit(
        api: web::Data<Self>,
        form: web::Form<WifiSetupForm>,
    ) -> impl Responder {
        debug!("wifi_setup_submit() called: ssid={:?}", form.ssid);

        if let Err(e) = form.validate() {
            warn!("invalid WiFi setup form: {e}");
            return api.invalid_form("SSID must not be empty").await;
        }

        let result = WifiService::apply(
            &api.store,
            &api.runner,
            &api.config.wifi,
            &api.config.paths.wpa_supplicant_file,
            &form.ssid,
            &form.password,
        )
        .await;

        match result {
            Ok(message) => {
                let connected = WifiService::wait_for_connection(
                    &api.probe,
                    api.config.wifi.poll_attempts,
                    api.config.wifi.poll_interval,
                )
                .await;

                HttpResponse::Ok()
                    .content_type(HTML)
                    .body(pages::wifi_result(message, connected))
            }
            Err(e) if e.is_invalid_input() => api.invalid_form(&e.to_string()).await,
            Err(e) => HttpResponse::InternalServerError()
                .content_type(HTML)
                .body(pages::wifi_result(
                    &format!("Error updating WiFi settings: {e}"),
                    false,
                )),
        }
    }

    pub async fn status(api: web::Data<Self>) -> impl Responder {
        debug!("status() called");

        let device_id = IdentityService::resolve(&api.store, &api.cpu_info, &api.probe);
        let report =
            NetworkStatusService::snapshot(&api.store, &api.probe, &api.config.probe).await;

        let result = IdentityService::registration_url(&api.config.registration, &device_id).map(
            |url| StatusResponse {
                device_id,
                registration_url: url.to_string(),
                local_ips: report.local_ips,
                connection: report.connection,
            },
        );

        handle_service_result(result, "status")
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    pub async fn healthcheck(api: web::Data<Self>) -> impl Responder {
        debug!("healthcheck() called");

        HttpResponse::Ok().json(HealthcheckInfo {
            version: env!("CARGO_PKG_VERSION"),
            device_id: api.store.get().device_id,
        })
    }

    async fn invalid_form(&self, message: &str) -> HttpResponse {
        let networks = WifiService::available_networks(&self.runner, &self.config.wifi).await;

        HttpResponse::BadRequest()
            .content_type(HTML)
            .body(pages::wifi_setup(&networks, Some(message)))
    }

    fn registration_url(&self, device_id: &str) -> String {
        match IdentityService::registration_url(&self.config.registration, device_id) {
            Ok(url) => url.to_string(),
            Err(e) => {
                error!("failed to build registration url: {e:#}");
                self.config.registration.url.clone()
            }
        }
    }

    fn request_port(req: &HttpRequest) -> Option<u16> {
        let info = req.connection_info();
        let (_, port) = info.host().rsplit_once(':')?;
        port.parse().ok()
    }
}
