use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, Result};
use log::info;
use open_rewrite_proxy::{
    config::Config,
    filters::{DefaultResponseFilter, ResponseFilterBuilder},
    relay::Relay,
    server,
};
use reqwest::ClientBuilder;

#[actix_web::main]
async fn main() {
    async fn try_main() -> Result<()> {
        let config = Config::try_default().map_err(|e| anyhow!("failed to parse config: {e}"))?;
        let addr = config.bind_addr;

        // Initialize client
        let client = ClientBuilder::new()
            .build()
            .map_err(|e| anyhow!("failed to init reqwest client: {e}"))?;

        let relay = web::Data::new(Relay::new(client, &config));
        let filters = web::Data::new(
            DefaultResponseFilter
                .try_build()
                .map_err(|e| anyhow!("failed to init response filters: {e}"))?,
        );
        let config = web::Data::new(config);

        info!(
            "relay endpoint: http://{addr}{endpoint}",
            endpoint = &config.relay_endpoint,
        );

        // Start web server
        HttpServer::new(move || {
            App::new().configure(server::configure(
                web::Data::clone(&config),
                web::Data::clone(&relay),
                web::Data::clone(&filters),
            ))
        })
        .bind(addr)
        .map_err(|e| anyhow!("failed to bind to {addr}: {e}"))?
        .shutdown_timeout(20)
        .run()
        .await
        .map_err(Into::into)
    }

    ::env_logger::Builder::from_env(::env_logger::Env::default().default_filter_or("info")).init();
    try_main().await.expect("running a server")
}
