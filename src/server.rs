use actix_web::{
    http::header,
    web::{self, Bytes},
    HttpRequest, HttpResponse, Responder,
};
use log::info;
use reqwest::Method;
use serde_json::json;

use crate::{
    config::Config,
    error::RelayError,
    filters::{ResponseFilters, RewriteContext},
    relay::{Relay, RelayRequest},
};

pub fn configure(
    config: web::Data<Config>,
    relay: web::Data<Relay>,
    filters: web::Data<ResponseFilters>,
) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::PayloadConfig::new(config.max_payload_size))
            .app_data(relay)
            .app_data(filters)
            .route(&config.relay_endpoint, web::route().to(resolve))
            .route(&config.health_endpoint, web::get().to(health));
    }
}

async fn resolve(
    relay: web::Data<Relay>,
    filters: web::Data<ResponseFilters>,
    req: HttpRequest,
    method: Method,
    body: Bytes,
) -> Result<HttpResponse, RelayError> {
    // get basic request information
    let peer_addr = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".into());

    let request = RelayRequest::from_parts(method.clone(), req.query_string(), req.headers(), &body)?;
    let target = request.target().clone();

    // call a proxy request
    let res = relay.send(request).await?;
    let status = res.status();
    let kind = res.kind();
    info!("[{method}] {peer_addr} => {target} => {status} ({kind})");

    // define a response builder
    let mut builder = HttpResponse::build(status);
    for (key, value) in res.headers() {
        builder.append_header((key.clone(), value.clone()));
    }

    // send a response
    match kind.rewritten_content_type() {
        Some(content_type) => {
            let ctx = RewriteContext::new(res.url().clone(), relay.endpoint());
            let body = filters.filter(kind, &ctx, res.text().await?);
            Ok(builder
                .insert_header((header::CONTENT_TYPE, content_type))
                .body(body))
        }
        None => Ok(builder.body(res.bytes().await?)),
    }
}

async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
    }))
}
