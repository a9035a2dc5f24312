use std::net::SocketAddr;

use config::CONFIG;
use controller::{create_router, create_ui_router, handle_404};
use service::app_state::{create_app_state, create_state_router};
use tower_http::cors::CorsLayer;

use cyder_tools::log::{error, info, LocalLogger};

mod config;
mod controller;
mod database;
mod service;
mod utils;

#[tokio::main]
async fn main() {
    LocalLogger::init(&CONFIG.log_level);

    let app_state = match create_app_state(&CONFIG) {
        Ok(app_state) => app_state,
        Err(e) => {
            error!("failed to initialize application state: {}", e);
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", &CONFIG.host, CONFIG.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("server start at {}", &addr);

    let app = create_state_router()
        .nest(&CONFIG.base_path, create_router())
        .merge(create_ui_router())
        .fallback(handle_404)
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!("server stopped: {}", e);
    }
}
