#![warn(clippy::all, clippy::pedantic)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use clap::Parser;
use uptrack_service::ingress::ExternalIngress;
use uptrack_service::{Config, Services};

mod auth;
mod error;
mod routes;

use auth::ApiToken;
use error::AppError;
use logger::init_tracing;

#[derive(Parser)]
#[command(author, version, about = "Pull/push API for the external prober fleet", long_about = None)]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/uptrack/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    let _ = dotenvy::dotenv();
    init_tracing("uptrack-server");

    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref())?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    if config.server.api_token.is_none() {
        tracing::warn!("server.api_token is not set, every /domains request will be rejected");
    }
    let token = web::Data::new(ApiToken::new(config.server.api_token.as_deref()));

    let services = Services::build(config).await?;
    run_server(addr, services.ingress.clone(), token).await
}

async fn run_server(addr: SocketAddr, ingress: Arc<ExternalIngress>, token: web::Data<ApiToken>) -> Result<(), AppError> {
    tracing::info!(%addr, "starting ingress server");
    HttpServer::new(move || App::new().configure(routes::configure(ingress.clone(), token.clone())))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
