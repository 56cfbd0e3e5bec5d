use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};

use opensplit::auth::BotToken;
use opensplit::config::Config;
use opensplit::store::MongoStore;
use opensplit::{routes, telemetry, Ledger};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init();

    let config = Config::from_env().map_err(|err| {
        tracing::error!(error = %err, "invalid configuration");
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    })?;
    tracing::info!(database = %config.database, rounding = ?config.rounding, "starting");

    let store = MongoStore::connect(&config.mongodb_uri, &config.database)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "failed to connect to MongoDB");
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, err)
        })?;
    tracing::info!("connected");

    let ledger = web::Data::new(Ledger::new(Arc::new(store), config.rounding));
    let bot_token = web::Data::new(BotToken(config.bot_token.clone()));
    let allowed_origin = config.allowed_origin.clone();

    tracing::info!(bind = %config.bind, "listening");
    HttpServer::new(move || {
        let cors = match &allowed_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allow_any_method()
                .allow_any_header(),
            None => Cors::permissive(),
        };
        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(ledger.clone())
            .app_data(bot_token.clone())
            .configure(routes::configure)
    })
    .bind(config.bind.as_str())?
    .run()
    .await
}
