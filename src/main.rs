use actix_web::{web, App, HttpServer};
use std::error::Error;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use auto_attendance::{api, data, AppState, Config, Database, SystemClock};

async fn start_api(config: &Config, state: web::Data<AppState>) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(database = %config.database_url, "opening attendance store");
    let db = Arc::new(Database::connect(&config.database_url).await?);

    if let Some(path) = &config.seed_csv {
        data::seed_database(&db, path).await?;
    }

    let state = web::Data::new(AppState::new(
        db.clone(),
        db,
        Arc::new(SystemClock),
        config.check_options(),
    ));

    tracing::info!("starting auto-attendance API on http://{}", config.bind_addr);
    start_api(&config, state).await?;

    Ok(())
}
