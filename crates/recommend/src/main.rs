//! Recommendation Service
//!
//! Port: 8082
//!
//! Trains the collaborative model at startup, runs the scheduled retrain,
//! profile refresh and cleanup jobs, and exposes a health endpoint.

use actix_web::{web, App, HttpResponse, HttpServer};
use blog_platform_core::{
    init_tracing, load_dotenv, ConfigLoader, DatabaseConfig, LogConfig, RedisConfig,
    ServiceConfig,
};
use blog_platform_recommend::{
    PostgresRecommendationStore, RecommendConfig, RecommendationService, RedisCache,
    ScheduledRetrainer,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing(&LogConfig::from_env("recommend-service")?)?;

    let db_config = DatabaseConfig::from_env()?;
    let redis_config = RedisConfig::from_env()?;
    let service_config = ServiceConfig::from_env()?;
    let recommend_config = RecommendConfig::from_env()?;
    db_config.validate()?;
    redis_config.validate()?;
    service_config.validate()?;
    recommend_config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .min_connections(db_config.min_connections)
        .acquire_timeout(db_config.connect_timeout)
        .idle_timeout(db_config.idle_timeout)
        .connect(&db_config.url)
        .await?;
    info!("Connected to PostgreSQL");

    let store = PostgresRecommendationStore::new(pool);
    store.init_schema().await?;

    let cache = RedisCache::connect(&redis_config.url).await?;

    let schedule = recommend_config.schedule.clone();
    let service = RecommendationService::new(Arc::new(store), Arc::new(cache), recommend_config);

    match service.train_model().await {
        Ok(report) => info!(
            epochs = report.epochs_run,
            rmse = report.final_rmse,
            "Initial model training finished"
        ),
        Err(e) => warn!(error = %e, "Initial model training failed, serving popular items"),
    }

    let retrainer = ScheduledRetrainer::new(service.clone(), schedule).start();

    let bind_addr = format!("{}:{}", service_config.host, service_config.port);
    info!("Recommendation Service listening on {}", bind_addr);

    let state = web::Data::new(service.clone());
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .wrap(actix_web::middleware::Logger::default())
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    info!("HTTP server stopped, shutting down background work");
    retrainer.stop().await;
    service.shutdown().await;

    Ok(())
}

async fn health_check(service: web::Data<RecommendationService>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "recommend-service",
        "version": env!("CARGO_PKG_VERSION"),
        "model": service.filter().stats(),
        "background_tasks": service.tasks().pending(),
    }))
}
