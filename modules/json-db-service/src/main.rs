//! JSON File DB Service: standalone binary serving JSON documents stored as files.
//!
//! Every document operation is recorded in an append-only audit log.
//! Default: http://127.0.0.1:5000/

mod audit;
mod config;
mod error;
mod lanes;
mod routes;
mod store;

use audit::AuditLog;
use config::Config;
use routes::AppState;
use std::sync::Arc;
use std::time::Instant;
use store::DocumentStore;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    log::info!("Audit log at: {}", config.audit_log_path.display());
    let audit = AuditLog::new(&config.audit_log_path);

    let store = Arc::new(
        DocumentStore::open(&config.data_dir, &config.merge_output_path, audit)
            .await
            .expect("Failed to open document store"),
    );
    log::info!("Serving documents from: {}", store.data_dir().display());

    if config.seed {
        match store.seed_defaults().await {
            Ok(count) => log::info!("[JSON_DB] Seeded {} sample documents", count),
            Err(e) => log::warn!("[JSON_DB] Seeding failed: {}", e),
        }
    }

    let state = Arc::new(AppState {
        store,
        start_time: Instant::now(),
    });

    let cors = tower_http::cors::CorsLayer::permissive();
    let app = routes::router(state).layer(cors);

    let addr = format!("127.0.0.1:{}", config.port);
    log::info!("JSON File DB listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    axum::serve(listener, app).await.expect("Server error");
}
