mod db;
mod element;
mod protocol;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use store::BoardStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()
        .expect("invalid PORT");

    // Postgres when configured, otherwise an in-memory store so the server
    // still comes up for local development.
    let board_store: Arc<dyn BoardStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = db::init_pool(&database_url)
                .await
                .expect("database init failed");
            tracing::info!("postgres store initialized");
            Arc::new(store::pg::PgStore::new(pool))
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; using in-memory store, boards will not survive restart");
            Arc::new(store::memory::MemoryStore::new())
        }
    };

    let state = state::AppState::new(board_store);

    // Spawn background autosave task.
    let _autosave = services::persistence::spawn_autosave_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "slateboard listening");
    axum::serve(listener, app).await.expect("server failed");
}
