// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use exam_session::config::Config;
use exam_session::routes;
use exam_session::session::SessionRegistry;
use exam_session::state::AppState;
use exam_session::storage::{ExamStore, InMemoryStore, PgStore, memory::sample_exam};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Load configuration from environment (after tracing so parse warnings are kept)
    let config = Config::from_env();

    let store: Arc<dyn ExamStore> = match &config.database_url {
        Some(database_url) => Arc::new(connect_postgres(database_url).await),
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store with sample exam");
            Arc::new(InMemoryStore::with_sample_data())
        }
    };

    let state = AppState {
        store,
        sessions: SessionRegistry::with_linger(config.session_linger()),
        config: config.clone(),
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    // Start the server
    axum::serve(listener, app).await.expect("Server error");
}

async fn connect_postgres(database_url: &str) -> PgStore {
    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    let store = PgStore::new(pool);

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    store
        .migrate()
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    if let Err(e) = seed_sample_exam(store.pool(), &store).await {
        tracing::error!("Failed to seed sample exam: {:?}", e);
    }

    store
}

/// Inserts the sample exam when the exams table is empty.
async fn seed_sample_exam(pool: &PgPool, store: &PgStore) -> Result<(), Box<dyn std::error::Error>> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM exams")
        .fetch_one(pool)
        .await?;

    if count == 0 {
        let exam = sample_exam();
        tracing::info!("Seeding sample exam: {}", exam.code);
        store.upsert_exam(&exam).await?;
    }
    Ok(())
}
