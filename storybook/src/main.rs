//! Children's story generator server.
//!
//! Serves the story API over HTTP, streaming pages as they are illustrated.
//!
//! # Headless Mode
//!
//! Run with `--headless` to generate one story from a JSON request on stdin,
//! with events written to stdout as NDJSON:
//!
//! ```bash
//! echo '{"theme":"space","characters":[{"name":"Mira"}],"ageGroup":"6-8"}' \
//!     | cargo run -p storybook -- --headless --pdf story.pdf
//! ```

mod config;
mod error;
mod headless;
mod routes;

use config::ServerConfig;
use routes::{build_router, AppState};
use std::sync::Arc;
use storybook_core::{GeminiModel, StoryConfig, StoryOrchestrator, StoryStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    init_tracing();

    if std::env::var("GEMINI_API_KEY").is_err() {
        eprintln!("Error: GEMINI_API_KEY environment variable not set.");
        eprintln!("Please set it in .env file or with: export GEMINI_API_KEY=your_key_here");
        std::process::exit(1);
    }

    if args.iter().any(|a| a == "--headless") {
        let options = headless::parse_options_from_args(&args);
        return headless::run_headless(options).await.map_err(|e| e.into());
    }

    serve().await
}

/// Logs go to stderr so headless output on stdout stays machine-readable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storybook=info,storybook_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = ServerConfig::from_env();
    let story_config = StoryConfig::from_env();

    let model = Arc::new(GeminiModel::from_env(&story_config)?);
    let orchestrator = StoryOrchestrator::new(model, Arc::new(StoryStore::new()), story_config);
    let app = build_router(AppState { orchestrator }, &server_config);

    let addr = server_config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Story generator listening on {addr}");
    tracing::info!("  - POST /api/story/generate");
    tracing::info!("  - GET  /api/story/story/:id");
    tracing::info!("  - POST /api/story/regenerate-page");
    tracing::info!("  - POST /api/story/generate-pdf");
    tracing::info!("  - GET  /api/story/themes");
    tracing::info!("  - GET  /api/health");
    if let Some(dir) = &server_config.static_dir {
        tracing::info!("Serving client files from {}", dir.display());
    }

    axum::serve(listener, app).await?;
    Ok(())
}

fn print_help() {
    println!("Storybook - AI-illustrated children's stories");
    println!();
    println!("USAGE:");
    println!("  storybook [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help       Show this help message");
    println!("  --headless       Generate one story from a JSON request on stdin");
    println!();
    println!("HEADLESS OPTIONS (only with --headless):");
    println!("  -i, --input <FILE>   Read the request from FILE instead of stdin");
    println!("  -p, --pages <N>      Number of pages to request");
    println!("  --pdf <FILE>         Also write the finished story as PDF");
    println!();
    println!("ENVIRONMENT:");
    println!("  GEMINI_API_KEY          API key (required)");
    println!("  HOST, PORT              Server address (default 0.0.0.0:3000)");
    println!("  STORYBOOK_STATIC_DIR    Serve browser client files from this directory");
    println!("  STORYBOOK_TARGET_PAGES  Pages per story (default 7)");
    println!("  STORYBOOK_TEXT_MODEL    Model used for outlines");
    println!("  STORYBOOK_IMAGE_MODEL   Model used for illustrations");
    println!("  RUST_LOG                Log filter");
    println!();
    println!("EXAMPLES:");
    println!("  storybook                                    # Start the server");
    println!("  storybook --headless < request.json          # One story as NDJSON");
    println!("  storybook --headless -i request.json --pdf story.pdf");
}
