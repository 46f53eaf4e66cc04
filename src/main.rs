// Recall Memory Engine — service entry point.
//
// Startup order: logger → config → store (migrations) → embedder probe →
// embedding backfill → decay sweep loop → HTTP server.

use log::{error, info, warn};
use recall::engine::chat::ChatClient;
use recall::engine::embedding::EmbeddingClient;
use recall::engine::orchestrator::Engine;
use recall::engine::{decay, server};
use recall::{EngineConfig, MemoryStore};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Arc::new(EngineConfig::from_env());

    let store = match MemoryStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("[main] Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    // ── Embedder readiness ───────────────────────────────────────────────
    let embedder = Arc::new(EmbeddingClient::new(
        &config.ollama_base_url,
        &config.embedding_model,
        0, // learn the dimension from the first embed
    ));
    match embedder.ensure_ready().await {
        Ok(dims) => info!("[main] Embedder ready ({} dims)", dims),
        Err(e) => warn!(
            "[main] Embedder not ready ({}); writes will fail until it is",
            e
        ),
    }

    // ── Model selection for the responder and extractor ──────────────────
    let responder = Arc::new(ChatClient::new(
        &config.ollama_base_url,
        None,
        &config.chat_model,
    ));
    let local_reachable = responder.check_reachable().await;
    let (extractor_url, extractor_key, extractor_model) =
        config.extractor_endpoint(local_reachable);
    info!(
        "[main] Extractor: {} at {}",
        extractor_model, extractor_url
    );
    let extractor = Arc::new(ChatClient::new(
        &extractor_url,
        extractor_key,
        &extractor_model,
    ));

    // ── Embedding backfill for rows stored without vectors ───────────────
    match store.memories_without_embeddings(500) {
        Ok(missing) if !missing.is_empty() => {
            info!("[main] Backfilling embeddings for {} memories", missing.len());
            for mem in &missing {
                match embedder.embed(&mem.summary).await {
                    Ok(vec) => {
                        if let Err(e) = store.update_memory_embedding(&mem.id, &vec) {
                            warn!("[main] Backfill update failed for {}: {}", &mem.id[..8], e);
                        }
                    }
                    Err(e) => {
                        warn!("[main] Backfill embed failed: {}", e);
                        break;
                    }
                }
            }
        }
        Ok(_) => {}
        Err(e) => warn!("[main] Backfill scan failed: {}", e),
    }

    // ── Decay sweep: once at startup, then on the interval ───────────────
    tokio::spawn(decay::run_decay_loop(
        store.clone(),
        config.decay_params(),
        config.decay_interval_hours,
    ));

    let engine = Arc::new(Engine {
        store,
        embedder,
        responder,
        extractor,
        config,
    });

    if let Err(e) = server::run_server(engine).await {
        error!("[main] Server error: {}", e);
        std::process::exit(1);
    }
}
