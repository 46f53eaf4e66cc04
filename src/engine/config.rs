// ── Recall Engine: Configuration ───────────────────────────────────────────
//
// All tunables come from the environment with documented defaults; the
// resulting EngineConfig is resolved once at startup and shared by Arc.
// USE_LOCAL_MEMORY_LLM selects the local extractor model when the local
// server answers, falling back to the cloud endpoint otherwise.

use crate::atoms::constants::*;
use crate::engine::decay::DecayParams;
use crate::engine::retrieval::RetrievalParams;
use log::info;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Service
    pub db_path: PathBuf,
    pub bind_address: String,
    pub port: u16,

    // Model endpoints
    pub ollama_base_url: String,
    pub cloud_base_url: String,
    pub cloud_api_key: Option<String>,
    pub embedding_model: String,
    pub chat_model: String,
    pub extractor_model: String,
    pub use_local_memory_llm: bool,

    // Numeric tunables
    pub decay_rate: f64,
    pub reinforcement_bonus: f64,
    pub importance_floor: f64,
    pub decay_interval_hours: u64,
    pub retrieval_k: usize,
    pub similarity_threshold: f64,
    pub spreading_depth: usize,
    pub spreading_decay: f64,
    pub contradiction_threshold: f64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let config = EngineConfig {
            db_path: PathBuf::from(env_or("RECALL_DB_PATH", "recall.db")),
            bind_address: env_or("RECALL_BIND_ADDR", "127.0.0.1"),
            port: env_parse("RECALL_PORT", 7878),

            ollama_base_url: env_or("OLLAMA_BASE_URL", "http://localhost:11434"),
            cloud_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com"),
            cloud_api_key: std::env::var("OPENAI_API_KEY").ok(),
            embedding_model: env_or("EMBEDDING_MODEL", "all-minilm:l6-v2"),
            chat_model: env_or("CHAT_MODEL", "llama3.1"),
            extractor_model: env_or("EXTRACTOR_MODEL", "llama3.1"),
            use_local_memory_llm: env_parse("USE_LOCAL_MEMORY_LLM", true),

            decay_rate: env_parse("DECAY_RATE", DEFAULT_DECAY_RATE),
            reinforcement_bonus: env_parse("REINFORCEMENT_BONUS", DEFAULT_REINFORCEMENT_BONUS),
            importance_floor: env_parse("IMPORTANCE_FLOOR", DEFAULT_IMPORTANCE_FLOOR),
            decay_interval_hours: env_parse("DECAY_INTERVAL_HOURS", DEFAULT_DECAY_INTERVAL_HOURS),
            retrieval_k: env_parse("RETRIEVAL_K", DEFAULT_RETRIEVAL_K),
            similarity_threshold: env_parse("SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD),
            spreading_depth: env_parse("SPREADING_DEPTH", DEFAULT_SPREADING_DEPTH),
            spreading_decay: env_parse("SPREADING_DECAY", DEFAULT_SPREADING_DECAY),
            contradiction_threshold: env_parse(
                "CONTRADICTION_THRESHOLD",
                DEFAULT_CONTRADICTION_THRESHOLD,
            ),
        };
        info!(
            "[config] db={:?} bind={}:{} local_llm={}",
            config.db_path, config.bind_address, config.port, config.use_local_memory_llm
        );
        config
    }

    pub fn decay_params(&self) -> DecayParams {
        DecayParams {
            decay_rate: self.decay_rate,
            reinforcement_bonus: self.reinforcement_bonus,
            importance_floor: self.importance_floor,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.retrieval_k,
            depth: self.spreading_depth,
            spread_decay: self.spreading_decay,
            similarity_threshold: self.similarity_threshold,
        }
    }

    /// (base_url, api_key, model) for the extractor, honoring the local
    /// selector: local when enabled and reachable, cloud otherwise.
    pub fn extractor_endpoint(&self, local_reachable: bool) -> (String, Option<String>, String) {
        if self.use_local_memory_llm && local_reachable {
            (self.ollama_base_url.clone(), None, self.extractor_model.clone())
        } else {
            (
                self.cloud_base_url.clone(),
                self.cloud_api_key.clone(),
                self.extractor_model.clone(),
            )
        }
    }
}
