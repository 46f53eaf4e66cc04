// ── Recall Server: Routes ──────────────────────────────────────────────────
//
// The inbound surface:
//
//   POST /chat                          SSE stream of response chunks
//   GET  /memories?inactive=true|false  list memory units
//   GET  /memories/:id/relations        graph edges for one memory
//   GET  /stats                         totals, tier counts, averages
//   GET  /preferences?entity=&valence=  active preferences
//   GET  /entities                      all entities
//   GET  /entities/:id/memories         memories joined to an entity
//   POST /entities/:id/confirm          user-confirm an entity
//   GET  /contradictions                pending conflicts
//   POST /contradictions/:id/resolve    apply a resolution
//   POST /decay/run                     run a decay sweep now
//   GET  /decay/log?memory_id=          decay audit trail
//   GET  /health                        liveness + counts

use super::{Request, RouteResult};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{Resolution, Valence};
use crate::engine::decay;
use crate::engine::orchestrator::Engine;
use serde_json::{json, Value};

pub(crate) fn route(engine: &Engine, req: &Request) -> EngineResult<RouteResult> {
    let segments = req.segments();
    match (req.method.as_str(), segments.as_slice()) {
        ("POST", ["chat"]) => chat(req),
        ("GET", ["memories"]) => list_memories(engine, req),
        ("GET", ["memories", id, "relations"]) => memory_relations(engine, id),
        ("GET", ["stats"]) => stats(engine),
        ("GET", ["preferences"]) => preferences(engine, req),
        ("GET", ["entities"]) => entities(engine),
        ("GET", ["entities", id, "memories"]) => entity_memories(engine, id),
        ("POST", ["entities", id, "confirm"]) => confirm_entity(engine, id),
        ("GET", ["contradictions"]) => contradictions(engine),
        ("POST", ["contradictions", id, "resolve"]) => resolve_contradiction(engine, id, req),
        ("POST", ["decay", "run"]) => run_decay(engine),
        ("GET", ["decay", "log"]) => decay_log(engine, req),
        ("GET", ["health"]) => health(engine),
        _ => Ok(RouteResult::Json {
            status: 404,
            body: json!({"error": format!("no route for {} {}", req.method, req.path)}),
        }),
    }
}

fn ok(body: Value) -> EngineResult<RouteResult> {
    Ok(RouteResult::Json { status: 200, body })
}

// ── Handlers ───────────────────────────────────────────────────────────────

fn chat(req: &Request) -> EngineResult<RouteResult> {
    let body = req.json_body()?;
    let message = body["message"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::Input("'message' is required".into()))?;
    let conversation_id = body["conversation_id"].as_str().map(|s| s.to_string());
    Ok(RouteResult::Chat { message, conversation_id })
}

fn list_memories(engine: &Engine, req: &Request) -> EngineResult<RouteResult> {
    let include_inactive = req
        .query
        .get("inactive")
        .map(|v| v == "true")
        .unwrap_or(false);
    let memories = engine.store.all_memories(include_inactive)?;
    let count = memories.len();
    ok(json!({"memories": memories, "count": count}))
}

fn memory_relations(engine: &Engine, id: &str) -> EngineResult<RouteResult> {
    if engine.store.get_memory(id)?.is_none() {
        return Ok(RouteResult::Json {
            status: 404,
            body: json!({"error": format!("unknown memory: {id}")}),
        });
    }
    let relations = engine.store.relations_for(id)?;
    ok(json!({"relations": relations}))
}

fn stats(engine: &Engine) -> EngineResult<RouteResult> {
    let stats = engine.store.stats()?;
    ok(serde_json::to_value(stats)?)
}

fn preferences(engine: &Engine, req: &Request) -> EngineResult<RouteResult> {
    let entity = req.query.get("entity").map(|s| s.as_str());
    let valence = match req.query.get("valence") {
        Some(raw) => Some(
            Valence::parse(raw)
                .ok_or_else(|| EngineError::Input(format!("invalid valence: {raw}")))?,
        ),
        None => None,
    };
    let prefs = engine.store.user_preferences(entity, valence)?;
    ok(json!({"preferences": prefs}))
}

fn entities(engine: &Engine) -> EngineResult<RouteResult> {
    let entities = engine.store.all_entities()?;
    ok(json!({"entities": entities}))
}

fn entity_memories(engine: &Engine, id: &str) -> EngineResult<RouteResult> {
    let Some(entity) = engine.store.get_entity(id)? else {
        return Ok(RouteResult::Json {
            status: 404,
            body: json!({"error": format!("unknown entity: {id}")}),
        });
    };
    let mut memories = Vec::new();
    for memory_id in &entity.memory_ids {
        if let Some(mem) = engine.store.get_memory(memory_id)? {
            memories.push(mem);
        }
    }
    ok(json!({"entity": entity, "memories": memories}))
}

fn confirm_entity(engine: &Engine, id: &str) -> EngineResult<RouteResult> {
    if engine.store.confirm_entity(id)? {
        ok(json!({"confirmed": true}))
    } else {
        Ok(RouteResult::Json {
            status: 404,
            body: json!({"error": format!("unknown entity: {id}")}),
        })
    }
}

fn contradictions(engine: &Engine) -> EngineResult<RouteResult> {
    let pending = engine.store.pending_contradictions()?;
    ok(json!({"contradictions": pending}))
}

fn resolve_contradiction(engine: &Engine, id: &str, req: &Request) -> EngineResult<RouteResult> {
    let body = req.json_body()?;
    let resolution = body["resolution"]
        .as_str()
        .and_then(Resolution::parse)
        .ok_or_else(|| EngineError::Input("'resolution' must be a valid resolution".into()))?;
    let note = body["note"].as_str();
    let resolved = engine.store.resolve_contradiction(id, resolution, note)?;
    ok(serde_json::to_value(resolved)?)
}

fn run_decay(engine: &Engine) -> EngineResult<RouteResult> {
    let updated = decay::run_decay_update(&engine.store, &engine.config.decay_params())?;
    ok(json!({"updated": updated}))
}

fn decay_log(engine: &Engine, req: &Request) -> EngineResult<RouteResult> {
    let memory_id = req.query.get("memory_id").map(|s| s.as_str());
    let entries = decay::decay_log(&engine.store, memory_id)?;
    ok(json!({"entries": entries}))
}

fn health(engine: &Engine) -> EngineResult<RouteResult> {
    let stats = engine.store.stats()?;
    ok(json!({
        "status": "ok",
        "active_memories": stats.active_memories,
        "entities": stats.entities,
        "pending_contradictions": stats.pending_contradictions,
    }))
}
