use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use demopilot::{
    collaborators::{LoggingBrowser, LoggingSpeech, NoAnswerGenerator, NoInputCapture},
    providers::openai::OpenAI,
    ClassifierConfig, DemoCollaborators, DemoScript, IntentClassifier, LLMProvider,
    LlmAnswerGenerator, OrchestratorConfig, RawDemoConfig, ScriptCatalog, SessionRegistry,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,demopilot=debug,server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let provider: Option<Arc<dyn LLMProvider>> = match OpenAI::from_env() {
        Ok(provider) => Some(Arc::new(provider)),
        Err(e) => {
            tracing::warn!("language model disabled: {}", e);
            None
        }
    };

    let app_state = Arc::new(AppState {
        registry: SessionRegistry::new(OrchestratorConfig::from_env()),
        catalog: RwLock::new(load_catalog()),
        provider,
        classifier: ClassifierConfig::from_env(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/demo/start", post(start_demo))
        .route("/api/demo/question", post(ask_question))
        .route("/api/demo/listen", post(listen))
        .route("/api/demo/status", get(demo_status))
        .route("/api/demo/end", post(end_demo))
        .route("/api/demos", get(list_demos).post(create_demo))
        .route("/api/demos/{id}", get(get_demo))
        .route("/api/demos/{id}/run", post(run_demo))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let port = std::env::var("DEMOPILOT_PORT")
        .ok()
        .and_then(|port| port.parse().ok())
        .unwrap_or(3002);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {}", e);
    }
}

struct AppState {
    registry: SessionRegistry,
    catalog: RwLock<ScriptCatalog>,
    provider: Option<Arc<dyn LLMProvider>>,
    classifier: ClassifierConfig,
}

impl AppState {
    fn collaborators(&self) -> DemoCollaborators {
        match &self.provider {
            Some(provider) => DemoCollaborators::new(
                Arc::new(LoggingBrowser),
                Arc::new(LoggingSpeech),
                Arc::new(NoInputCapture),
                Arc::new(LlmAnswerGenerator::new(
                    Arc::clone(provider),
                    self.classifier.model.clone(),
                )),
            )
            .with_classifier(IntentClassifier::new(
                Arc::clone(provider),
                self.classifier.clone(),
            )),
            None => DemoCollaborators::new(
                Arc::new(LoggingBrowser),
                Arc::new(LoggingSpeech),
                Arc::new(NoInputCapture),
                Arc::new(NoAnswerGenerator),
            ),
        }
    }
}

/// Preloads saved demos from `DEMOPILOT_DEMOS_DIR`, or `./demos` when present.
fn load_catalog() -> ScriptCatalog {
    let mut catalog = ScriptCatalog::new();
    let dir = match std::env::var("DEMOPILOT_DEMOS_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => PathBuf::from("demos"),
    };
    if !dir.is_dir() {
        return catalog;
    }
    match catalog.load_dir(&dir) {
        Ok(ids) => tracing::info!("loaded {} saved demos from {}", ids.len(), dir.display()),
        Err(e) => tracing::warn!("failed to load saved demos from {}: {}", dir.display(), e),
    }
    catalog
}

#[derive(Serialize)]
struct DemoSummary {
    id: String,
    product_name: String,
}

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
}

#[derive(Serialize)]
struct InterruptAccepted {
    replaced_pending: bool,
}

async fn start_demo(
    State(state): State<Arc<AppState>>,
    Json(config): Json<RawDemoConfig>,
) -> impl IntoResponse {
    let handle = match state
        .registry
        .create_from_config(config, state.collaborators())
        .await
    {
        Ok(handle) => handle,
        Err(e) => return bad_request(format!("Invalid demo configuration: {}", e)),
    };

    handle.run();
    Json(ApiResponse {
        data: Some(handle.status()),
        message: Some("Demo started".into()),
        success: true,
    })
    .into_response()
}

async fn ask_question(
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuestionRequest>,
) -> impl IntoResponse {
    let Some(handle) = state.registry.current().await else {
        return no_active_demo();
    };

    match handle.ask(req.question) {
        Ok(replaced_pending) => Json(ApiResponse {
            data: InterruptAccepted { replaced_pending },
            message: Some("Question received".into()),
            success: true,
        })
        .into_response(),
        Err(e) => conflict(format!("Demo is no longer accepting questions: {}", e)),
    }
}

async fn listen(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = state.registry.current().await else {
        return no_active_demo();
    };

    match handle.listen() {
        Ok(replaced_pending) => Json(ApiResponse {
            data: InterruptAccepted { replaced_pending },
            message: Some("Listening".into()),
            success: true,
        })
        .into_response(),
        Err(e) => conflict(format!("Demo is no longer listening: {}", e)),
    }
}

async fn demo_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = state.registry.current().await else {
        return no_active_demo();
    };

    Json(ApiResponse {
        data: handle.status(),
        message: None,
        success: true,
    })
    .into_response()
}

async fn end_demo(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.end_current().await {
        Some(id) => Json(ApiResponse {
            data: serde_json::json!({ "id": id }),
            message: Some("Demo ended".into()),
            success: true,
        })
        .into_response(),
        None => no_active_demo(),
    }
}

async fn list_demos(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let demos: Vec<DemoSummary> = state
        .catalog
        .read()
        .await
        .list()
        .into_iter()
        .map(|(id, product_name)| DemoSummary { id, product_name })
        .collect();

    Json(ApiResponse {
        data: demos,
        message: None,
        success: true,
    })
}

async fn create_demo(
    State(state): State<Arc<AppState>>,
    Json(config): Json<RawDemoConfig>,
) -> impl IntoResponse {
    let script = match DemoScript::load(config) {
        Ok(script) => script,
        Err(e) => return bad_request(format!("Invalid demo configuration: {}", e)),
    };

    let id = state.catalog.write().await.add(script);
    Json(ApiResponse {
        data: serde_json::json!({ "id": id }),
        message: Some("Demo saved".into()),
        success: true,
    })
    .into_response()
}

async fn get_demo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(script) = state.catalog.read().await.get(&id) else {
        return demo_not_found(&id);
    };

    Json(ApiResponse {
        data: script.to_config(),
        message: None,
        success: true,
    })
    .into_response()
}

async fn run_demo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(script) = state.catalog.read().await.get(&id) else {
        return demo_not_found(&id);
    };

    let handle = state.registry.create(script, state.collaborators()).await;
    handle.run();
    Json(ApiResponse {
        data: Some(handle.status()),
        message: Some("Demo started".into()),
        success: true,
    })
    .into_response()
}

fn demo_not_found(id: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ApiResponse {
        data: (),
        message: Some(format!("Demo '{}' not found", id)),
        success: false,
    }))
    .into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse {
        data: (),
        message: Some(message),
        success: false,
    }))
    .into_response()
}

fn no_active_demo() -> Response {
    (StatusCode::NOT_FOUND, Json(ApiResponse {
        data: (),
        message: Some("No active demo".into()),
        success: false,
    }))
    .into_response()
}

fn conflict(message: String) -> Response {
    (StatusCode::CONFLICT, Json(ApiResponse {
        data: (),
        message: Some(message),
        success: false,
    }))
    .into_response()
}

#[derive(Serialize)]
struct ApiResponse<T> {
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    success: bool,
}
