use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::{
    db::{
        models::{Project, TechStack},
        new_id,
        projects::{self, NewProject},
    },
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        analytics,
        builder::{detect_integrations, GeneratedApp, GenerationSource},
        quality::{self, QualityReport},
        snapshots,
    },
    AppState,
};

const EVENT_BUFFER: usize = 32;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/generate/stream", post(generate_stream))
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub tech_stack: TechStack,
    pub name: Option<String>,
}

impl GenerateRequest {
    fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation("Prompt is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub project: Project,
    pub source: GenerationSource,
    pub quality: QualityReport,
    pub required_services: Vec<String>,
    pub setup_instructions: Option<String>,
    pub deployment_notes: Option<String>,
}

async fn store_generated(
    state: &AppState,
    user: &AuthUser,
    request: &GenerateRequest,
    app: &GeneratedApp,
) -> Result<Project> {
    let project_id = new_id("proj");
    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&app.app_name);

    let project = projects::insert(
        &state.db.pool,
        NewProject {
            id: &project_id,
            user_id: &user.id,
            name,
            description: &app.description,
            prompt: request.prompt.trim(),
            tech_stack: &request.tech_stack,
            files: &app.files,
        },
    )
    .await?;

    snapshots::create_snapshot(
        &state.db.pool,
        &project.id,
        &user.id,
        &project.files,
        Some("Initial generation"),
        true,
    )
    .await?;

    if let Err(err) = analytics::track_event(
        &state.db.pool,
        &project.id,
        "generation",
        &json!({"source": app.source, "files": project.files.len()}),
        Some(&user.id),
    )
    .await
    {
        tracing::warn!("Failed to track generation of {}: {err}", project.id);
    }

    Ok(project)
}

async fn generate(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    body.validate()?;

    let app = state.builder.generate(body.prompt.trim(), &body.tech_stack).await;
    let project = store_generated(&state, &user, &body, &app).await?;
    let quality = quality::inspect(&project.files);

    Ok(Json(GenerateResponse {
        project,
        source: app.source,
        quality,
        required_services: app.required_services,
        setup_instructions: app.setup_instructions,
        deployment_notes: app.deployment_notes,
    }))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    Progress {
        stage: &'static str,
        message: String,
    },
    File {
        path: String,
        language: String,
    },
    Complete {
        project_id: String,
        name: String,
        source: GenerationSource,
        files: usize,
        quality: QualityReport,
    },
    Error {
        message: String,
    },
}

impl GenerationEvent {
    fn progress(stage: &'static str, message: impl Into<String>) -> Self {
        GenerationEvent::Progress {
            stage,
            message: message.into(),
        }
    }

    fn to_sse(&self) -> Event {
        Event::default()
            .json_data(self)
            .unwrap_or_else(|_| Event::default().data(r#"{"type":"error","message":"encoding failed"}"#))
    }
}

async fn run_generation(
    state: AppState,
    user: AuthUser,
    request: GenerateRequest,
    sender: mpsc::Sender<GenerationEvent>,
) -> Result<()> {
    let send = |event: GenerationEvent| {
        let sender = sender.clone();
        async move {
            // The client may have gone away; generation still completes
            let _ = sender.send(event).await;
        }
    };

    let integrations = detect_integrations(&request.prompt);
    let names: Vec<&str> = integrations.iter().map(|i| i.as_str()).collect();
    send(GenerationEvent::progress(
        "analyzing",
        format!("Detected integrations: {}", names.join(", ")),
    ))
    .await;

    send(GenerationEvent::progress(
        "generating",
        "Generating application code",
    ))
    .await;
    let app = state
        .builder
        .generate(request.prompt.trim(), &request.tech_stack)
        .await;

    if let GenerationSource::Fallback { template, .. } = &app.source {
        send(GenerationEvent::progress(
            "fallback",
            format!("Using the {} template", template.app_name()),
        ))
        .await;
    }

    for file in &app.files {
        send(GenerationEvent::File {
            path: file.path.clone(),
            language: file.language.clone(),
        })
        .await;
    }

    send(GenerationEvent::progress("saving", "Saving project")).await;
    let project = store_generated(&state, &user, &request, &app).await?;
    let quality = quality::inspect(&project.files);

    send(GenerationEvent::Complete {
        project_id: project.id,
        name: project.name,
        source: app.source,
        files: project.files.len(),
        quality,
    })
    .await;

    Ok(())
}

async fn generate_stream(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    body.validate()?;

    let (sender, receiver) = mpsc::channel::<GenerationEvent>(EVENT_BUFFER);

    tokio::spawn(async move {
        let errors = sender.clone();
        if let Err(err) = run_generation(state, user, body, sender).await {
            tracing::error!("Streaming generation failed: {err}");
            let _ = errors
                .send(GenerationEvent::Error {
                    message: err.to_string(),
                })
                .await;
        }
    });

    let stream = ReceiverStream::new(receiver).map(|event| Ok::<_, Infallible>(event.to_sse()));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
