use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::post,
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::{
    db::{models::Project, projects},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::{
        builder::decode_json_reply,
        llm::{ChatMessage, CompletionRequest},
        snapshots,
    },
    AppState,
};

const CHAT_TEMPERATURE: f32 = 0.7;
const CHAT_MAX_TOKENS: u32 = 2000;
const HISTORY_LIMIT: usize = 20;

const BUILD_UNAVAILABLE: &str =
    "The code assistant is unavailable right now, so no files were changed. Please try again shortly.";

/// Mounted under `/projects`.
pub fn project_router() -> Router<AppState> {
    Router::new()
        .route("/:id/chat/plan", post(plan))
        .route("/:id/chat/build", post(build))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/message", post(message))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    fn validate(&self) -> Result<()> {
        if self.message.trim().is_empty() {
            return Err(AppError::Validation("Message is required".to_string()));
        }
        Ok(())
    }

    /// System prompt, the most recent history and the new message.
    fn conversation(&self, system: String) -> Vec<ChatMessage> {
        let skip = self.history.len().saturating_sub(HISTORY_LIMIT);
        std::iter::once(ChatMessage::system(system))
            .chain(
                self.history
                    .iter()
                    .skip(skip)
                    .filter(|m| m.role == "user" || m.role == "assistant")
                    .cloned(),
            )
            .chain(std::iter::once(ChatMessage::user(self.message.trim())))
            .collect()
    }
}

fn file_listing(project: &Project) -> String {
    if project.files.is_empty() {
        return "(no files yet)".to_string();
    }
    project
        .files
        .iter()
        .map(|f| format!("- {}", f.path))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Planning reply used when the model cannot be reached.
pub fn fallback_plan(project: &Project, message: &str) -> String {
    format!(
        "Here is how I would approach \"{request}\" in {name}:\n\n\
         1. Review the {count} existing files and find the components involved.\n\
         2. Describe the data and API changes the feature needs.\n\
         3. Update the backend endpoints first, then the frontend views that call them.\n\
         4. Add loading and error states for every new request.\n\
         5. Check the layout on small screens before shipping.\n\n\
         Switch to build mode when you are ready and I will apply the changes.",
        request = message.trim(),
        name = project.name,
        count = project.files.len(),
    )
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub response: String,
    pub fallback: bool,
}

async fn plan(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<PlanResponse>> {
    body.validate()?;
    let project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;

    let system = format!(
        "You are a senior engineer planning changes to the application \"{}\".\n\
         Project files:\n{}\n\n\
         Answer with a short, numbered plan. Do not write code yet.",
        project.name,
        file_listing(&project)
    );

    let request = CompletionRequest {
        messages: body.conversation(system),
        temperature: CHAT_TEMPERATURE,
        max_tokens: CHAT_MAX_TOKENS,
    };

    let response = match state.llm.complete(request).await {
        Ok(reply) => PlanResponse {
            response: reply,
            fallback: false,
        },
        Err(err) => {
            tracing::warn!("Planning reply unavailable: {err}");
            PlanResponse {
                response: fallback_plan(&project, &body.message),
                fallback: true,
            }
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct FileUpdate {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct BuildReply {
    response: String,
    #[serde(default)]
    file_updates: Vec<FileUpdate>,
}

#[derive(Debug, Serialize)]
pub struct BuildResponse {
    pub response: String,
    pub files_updated: Vec<String>,
    pub snapshot_id: Option<String>,
}

async fn build(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<BuildResponse>> {
    body.validate()?;
    let mut project = projects::fetch_owned(&state.db.pool, &id, &user.id).await?;
    let keep = state.config.snapshot_keep;

    // Capture the pre-change state so the build can be rolled back
    snapshots::auto_snapshot_on_change(&state.db.pool, &project.id, &user.id, &project.files, keep)
        .await?;

    let sources = project
        .files
        .iter()
        .map(|f| format!("--- {} ---\n{}", f.path, f.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    let system = format!(
        "You are a senior engineer editing the application \"{}\".\n\
         Current files:\n\n{}\n\n\
         Apply the user's request. Respond with ONLY a JSON object:\n\
         {{\"response\": \"what you changed\", \"file_updates\": [{{\"path\": \"...\", \"content\": \"full new file content\"}}]}}",
        project.name, sources
    );

    let request = CompletionRequest {
        messages: body.conversation(system),
        temperature: CHAT_TEMPERATURE,
        max_tokens: state.config.openai_max_tokens,
    };

    let reply = match state.llm.complete(request).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!("Build reply unavailable: {err}");
            return Ok(Json(BuildResponse {
                response: BUILD_UNAVAILABLE.to_string(),
                files_updated: Vec::new(),
                snapshot_id: None,
            }));
        }
    };

    let parsed: BuildReply = match decode_json_reply(&reply) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!("Build reply was not JSON: {err}");
            return Ok(Json(BuildResponse {
                response: reply,
                files_updated: Vec::new(),
                snapshot_id: None,
            }));
        }
    };

    let mut files_updated = Vec::new();
    for update in parsed.file_updates {
        let path = update.path.trim().trim_start_matches("./");
        if path.is_empty() {
            continue;
        }
        projects::upsert_file(&mut project.files, path, update.content);
        files_updated.push(path.to_string());
    }

    let snapshot_id = if files_updated.is_empty() {
        None
    } else {
        projects::replace_files(&state.db.pool, &project.id, &project.files, None).await?;
        tracing::info!(
            "Chat build updated {} files in {}",
            files_updated.len(),
            project.id
        );
        snapshots::auto_snapshot_on_change(
            &state.db.pool,
            &project.id,
            &user.id,
            &project.files,
            keep,
        )
        .await?
    };

    Ok(Json(BuildResponse {
        response: parsed.response,
        files_updated,
        snapshot_id,
    }))
}

async fn message(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    body.validate()?;

    let (sender, receiver) = mpsc::channel::<String>(64);

    tokio::spawn(async move {
        let request = CompletionRequest {
            messages: body.conversation("You are a helpful assistant for building web applications.".to_string()),
            temperature: CHAT_TEMPERATURE,
            max_tokens: CHAT_MAX_TOKENS,
        };

        let reply = match state.llm.complete(request).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!("Chat reply unavailable, echoing: {err}");
                body.message.trim().to_string()
            }
        };

        for word in reply.split_whitespace() {
            if sender.send(word.to_string()).await.is_err() {
                return;
            }
        }
        let _ = sender.send("[DONE]".to_string()).await;
    });

    let stream = ReceiverStream::new(receiver).map(|word| Ok::<_, Infallible>(Event::default().data(word)));
    Ok(Sse::new(stream))
}
