// Prompt-to-application generation with template fallback

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::models::{language_for_path, ProjectFile, TechStack};
use crate::services::llm::{ChatMessage, CompletionClient, CompletionRequest, LlmError};
use crate::services::templates::{self, FallbackTemplate};

pub const GENERATION_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Integration {
    Auth,
    Database,
    Openai,
    StableDiffusion,
    Stripe,
}

impl Integration {
    pub fn as_str(self) -> &'static str {
        match self {
            Integration::Auth => "auth",
            Integration::Database => "database",
            Integration::Openai => "openai",
            Integration::StableDiffusion => "stable_diffusion",
            Integration::Stripe => "stripe",
        }
    }

    pub fn backend_dependencies(self) -> &'static [&'static str] {
        match self {
            Integration::Auth => &["python-jose[cryptography]", "python-multipart"],
            Integration::Database => &["motor"],
            Integration::Openai => &["openai"],
            Integration::StableDiffusion => &["replicate"],
            Integration::Stripe => &["stripe"],
        }
    }

    pub fn frontend_dependencies(self) -> &'static [&'static str] {
        match self {
            Integration::Stripe => &["@stripe/stripe-js", "@stripe/react-stripe-js"],
            _ => &[],
        }
    }

    pub fn env_vars(self) -> &'static [&'static str] {
        match self {
            Integration::Auth => &["JWT_SECRET"],
            Integration::Database => &["MONGO_URL", "DB_NAME"],
            Integration::Openai => &["OPENAI_API_KEY"],
            Integration::StableDiffusion => &["REPLICATE_API_TOKEN"],
            Integration::Stripe => &["STRIPE_SECRET_KEY", "STRIPE_PUBLIC_KEY"],
        }
    }

    fn guidance(self) -> &'static str {
        match self {
            Integration::Auth => {
                "JWT bearer auth: FastAPI dependency decoding HS256 tokens signed with JWT_SECRET; \
                 the frontend stores the token and sends an Authorization header."
            }
            Integration::Database => {
                "MongoDB through motor (AsyncIOMotorClient(MONGO_URL)[DB_NAME]) with \
                 create/list/update/delete helpers used by every endpoint."
            }
            Integration::Openai => {
                "OpenAI chat completions via AsyncOpenAI(api_key=OPENAI_API_KEY), called from a \
                 backend endpoint; the frontend never sees the key."
            }
            Integration::StableDiffusion => {
                "Image generation through replicate.run with REPLICATE_API_TOKEN, returned as a URL."
            }
            Integration::Stripe => {
                "Stripe PaymentIntents on the backend (STRIPE_SECRET_KEY) and \
                 @stripe/react-stripe-js Elements on the frontend."
            }
        }
    }
}

fn mentions(prompt: &str, keyword: &str) -> bool {
    // Short keywords only count as whole words ("ai" must not match "email")
    if keyword.len() <= 3 {
        prompt
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == keyword)
    } else {
        prompt.contains(keyword)
    }
}

pub fn detect_integrations(prompt: &str) -> BTreeSet<Integration> {
    let prompt = prompt.to_lowercase();
    let any = |words: &[&str]| words.iter().any(|w| mentions(&prompt, w));

    let mut found = BTreeSet::new();

    if any(&["ai", "gpt", "chatbot", "generate text", "openai"]) {
        found.insert(Integration::Openai);
    }
    if any(&["image", "midjourney", "dall-e", "stable diffusion", "picture"])
        && !found.contains(&Integration::Openai)
    {
        found.insert(Integration::StableDiffusion);
    }
    if any(&[
        "payment", "checkout", "buy", "purchase", "ecommerce", "shop", "stripe",
    ]) {
        found.insert(Integration::Stripe);
    }
    if any(&["login", "signup", "user", "account", "auth", "register"]) {
        found.insert(Integration::Auth);
    }
    found.insert(Integration::Database);

    found
}

pub fn build_prompts(
    prompt: &str,
    stack: &TechStack,
    integrations: &BTreeSet<Integration>,
) -> (String, String) {
    let integration_list = integrations
        .iter()
        .map(|i| i.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let integration_docs = integrations
        .iter()
        .map(|i| format!("- {}: {}", i.as_str(), i.guidance()))
        .collect::<Vec<_>>()
        .join("\n");

    let system = format!(
        r#"You are a senior full-stack engineer who turns product ideas into complete, runnable applications.

Tech stack:
- Frontend: {frontend} (deployed as a static build)
- Backend: {backend} (deployed as a web service)
- Database: {database}

Integrations required by this request: {integration_list}
{integration_docs}

Requirements:
1. Every file must be complete and runnable. No placeholders, no TODO comments, no empty handlers.
2. The frontend calls the backend over HTTP with loading and error states.
3. Include package.json, requirements.txt and .env.example listing every environment variable.
4. Use responsive CSS (flexbox or grid with media queries).

Respond with ONLY a JSON object, no markdown and no commentary:
{{
  "app_name": "short-kebab-case-name",
  "description": "one sentence",
  "required_services": ["database"],
  "files": [
    {{"path": "frontend/src/App.js", "content": "...", "language": "javascript"}},
    {{"path": "backend/main.py", "content": "...", "language": "python"}}
  ],
  "setup_instructions": "how to run it locally",
  "deployment_notes": "how to deploy it"
}}"#,
        frontend = stack.frontend,
        backend = stack.backend,
        database = stack.database,
    );

    let user = format!(
        "Build a complete, working application for: {prompt}\n\n\
         Return the JSON object with the full source of every file now."
    );

    (system, user)
}

/// Removes a surrounding Markdown code fence (with or without an info
/// string such as `json`). Text without a fence is only trimmed.
pub fn strip_code_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(start) = text.find("```") else {
        return text;
    };

    let after = &text[start + 3..];
    let body = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            &after[nl + 1..]
        }
        _ => after,
    };

    match body.find("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// The widest `{ ... }` span in the text.
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("response contains no files")]
    NoFiles,

    #[error("file #{0} has no path")]
    MissingPath(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Deserialize)]
struct RawApp {
    app_name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    required_services: Vec<String>,
    #[serde(default)]
    files: Vec<RawFile>,
    setup_instructions: Option<String>,
    deployment_notes: Option<String>,
}

#[derive(Deserialize)]
struct RawFile {
    path: Option<String>,
    #[serde(default)]
    content: Value,
    language: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationSource {
    Llm,
    Fallback {
        template: FallbackTemplate,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedApp {
    pub app_name: String,
    pub description: String,
    pub required_services: Vec<String>,
    pub files: Vec<ProjectFile>,
    pub setup_instructions: Option<String>,
    pub deployment_notes: Option<String>,
    pub source: GenerationSource,
}

impl GeneratedApp {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, GenerationSource::Fallback { .. })
    }
}

/// Decode a JSON object from a model reply, tolerating code fences and
/// chatter around it.
pub fn decode_json_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    let trimmed = text.trim();
    serde_json::from_str(trimmed)
        .or_else(|first| {
            let unfenced = strip_code_fences(trimmed);
            serde_json::from_str(unfenced).or_else(|_| match outer_object(unfenced) {
                Some(object) => serde_json::from_str(object),
                None => Err(first),
            })
        })
        .or_else(|err| match outer_object(trimmed) {
            Some(object) => serde_json::from_str(object),
            None => Err(err),
        })
}

/// Parse a model reply into an application.
pub fn parse_app_response(text: &str) -> Result<GeneratedApp, ParseError> {
    let raw: RawApp = decode_json_reply(text)?;

    if raw.files.is_empty() {
        return Err(ParseError::NoFiles);
    }

    let mut files = Vec::with_capacity(raw.files.len());
    for (index, file) in raw.files.into_iter().enumerate() {
        let path = file
            .path
            .map(|p| p.trim().trim_start_matches("./").to_string())
            .filter(|p| !p.is_empty())
            .ok_or(ParseError::MissingPath(index))?;

        // Models sometimes inline JSON documents (package.json) as objects
        let content = match file.content {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => serde_json::to_string_pretty(&other)?,
        };

        let language = file
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| language_for_path(&path));

        files.push(ProjectFile {
            path,
            content,
            language,
        });
    }

    Ok(GeneratedApp {
        app_name: raw
            .app_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "generated-app".to_string()),
        description: raw.description.unwrap_or_default(),
        required_services: raw.required_services,
        files,
        setup_instructions: raw.setup_instructions,
        deployment_notes: raw.deployment_notes,
        source: GenerationSource::Llm,
    })
}

/// Add integration dependencies to manifests the model produced.
pub fn inject_integrations(app: &mut GeneratedApp, integrations: &BTreeSet<Integration>) {
    for file in app.files.iter_mut() {
        if file.path.ends_with("requirements.txt") {
            for dep in integrations.iter().flat_map(|i| i.backend_dependencies()) {
                let present = file.content.lines().any(|line| {
                    line.trim()
                        .split(|c: char| c == '=' || c == '>' || c == '<' || c == '~')
                        .next()
                        == Some(*dep)
                });
                if !present {
                    if !file.content.is_empty() && !file.content.ends_with('\n') {
                        file.content.push('\n');
                    }
                    file.content.push_str(dep);
                    file.content.push('\n');
                }
            }
        } else if file.path.ends_with("package.json") {
            let deps: Vec<&str> = integrations
                .iter()
                .flat_map(|i| i.frontend_dependencies())
                .copied()
                .collect();
            if deps.is_empty() {
                continue;
            }

            let Ok(mut manifest) = serde_json::from_str::<Value>(&file.content) else {
                tracing::warn!("Skipping unparsable manifest {}", file.path);
                continue;
            };
            let Some(root) = manifest.as_object_mut() else {
                continue;
            };

            let dependencies = root
                .entry("dependencies")
                .or_insert_with(|| json!({}));
            if let Some(map) = dependencies.as_object_mut() {
                for dep in deps {
                    map.entry(dep.to_string())
                        .or_insert_with(|| Value::String("latest".to_string()));
                }
            }

            if let Ok(content) = serde_json::to_string_pretty(&manifest) {
                file.content = content;
            }
        }
    }
}

fn readme(app: &GeneratedApp, stack: &TechStack) -> String {
    format!(
        "# {name}\n\n{description}\n\n## Tech Stack\n\n\
         - **Frontend**: {frontend}\n- **Backend**: {backend}\n- **Database**: {database}\n\n\
         ## Setup\n\n{setup}\n\n## Deployment\n\n{deploy}\n",
        name = app.app_name,
        description = if app.description.is_empty() {
            "Generated application."
        } else {
            &app.description
        },
        frontend = stack.frontend,
        backend = stack.backend,
        database = stack.database,
        setup = app.setup_instructions.as_deref().unwrap_or(
            "Run `npm install && npm start` in frontend/ and \
             `pip install -r requirements.txt && uvicorn main:app` in backend/."
        ),
        deploy = app
            .deployment_notes
            .as_deref()
            .unwrap_or("Deploy the frontend as a static site and the backend as a web service."),
    )
}

const GITIGNORE: &str = "# Dependencies
node_modules/
__pycache__/
*.pyc
venv/

# Environment
.env
.env.local

# Build output
build/
dist/

# Editors and OS
.vscode/
.idea/
.DS_Store

# Logs
*.log
npm-debug.log*
";

fn vercel_json() -> String {
    let config = json!({
        "version": 2,
        "builds": [
            {"src": "package.json", "use": "@vercel/static-build", "config": {"distDir": "build"}}
        ],
        "routes": [
            {"src": "/static/(.*)", "dest": "/static/$1"},
            {"src": "/(.*)", "dest": "/index.html"}
        ]
    });
    serde_json::to_string_pretty(&config).unwrap_or_default()
}

fn env_example(integrations: &BTreeSet<Integration>) -> String {
    let mut lines = vec!["REACT_APP_API_URL=http://localhost:8001".to_string()];
    lines.extend(
        integrations
            .iter()
            .flat_map(|i| i.env_vars())
            .map(|var| format!("{var}=")),
    );
    lines.join("\n") + "\n"
}

fn has_file(files: &[ProjectFile], pred: impl Fn(&str) -> bool) -> bool {
    files.iter().any(|f| pred(&f.path))
}

/// Add the boilerplate files every project needs, leaving existing ones
/// untouched.
pub fn augment_boilerplate(
    app: &mut GeneratedApp,
    stack: &TechStack,
    integrations: &BTreeSet<Integration>,
) {
    if !has_file(&app.files, |p| p.ends_with("package.json")) {
        let manifest = templates::package_json(&app.app_name);
        app.files
            .push(ProjectFile::new("frontend/package.json", manifest));
    }
    if !has_file(&app.files, |p| p == "vercel.json") {
        app.files.push(ProjectFile::new("vercel.json", vercel_json()));
    }
    if !has_file(&app.files, |p| p == ".env.example") {
        app.files
            .push(ProjectFile::new(".env.example", env_example(integrations)));
    }
    if !has_file(&app.files, |p| p == ".gitignore") {
        app.files.push(ProjectFile::new(".gitignore", GITIGNORE));
    }
    if !has_file(&app.files, |p| p.ends_with("README.md")) {
        let content = readme(app, stack);
        app.files.push(ProjectFile::new("README.md", content));
    }
}

pub fn fallback_app(prompt: &str, stack: &TechStack, reason: String) -> GeneratedApp {
    let template = templates::select_fallback(prompt);
    tracing::warn!(
        template = ?template,
        "Using fallback template: {reason}"
    );

    let mut app = GeneratedApp {
        app_name: template.app_name().to_string(),
        description: template.description().to_string(),
        required_services: Vec::new(),
        files: template.files(),
        setup_instructions: Some("Run `npm install && npm start` in frontend/.".to_string()),
        deployment_notes: None,
        source: GenerationSource::Fallback { template, reason },
    };
    augment_boilerplate(&mut app, stack, &BTreeSet::new());
    app
}

pub struct BuilderService {
    llm: Arc<dyn CompletionClient>,
    max_tokens: u32,
}

impl BuilderService {
    pub fn new(llm: Arc<dyn CompletionClient>, max_tokens: u32) -> Self {
        Self { llm, max_tokens }
    }

    async fn generate_with_model(
        &self,
        prompt: &str,
        stack: &TechStack,
        integrations: &BTreeSet<Integration>,
    ) -> Result<GeneratedApp, GenerateError> {
        let (system, user) = build_prompts(prompt, stack, integrations);
        let reply = self
            .llm
            .complete(CompletionRequest {
                messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
                temperature: GENERATION_TEMPERATURE,
                max_tokens: self.max_tokens,
            })
            .await?;

        parse_app_response(&reply).map_err(|err| {
            let preview: String = reply.chars().take(300).collect();
            tracing::error!("Could not parse model reply: {err}; reply starts with: {preview}");
            GenerateError::from(err)
        })
    }

    /// Always yields an application; model failures of any kind fall back to
    /// a static template chosen from the prompt.
    pub async fn generate(&self, prompt: &str, stack: &TechStack) -> GeneratedApp {
        let integrations = detect_integrations(prompt);
        tracing::info!(
            integrations = ?integrations,
            "Generating application for prompt: {prompt}"
        );

        match self.generate_with_model(prompt, stack, &integrations).await {
            Ok(mut app) => {
                if app.required_services.is_empty() {
                    app.required_services =
                        integrations.iter().map(|i| i.as_str().to_string()).collect();
                }
                inject_integrations(&mut app, &integrations);
                augment_boilerplate(&mut app, stack, &integrations);
                tracing::info!("Generated {} with {} files", app.app_name, app.files.len());
                app
            }
            Err(err) => fallback_app(prompt, stack, err.to_string()),
        }
    }
}
