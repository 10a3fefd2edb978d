// Deployment planning: config generation, stage checks, API URL rewriting

use lazy_static::lazy_static;
use regex::{Captures, NoExpand, Regex};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::models::ProjectFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Vercel,
    Render,
    Railway,
    Netlify,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Vercel => "vercel",
            Platform::Render => "render",
            Platform::Railway => "railway",
            Platform::Netlify => "netlify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ready,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Backend,
    Frontend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub status: StageStatus,
    pub file_count: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub platform: Platform,
    pub status: String,
    pub stages: Vec<StageReport>,
    pub added_files: Vec<String>,
    pub files: Vec<ProjectFile>,
}

fn stage_of(path: &str) -> Option<StageKind> {
    if path.starts_with("backend/") || path.ends_with(".py") || path == "requirements.txt" {
        Some(StageKind::Backend)
    } else if path.starts_with("frontend/")
        || path.starts_with("src/")
        || path.starts_with("public/")
        || path == "package.json"
    {
        Some(StageKind::Frontend)
    } else {
        None
    }
}

lazy_static! {
    static ref SINGLE_QUOTED: Regex =
        Regex::new(r"'http://localhost:800[01]([^'\n]*)'").unwrap();
    static ref DOUBLE_QUOTED: Regex =
        Regex::new(r#""http://localhost:800[01]([^"\n]*)""#).unwrap();
    static ref BARE: Regex = Regex::new(r"http://localhost:800[01]").unwrap();
}

const API_URL_ENV: &str = "process.env.REACT_APP_API_URL";

fn env_expression(caps: &Captures) -> String {
    match &caps[1] {
        "" => API_URL_ENV.to_string(),
        rest => format!("`${{{API_URL_ENV}}}{rest}`"),
    }
}

/// Replace hard-coded local backend URLs with the deploy-time environment
/// variable. Quoted literals become expressions; anything left over is
/// assumed to sit inside a template literal.
pub fn rewrite_api_urls(source: &str) -> String {
    let source = SINGLE_QUOTED.replace_all(source, env_expression);
    let source = DOUBLE_QUOTED.replace_all(&source, env_expression);
    let interpolated = format!("${{{API_URL_ENV}}}");
    BARE.replace_all(&source, NoExpand(&interpolated))
        .into_owned()
}

fn is_script(path: &str) -> bool {
    [".js", ".jsx", ".ts", ".tsx", ".mjs"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

fn vercel_json() -> String {
    let config = json!({
        "version": 2,
        "builds": [
            {"src": "frontend/package.json", "use": "@vercel/static-build", "config": {"distDir": "build"}}
        ],
        "routes": [{"src": "/(.*)", "dest": "/frontend/$1"}]
    });
    serde_json::to_string_pretty(&config).unwrap_or_default()
}

fn render_yaml(app_name: &str, backend: bool, frontend: bool) -> String {
    let mut out = String::from("services:\n");
    if backend {
        out.push_str(&format!(
            "  - type: web\n    name: {app_name}-backend\n    env: python\n    rootDir: backend\n    \
             buildCommand: pip install -r requirements.txt\n    \
             startCommand: uvicorn main:app --host 0.0.0.0 --port $PORT\n"
        ));
    }
    if frontend {
        out.push_str(&format!(
            "  - type: web\n    name: {app_name}-frontend\n    env: static\n    rootDir: frontend\n    \
             buildCommand: npm install && npm run build\n    staticPublishPath: build\n"
        ));
    }
    out
}

fn docker_compose(backend: bool, frontend: bool) -> String {
    let mut out = String::from("services:\n");
    if backend {
        out.push_str(
            "  backend:\n    build: ./backend\n    ports:\n      - \"8001:8001\"\n    env_file:\n      - .env\n",
        );
    }
    if frontend {
        out.push_str("  frontend:\n    build: ./frontend\n    ports:\n      - \"3000:80\"\n");
        if backend {
            out.push_str("    depends_on:\n      - backend\n");
        }
    }
    out
}

const BACKEND_DOCKERFILE: &str = "FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
EXPOSE 8001
CMD [\"uvicorn\", \"main:app\", \"--host\", \"0.0.0.0\", \"--port\", \"8001\"]
";

const FRONTEND_DOCKERFILE: &str = "FROM node:20-alpine AS build
WORKDIR /app
COPY package.json .
RUN npm install
COPY . .
RUN npm run build

FROM nginx:alpine
COPY --from=build /app/build /usr/share/nginx/html
EXPOSE 80
";

fn check_stage(stage: StageKind, files: &[&ProjectFile]) -> StageReport {
    let (manifest, label) = match stage {
        StageKind::Backend => ("requirements.txt", "Backend"),
        StageKind::Frontend => ("package.json", "Frontend"),
    };

    let (status, message) = if files.is_empty() {
        (StageStatus::Skipped, format!("{label} has no files"))
    } else if files.iter().any(|f| f.path.ends_with(manifest)) {
        (
            StageStatus::Ready,
            format!("{label} ready with {} files", files.len()),
        )
    } else {
        (StageStatus::Failed, format!("{label} is missing {manifest}"))
    };

    StageReport {
        stage,
        status,
        file_count: files.len(),
        message,
    }
}

/// Build a deployment plan for a project's files. Nothing is sent to the
/// hosting platform.
pub fn prepare(files: &[ProjectFile], platform: Platform, app_name: &str) -> DeploymentPlan {
    let mut files: Vec<ProjectFile> = files
        .iter()
        .map(|file| {
            let mut file = file.clone();
            if stage_of(&file.path) == Some(StageKind::Frontend) && is_script(&file.path) {
                file.content = rewrite_api_urls(&file.content);
            }
            file
        })
        .collect();

    let has_backend = files.iter().any(|f| stage_of(&f.path) == Some(StageKind::Backend));
    let has_frontend = files.iter().any(|f| stage_of(&f.path) == Some(StageKind::Frontend));

    let mut added_files = Vec::new();
    let mut add = |files: &mut Vec<ProjectFile>, path: &str, content: String| {
        if !files.iter().any(|f| f.path == path) {
            files.push(ProjectFile::new(path, content));
            added_files.push(path.to_string());
        }
    };

    add(&mut files, "vercel.json", vercel_json());
    add(&mut files, "render.yaml", render_yaml(app_name, has_backend, has_frontend));
    add(&mut files, "docker-compose.yml", docker_compose(has_backend, has_frontend));
    if has_frontend {
        add(&mut files, "frontend/Dockerfile", FRONTEND_DOCKERFILE.to_string());
    }
    if has_backend {
        add(&mut files, "backend/Dockerfile", BACKEND_DOCKERFILE.to_string());
    }

    let backend: Vec<&ProjectFile> = files
        .iter()
        .filter(|f| stage_of(&f.path) == Some(StageKind::Backend))
        .collect();
    let frontend: Vec<&ProjectFile> = files
        .iter()
        .filter(|f| stage_of(&f.path) == Some(StageKind::Frontend))
        .collect();

    // Backend goes first so the frontend can point at it
    let stages = vec![
        check_stage(StageKind::Backend, &backend),
        check_stage(StageKind::Frontend, &frontend),
    ];

    let status = if stages[0].status == StageStatus::Failed {
        "backend_failed"
    } else if stages[1].status == StageStatus::Failed {
        "frontend_failed"
    } else {
        "prepared"
    };

    tracing::info!(
        platform = platform.as_str(),
        status,
        added = added_files.len(),
        "Prepared deployment for {app_name}"
    );

    DeploymentPlan {
        platform,
        status: status.to_string(),
        stages,
        added_files,
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_stack() -> Vec<ProjectFile> {
        vec![
            ProjectFile::new(
                "frontend/src/App.js",
                "fetch('http://localhost:8001/api/items');\nconst base = \"http://localhost:8000\";",
            ),
            ProjectFile::new("frontend/package.json", "{}"),
            ProjectFile::new("backend/main.py", "app = FastAPI()"),
            ProjectFile::new("backend/requirements.txt", "fastapi\n"),
        ]
    }

    #[test]
    fn test_rewrite_api_urls() {
        assert_eq!(
            rewrite_api_urls("fetch('http://localhost:8001/api/items')"),
            "fetch(`${process.env.REACT_APP_API_URL}/api/items`)"
        );
        assert_eq!(
            rewrite_api_urls("const API = \"http://localhost:8000\";"),
            "const API = process.env.REACT_APP_API_URL;"
        );
        assert_eq!(
            rewrite_api_urls("fetch(`http://localhost:8000/api/${id}`)"),
            "fetch(`${process.env.REACT_APP_API_URL}/api/${id}`)"
        );
        assert_eq!(rewrite_api_urls("http://localhost:3000"), "http://localhost:3000");
    }

    #[test]
    fn test_full_stack_is_prepared() {
        let plan = prepare(&full_stack(), Platform::Vercel, "demo");
        assert_eq!(plan.status, "prepared");
        assert!(plan.stages.iter().all(|s| s.status == StageStatus::Ready));
        assert_eq!(
            plan.added_files,
            vec![
                "vercel.json",
                "render.yaml",
                "docker-compose.yml",
                "frontend/Dockerfile",
                "backend/Dockerfile"
            ]
        );

        let app = plan
            .files
            .iter()
            .find(|f| f.path == "frontend/src/App.js")
            .unwrap();
        assert!(!app.content.contains("localhost"));
    }

    #[test]
    fn test_backend_python_is_not_rewritten() {
        let files = vec![
            ProjectFile::new("backend/main.py", "ORIGIN = 'http://localhost:8000'"),
            ProjectFile::new("backend/requirements.txt", "fastapi\n"),
        ];
        let plan = prepare(&files, Platform::Render, "demo");
        assert_eq!(plan.files[0].content, "ORIGIN = 'http://localhost:8000'");
    }

    #[test]
    fn test_existing_config_is_kept() {
        let mut files = full_stack();
        files.push(ProjectFile::new("vercel.json", "{\"custom\": true}"));
        let plan = prepare(&files, Platform::Vercel, "demo");
        assert!(!plan.added_files.contains(&"vercel.json".to_string()));
        let vercel = plan.files.iter().find(|f| f.path == "vercel.json").unwrap();
        assert_eq!(vercel.content, "{\"custom\": true}");
    }

    #[test]
    fn test_missing_requirements_fails_backend() {
        let files: Vec<_> = full_stack()
            .into_iter()
            .filter(|f| !f.path.ends_with("requirements.txt"))
            .collect();
        let plan = prepare(&files, Platform::Vercel, "demo");
        assert_eq!(plan.status, "backend_failed");
        assert_eq!(plan.stages[0].status, StageStatus::Failed);
    }

    #[test]
    fn test_frontend_only_skips_backend() {
        let files = vec![
            ProjectFile::new("frontend/src/App.js", "export default () => null;"),
            ProjectFile::new("frontend/package.json", "{}"),
        ];
        let plan = prepare(&files, Platform::Netlify, "demo");
        assert_eq!(plan.status, "prepared");
        assert_eq!(plan.stages[0].status, StageStatus::Skipped);
        assert!(!plan.added_files.contains(&"backend/Dockerfile".to_string()));
    }

    #[test]
    fn test_missing_manifest_fails_frontend() {
        let files = vec![ProjectFile::new("frontend/src/App.js", "x")];
        let plan = prepare(&files, Platform::Vercel, "demo");
        assert_eq!(plan.status, "frontend_failed");
    }

    #[test]
    fn test_platform_parses_from_lowercase() {
        let platform: Platform = serde_json::from_str("\"railway\"").unwrap();
        assert_eq!(platform, Platform::Railway);
        assert_eq!(Platform::default(), Platform::Vercel);
    }
}
