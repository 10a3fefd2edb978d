// Static fallback applications used when generation fails

use serde::Serialize;
use serde_json::json;

use crate::db::models::ProjectFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackTemplate {
    Calculator,
    Todo,
    Blog,
    Wellness,
    Weather,
    Website,
}

/// Checked in order; the first template with a matching keyword wins.
const KEYWORDS: &[(FallbackTemplate, &[&str])] = &[
    (
        FallbackTemplate::Calculator,
        &["calculator", "calc", "math", "arithmetic"],
    ),
    (FallbackTemplate::Todo, &["todo", "task", "checklist"]),
    (FallbackTemplate::Blog, &["blog", "post", "article", "comment"]),
    (
        FallbackTemplate::Wellness,
        &["medicine", "health", "wellness", "natural", "healing", "therapy"],
    ),
    (
        FallbackTemplate::Weather,
        &["weather", "forecast", "temperature", "climate"],
    ),
    (
        FallbackTemplate::Website,
        &["website", "landing", "homepage", "portfolio"],
    ),
];

pub fn select_fallback(prompt: &str) -> FallbackTemplate {
    let prompt = prompt.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| prompt.contains(w)))
        .map(|(template, _)| *template)
        .unwrap_or(FallbackTemplate::Calculator)
}

impl FallbackTemplate {
    pub fn app_name(self) -> &'static str {
        match self {
            FallbackTemplate::Calculator => "calculator-app",
            FallbackTemplate::Todo => "todo-app",
            FallbackTemplate::Blog => "blog-app",
            FallbackTemplate::Wellness => "natural-wellness-app",
            FallbackTemplate::Weather => "weather-app",
            FallbackTemplate::Website => "landing-website",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FallbackTemplate::Calculator => {
                "A fully functional calculator with all basic operations"
            }
            FallbackTemplate::Todo => {
                "A todo list with add, complete, filter and delete features"
            }
            FallbackTemplate::Blog => "A blog with posts, authors and comments",
            FallbackTemplate::Wellness => {
                "A searchable guide to natural remedies with favourites"
            }
            FallbackTemplate::Weather => "A city weather search with a seven day forecast",
            FallbackTemplate::Website => "A responsive landing page with a contact form",
        }
    }

    fn sources(self) -> (&'static str, &'static str) {
        match self {
            FallbackTemplate::Calculator => (
                include_str!("../../templates/calculator/App.js"),
                include_str!("../../templates/calculator/App.css"),
            ),
            FallbackTemplate::Todo => (
                include_str!("../../templates/todo/App.js"),
                include_str!("../../templates/todo/App.css"),
            ),
            FallbackTemplate::Blog => (
                include_str!("../../templates/blog/App.js"),
                include_str!("../../templates/blog/App.css"),
            ),
            FallbackTemplate::Wellness => (
                include_str!("../../templates/wellness/App.js"),
                include_str!("../../templates/wellness/App.css"),
            ),
            FallbackTemplate::Weather => (
                include_str!("../../templates/weather/App.js"),
                include_str!("../../templates/weather/App.css"),
            ),
            FallbackTemplate::Website => (
                include_str!("../../templates/website/App.js"),
                include_str!("../../templates/website/App.css"),
            ),
        }
    }

    pub fn files(self) -> Vec<ProjectFile> {
        let (app_js, app_css) = self.sources();
        let index_html =
            include_str!("../../templates/shared/index.html").replace("{{title}}", self.app_name());

        vec![
            ProjectFile::new("frontend/package.json", package_json(self.app_name())),
            ProjectFile::new("frontend/public/index.html", index_html),
            ProjectFile::new(
                "frontend/src/index.js",
                include_str!("../../templates/shared/index.js"),
            ),
            ProjectFile::new("frontend/src/App.js", app_js),
            ProjectFile::new("frontend/src/App.css", app_css),
        ]
    }
}

/// Create React App manifest used by templates and as generated boilerplate.
pub fn package_json(app_name: &str) -> String {
    let package = json!({
        "name": app_name.to_lowercase().replace(' ', "-"),
        "version": "1.0.0",
        "private": true,
        "dependencies": {
            "react": "^18.2.0",
            "react-dom": "^18.2.0",
            "react-scripts": "5.0.1"
        },
        "scripts": {
            "start": "react-scripts start",
            "build": "react-scripts build",
            "test": "react-scripts test",
            "eject": "react-scripts eject"
        },
        "eslintConfig": {
            "extends": ["react-app"]
        },
        "browserslist": {
            "production": [">0.2%", "not dead", "not op_mini all"],
            "development": [
                "last 1 chrome version",
                "last 1 firefox version",
                "last 1 safari version"
            ]
        }
    });
    serde_json::to_string_pretty(&package).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quality;

    #[test]
    fn test_keyword_routing() {
        assert_eq!(select_fallback("Build me a Calculator"), FallbackTemplate::Calculator);
        assert_eq!(select_fallback("a TODO list app"), FallbackTemplate::Todo);
        assert_eq!(select_fallback("personal blog"), FallbackTemplate::Blog);
        assert_eq!(select_fallback("herbal healing guide"), FallbackTemplate::Wellness);
        assert_eq!(select_fallback("weather dashboard"), FallbackTemplate::Weather);
        assert_eq!(select_fallback("my portfolio"), FallbackTemplate::Website);
    }

    #[test]
    fn test_earlier_templates_take_priority() {
        // "task" (todo) is checked before "blog"
        assert_eq!(select_fallback("blog with a task board"), FallbackTemplate::Todo);
        assert_eq!(select_fallback("math blog"), FallbackTemplate::Calculator);
    }

    #[test]
    fn test_unknown_prompt_defaults_to_calculator() {
        assert_eq!(select_fallback("a spaceship simulator"), FallbackTemplate::Calculator);
        assert_eq!(select_fallback(""), FallbackTemplate::Calculator);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let prompt = "Create a weather forecast app for hikers";
        let first = select_fallback(prompt);
        for _ in 0..10 {
            assert_eq!(select_fallback(prompt), first);
        }
    }

    #[test]
    fn test_every_template_is_complete_and_clean() {
        for (template, _) in KEYWORDS {
            let files = template.files();
            assert!(files.iter().any(|f| f.path == "frontend/package.json"));
            assert!(files.iter().any(|f| f.path == "frontend/src/App.js"));
            assert!(files.iter().all(|f| !f.content.is_empty()));

            let report = quality::inspect(&files);
            assert!(
                report.issues.is_empty(),
                "{template:?} has issues: {:?}",
                report.issues
            );
        }
    }

    #[test]
    fn test_package_json_is_valid() {
        let value: serde_json::Value = serde_json::from_str(&package_json("My App")).unwrap();
        assert_eq!(value["name"], "my-app");
        assert_eq!(value["dependencies"]["react"], "^18.2.0");
    }
}
