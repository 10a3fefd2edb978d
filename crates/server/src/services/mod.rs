pub mod analytics;
pub mod builder;
pub mod deploy;
pub mod github;
pub mod llm;
pub mod quality;
pub mod snapshots;
pub mod storage;
pub mod templates;
