pub mod analytics;
pub mod assets;
pub mod auth;
pub mod chat;
pub mod deploy;
pub mod generate;
pub mod github;
pub mod projects;
pub mod snapshots;
