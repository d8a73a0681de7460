pub mod api;
pub mod jira;
pub mod registry;
