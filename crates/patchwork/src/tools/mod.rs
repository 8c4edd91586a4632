//! Tools the issue-solver agents can call.

mod fetch_url;
mod html;

pub use fetch_url::FetchUrlTool;
pub use html::extract_text;
