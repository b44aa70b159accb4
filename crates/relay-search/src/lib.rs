//! Message search: sanitized queries against the text index with a
//! literal-regex fallback, in-memory filters, `<mark>` highlighting, and
//! the around-a-message context window.

mod sanitize;
mod service;

pub use sanitize::sanitize_query;
pub use service::{SearchError, SearchHit, SearchPage, SearchRequest, SearchService};
