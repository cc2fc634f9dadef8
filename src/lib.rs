//! Content-addressed documentation ingestion (git, HTTP, headless-browser)
//! with a two-phase keyword-plus-selector searcher.
//!
//! The crate is organized around the seven components of the design: URL
//! canonicalization and path mapping ([`url_canon`]), the HTTP and
//! browser fetchers ([`fetch`]), the recursive crawl engine ([`crawler`]),
//! the git documentation fetcher ([`git_fetcher`]), the index and
//! task-status store ([`index`], [`task_store`]), and the searcher
//! ([`search`]). [`coordinator`] dispatches a validated [`request::DownloadRequest`]
//! to the right pair of components and drives the task-status lifecycle
//! around it; it is the crate's main entry point for submitters.

pub mod coordinator;
pub mod crawler;
pub mod error;
pub mod fetch;
pub mod git_fetcher;
pub mod index;
pub mod request;
pub mod robots;
pub mod search;
pub mod task_store;
pub mod url_canon;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use request::{DownloadRequest, RawDownloadRequest};
pub use task_store::{TaskState, TaskStatus, TaskStore};
