//! Scriptwatch Fetch - Content fetching and script resolution

pub mod fetcher;
pub mod resolver;

pub use fetcher::{FetchError, FetchResult, Fetcher, FetcherConfig, HttpFetcher};
pub use resolver::{extract_script_srcs, Resolver, ScriptResolver};
