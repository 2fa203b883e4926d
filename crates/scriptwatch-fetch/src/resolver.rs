//! Target resolution: which script resources belong to a target
//!
//! A direct script target resolves to itself. A page target is fetched and
//! scanned for `<script src=...>` tags; references are resolved against the
//! page URL and de-duplicated in document order.

use crate::fetcher::{FetchError, FetchResult, Fetcher};
use regex::Regex;
use scriptwatch_core::TargetUrl;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;
use url::Url;

/// Resolve a target into the ordered set of script URLs to fetch.
#[async_trait::async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, target: &TargetUrl) -> FetchResult<Vec<String>>;
}

pub struct ScriptResolver {
    fetcher: Arc<dyn Fetcher>,
}

impl ScriptResolver {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait::async_trait]
impl Resolver for ScriptResolver {
    async fn resolve(&self, target: &TargetUrl) -> FetchResult<Vec<String>> {
        if target.is_direct_script() {
            return Ok(vec![target.as_str().to_string()]);
        }

        let page = self.fetcher.fetch(target.as_str()).await?;
        let html = String::from_utf8_lossy(&page);
        let base = page_base(target.as_str())?;

        let mut seen = HashSet::new();
        let mut scripts = Vec::new();
        for src in extract_script_srcs(&html) {
            let resolved = match base.join(&src) {
                Ok(u) => u,
                Err(e) => {
                    debug!("Skipping unresolvable script src '{}' on {}: {}", src, target, e);
                    continue;
                }
            };
            if !matches!(resolved.scheme(), "http" | "https") {
                continue;
            }
            let resolved = resolved.to_string();
            if seen.insert(resolved.clone()) {
                scripts.push(resolved);
            }
        }
        debug!("Resolved {} scripts on {}", scripts.len(), target);
        Ok(scripts)
    }
}

/// Base URL for relative script references. Normalization drops the trailing
/// slash, so a last segment without an extension is treated as a directory.
fn page_base(target: &str) -> FetchResult<Url> {
    let mut base = Url::parse(target).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", target, e)))?;
    let looks_like_dir = base
        .path_segments()
        .and_then(|mut s| s.next_back())
        .map(|last| !last.is_empty() && !last.contains('.'))
        .unwrap_or(false);
    if looks_like_dir {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

fn script_src_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?is)<script\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("script src pattern is valid")
    })
}

/// Extract raw `src` attribute values of script tags, in document order.
pub fn extract_script_srcs(html: &str) -> Vec<String> {
    script_src_pattern()
        .captures_iter(html)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)).or_else(|| c.get(3)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
