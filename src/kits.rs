//! Kit catalog retrieval and merging.
//!
//! A kit is an installable sub-application template. Catalog repositories
//! publish a `list.json` at their root; the daemon reads it through the
//! GitHub contents API (which returns the file body base64-encoded). The
//! primary catalog is merged with any configured secondary repositories,
//! de-duplicated by id with first-seen wins.

use base64::Engine;

use crate::config::Config;
use crate::SubApplication;

/// Primary kit catalog repository, always consulted first.
pub const PRIMARY_KIT_REPOSITORY: &str = "kit-daemon/kits-list";

/// File listing the kits inside a catalog repository.
const KIT_LIST_FILE: &str = "list.json";

/// Contents-API response shape; only the base64 body matters.
#[derive(Debug, serde::Deserialize)]
struct GitHubContent {
    content: String,
}

/// Fetches and merges every configured kit catalog.
///
/// Repositories that fail to fetch or parse are logged and skipped; an
/// unreachable secondary source never hides the primary catalog.
pub async fn list_available_kits(config: &Config) -> Vec<SubApplication> {
    let mut sources = vec![PRIMARY_KIT_REPOSITORY.to_string()];
    sources.extend(config.kit_repositories.iter().cloned());

    let mut lists = Vec::new();
    for repo in sources {
        match fetch_kit_list(&repo).await {
            Ok(listed) => lists.push(listed),
            Err(e) => {
                tracing::warn!(repo = %repo, error = %e, "failed to fetch kit list");
            }
        }
    }
    merge_kits(lists)
}

/// Reads `list.json` from one `owner/repo` catalog.
async fn fetch_kit_list(repo: &str) -> Result<Vec<SubApplication>, String> {
    let url = contents_api_url(repo, KIT_LIST_FILE)
        .ok_or_else(|| format!("invalid repository format (expected owner/repo): {repo}"))?;

    let response = reqwest::Client::new()
        .get(&url)
        .header("User-Agent", "kit-daemon")
        .send()
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    if !response.status().is_success() {
        return Err(format!("HTTP status {}", response.status()));
    }
    let body = response
        .text()
        .await
        .map_err(|e| format!("failed to read response body: {e}"))?;

    decode_kit_list(&body)
}

/// Builds the contents-API URL for a file in an `owner/repo` repository.
fn contents_api_url(repo: &str, path: &str) -> Option<String> {
    let (owner, name) = repo.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some(format!(
        "https://api.github.com/repos/{owner}/{name}/contents/{path}"
    ))
}

/// Decodes a contents-API response body into the kit list it carries.
fn decode_kit_list(body: &str) -> Result<Vec<SubApplication>, String> {
    let content: GitHubContent =
        serde_json::from_str(body).map_err(|e| format!("unexpected API response: {e}"))?;
    // The API wraps base64 at 60 columns; strip the embedded newlines first.
    let packed: String = content
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let raw = base64::engine::general_purpose::STANDARD
        .decode(packed)
        .map_err(|e| format!("invalid base64 content: {e}"))?;
    serde_json::from_slice(&raw).map_err(|e| format!("invalid kit list: {e}"))
}

/// Merges kit lists in order, de-duplicating by id (first seen wins).
/// Exposed separately so the merge rule is testable without the network.
pub fn merge_kits(lists: Vec<Vec<SubApplication>>) -> Vec<SubApplication> {
    let mut kits: Vec<SubApplication> = Vec::new();
    for list in lists {
        for kit in list {
            if kits.iter().any(|k| k.id == kit.id) {
                continue;
            }
            kits.push(kit);
        }
    }
    kits
}
