//! API description loader.
//!
//! Fetches the root index (`resources.json`) and every referenced group
//! document, then normalizes the lot into an [`ApiDescription`]. The load is
//! all-or-nothing: group fetches run concurrently, and one failure fails the
//! whole load so no partially synthesized operation surface can ever leak
//! out.

use futures_util::future::try_join_all;
use tracing::{debug, info};
use url::Url;

use crate::error::{AriError, AriResult};
use crate::schema::{ApiDescription, RawGroupDoc, RawIndex, ResourceGroup};
use crate::transport::HttpTransport;

/// Fetch and normalize the complete API description.
///
/// `index_url` is the URL of the root index as the caller reaches it, e.g.
/// `http://localhost:8088/ari/api-docs/resources.json`. That URL's scheme
/// and host also override whatever host each group document advertises in
/// its `basePath` (see [`resolve_base_url`]).
pub async fn load_description(
    transport: &dyn HttpTransport,
    index_url: &Url,
) -> AriResult<ApiDescription> {
    let index_body = fetch(transport, index_url).await?;
    let index: RawIndex = serde_json::from_str(&index_body)
        .map_err(|e| AriError::spec_load(index_url.as_str(), None, format!("malformed root index: {}", e)))?;

    debug!("Root index lists {} resource groups", index.apis.len());

    let fetches = index.apis.iter().map(|group_ref| {
        let reference = group_ref.path.clone();
        async move {
            let (name, doc_url) = resolve_group_ref(index_url, &reference)?;
            let body = fetch(transport, &doc_url).await?;
            let raw: RawGroupDoc = serde_json::from_str(&body).map_err(|e| {
                AriError::spec_load(doc_url.as_str(), None, format!("malformed group document: {}", e))
            })?;
            let base_url = resolve_base_url(raw.base_path.as_deref(), index_url)?;
            let group = ResourceGroup::from_raw(&name, base_url, doc_url.as_str(), raw)?;
            debug!(
                "Loaded group '{}' with {} operations",
                group.name,
                group.operations.len()
            );
            Ok::<_, AriError>((name, group))
        }
    });

    // join-all with first-error-wins: a single failed group fails the load
    let groups = try_join_all(fetches).await?.into_iter().collect();

    let description = ApiDescription { groups };
    info!(
        "API description ready: {} groups, {} operations",
        description.groups.len(),
        description.operation_count()
    );
    Ok(description)
}

async fn fetch(transport: &dyn HttpTransport, url: &Url) -> AriResult<String> {
    let response = transport.issue("GET", url, None).await?;
    if !response.is_success() {
        return Err(AriError::spec_load(
            url.as_str(),
            Some(response.status),
            "unexpected status fetching API description",
        ));
    }
    Ok(response.body)
}

/// Resolve one root-index reference to `(group name, document URL)`.
///
/// References look like `/api-docs/channels.{format}`: the documentation
/// prefix is dropped, the format placeholder becomes `json`, and the file
/// name is resolved relative to the root index URL (same directory).
fn resolve_group_ref(index_url: &Url, reference: &str) -> AriResult<(String, Url)> {
    let file = reference
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            AriError::spec_load(
                index_url.as_str(),
                None,
                format!("unusable group reference '{}'", reference),
            )
        })?;
    let file = file.replace("{format}", "json");

    let name = file
        .strip_suffix(".json")
        .unwrap_or(&file)
        .to_string();

    let doc_url = index_url.join(&file)?;
    Ok((name, doc_url))
}

/// Resolve a group's declared `basePath` against the URL the caller used.
///
/// Asterisk advertises the base path as an absolute URL using the host it
/// knows about (`http://internal:8088/ari`). Behind a reverse proxy that
/// terminates TLS, that host is unreachable, so only the advertised *path*
/// is kept; scheme, host, and port come from the caller's index URL. A
/// relative base path is joined to the caller's scheme/host directly, and a
/// missing one falls back to the index URL with its `/api-docs/...` suffix
/// removed.
pub(crate) fn resolve_base_url(declared: Option<&str>, index_url: &Url) -> AriResult<Url> {
    let path = match declared {
        Some(declared) => match Url::parse(declared) {
            Ok(absolute) => absolute.path().trim_end_matches('/').to_string(),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let trimmed = declared.trim_end_matches('/');
                if trimmed.starts_with('/') {
                    trimmed.to_string()
                } else {
                    format!("/{}", trimmed)
                }
            }
            Err(e) => return Err(AriError::Url(e)),
        },
        None => {
            let path = index_url.path();
            let base = path.find("/api-docs").map(|i| &path[..i]).unwrap_or(path);
            base.trim_end_matches('/').to_string()
        }
    };

    let mut base = index_url.clone();
    base.set_path(&path);
    base.set_query(None);
    base.set_fragment(None);
    Ok(base)
}
