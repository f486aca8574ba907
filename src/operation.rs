//! Runtime operation invocation.
//!
//! There is no hand-written binding per endpoint: an [`OperationSpec`] is
//! data, and [`invoke`] is the one generic interpreter that binds a caller's
//! argument map against it, builds the wire request, and issues it over the
//! transport. Binding errors are reported before any network I/O.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{AriError, AriResult};
use crate::schema::{OperationSpec, ParamLocation, ResourceGroup};
use crate::transport::HttpTransport;

/// Caller arguments for one operation, keyed by parameter name.
pub type OperationArgs = serde_json::Map<String, Value>;

/// Characters escaped when substituting a value into a path segment.
/// Everything a URL path delimiter could misread, plus `%` itself.
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'#')
    .add(b'?')
    .add(b'{')
    .add(b'}')
    .add(b'/')
    .add(b'\\')
    .add(b'%');

/// Invoke one synthesized operation: bind `args` against the spec, issue the
/// request, and return the decoded JSON response body (`Null` for empty
/// bodies). Non-2xx responses reject with the raw body attached.
pub async fn invoke(
    transport: &dyn HttpTransport,
    group: &ResourceGroup,
    spec: &OperationSpec,
    args: &OperationArgs,
) -> AriResult<Value> {
    let (url, body) = build_request(group, spec, args)?;

    debug!("Invoking {}.{}: {} {}", group.name, spec.name, spec.method, url);
    let response = transport.issue(&spec.method, &url, body).await?;

    if !response.is_success() {
        return Err(AriError::RequestFailed {
            status: response.status,
            body: response.body,
        });
    }

    if response.body.trim().is_empty() {
        Ok(Value::Null)
    } else {
        serde_json::from_str(&response.body).map_err(AriError::Json)
    }
}

/// Bind arguments and produce the request URL plus optional JSON body.
/// Pure function of its inputs; performs no I/O.
pub(crate) fn build_request(
    group: &ResourceGroup,
    spec: &OperationSpec,
    args: &OperationArgs,
) -> AriResult<(Url, Option<String>)> {
    let mut path = spec.path.clone();
    let mut body = None;
    let mut query: Vec<(&str, String)> = Vec::new();

    for param in &spec.parameters {
        let value = args.get(&param.name).filter(|v| !v.is_null());

        match param.location {
            ParamLocation::Path => {
                let value = value.ok_or_else(|| AriError::MissingParameter {
                    operation: spec.name.clone(),
                    parameter: param.name.clone(),
                })?;
                let text = scalar_to_string(spec, param.name.as_str(), value)?;
                let encoded = utf8_percent_encode(&text, PATH_SEGMENT).to_string();
                path = path.replace(&format!("{{{}}}", param.name), &encoded);
            }
            ParamLocation::Query => match value {
                Some(Value::Array(items)) => {
                    // An empty sequence would contribute zero pairs, which
                    // for a required parameter is the same as not sending it.
                    if items.is_empty() && param.required {
                        return Err(AriError::MissingParameter {
                            operation: spec.name.clone(),
                            parameter: param.name.clone(),
                        });
                    }
                    // A sequence flattens to one repeated pair per element,
                    // never a comma-joined string.
                    for item in items {
                        query.push((
                            param.name.as_str(),
                            scalar_to_string(spec, param.name.as_str(), item)?,
                        ));
                    }
                }
                Some(v) => {
                    query.push((
                        param.name.as_str(),
                        scalar_to_string(spec, param.name.as_str(), v)?,
                    ));
                }
                None if param.required => {
                    return Err(AriError::MissingParameter {
                        operation: spec.name.clone(),
                        parameter: param.name.clone(),
                    });
                }
                // Unset optionals are omitted entirely, never sent as empty
                None => {}
            },
            ParamLocation::Body => match value {
                Some(v) => body = Some(serde_json::to_string(v)?),
                None if param.required => {
                    return Err(AriError::MissingParameter {
                        operation: spec.name.clone(),
                        parameter: param.name.clone(),
                    });
                }
                None => {}
            },
        }
    }

    if let Some(open) = path.find('{') {
        let close = path[open..].find('}').map(|i| open + i).unwrap_or(path.len());
        return Err(AriError::UnresolvedPlaceholder {
            operation: spec.name.clone(),
            placeholder: path[open + 1..close].to_string(),
        });
    }

    let mut url = group.base_url.clone();
    {
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, path));
    }
    if !query.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &query {
            pairs.append_pair(name, value);
        }
    }

    Ok((url, body))
}

fn scalar_to_string(spec: &OperationSpec, param: &str, value: &Value) -> AriResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(AriError::InvalidParameter {
            operation: spec.name.to_string(),
            parameter: param.to_string(),
            message: "expected a scalar value".to_string(),
        }),
    }
}
