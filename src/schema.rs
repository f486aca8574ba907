//! API description schema.
//!
//! Asterisk publishes its REST surface as a Swagger-1.x-style document tree:
//! one root index (`resources.json`) listing the resource groups, then one
//! document per group with its operations and models. The raw documents are
//! slightly irregular across Asterisk versions (`type` vs `dataType`,
//! `httpMethod` vs `method`), so this module normalizes everything into one
//! internal shape the synthesizer can interpret without per-version branches.

use indexmap::IndexMap;
use serde::Deserialize;
use std::fmt;
use url::Url;

use crate::error::{AriError, AriResult};

// ── Raw wire documents ──────────────────────────────────────────────

/// Root index: `{"apis": [{"path": "/api-docs/channels.{format}"}]}`
#[derive(Debug, Deserialize)]
pub(crate) struct RawIndex {
    pub apis: Vec<RawGroupRef>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawGroupRef {
    pub path: String,
}

/// One resource group document as fetched from the server.
#[derive(Debug, Deserialize)]
pub(crate) struct RawGroupDoc {
    #[serde(rename = "basePath")]
    pub base_path: Option<String>,
    #[serde(rename = "resourcePath")]
    #[allow(dead_code)]
    pub resource_path: Option<String>,
    #[serde(default)]
    pub apis: Vec<RawApi>,
    #[serde(default)]
    pub models: IndexMap<String, RawModel>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawApi {
    pub path: String,
    #[serde(default)]
    pub operations: Vec<RawOperation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOperation {
    pub nickname: String,
    #[serde(rename = "httpMethod", alias = "method")]
    pub http_method: String,
    #[serde(default)]
    pub parameters: Vec<RawParameter>,
    #[serde(rename = "responseClass", alias = "type")]
    pub response_class: Option<String>,
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawParameter {
    pub name: String,
    #[serde(rename = "paramType")]
    pub param_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type", alias = "dataType")]
    pub data_type: Option<String>,
    #[serde(alias = "descr")]
    #[allow(dead_code)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawModel {
    #[serde(default)]
    pub properties: IndexMap<String, RawProperty>,
    #[serde(alias = "descr")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawProperty {
    #[serde(rename = "type", alias = "dataType")]
    pub data_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(alias = "descr")]
    pub description: Option<String>,
}

// ── Normalized schema ───────────────────────────────────────────────

/// Where a parameter is marshalled into the wire request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    /// Percent-encoded into a path template placeholder
    Path,
    /// Appended to the query string
    Query,
    /// Serialized as the JSON request body
    Body,
}

impl ParamLocation {
    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "body" => Some(ParamLocation::Body),
            _ => None,
        }
    }
}

impl fmt::Display for ParamLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamLocation::Path => write!(f, "path"),
            ParamLocation::Query => write!(f, "query"),
            ParamLocation::Body => write!(f, "body"),
        }
    }
}

/// One operation parameter, normalized from the raw document
#[derive(Debug, Clone)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// Declared type from the document (`string`, `int`, `containers`, ...)
    pub data_type: Option<String>,
}

/// One callable operation: method, path template, ordered parameters
#[derive(Debug, Clone)]
pub struct OperationSpec {
    /// Operation name (`nickname` in the document), e.g. `originate`
    pub name: String,
    /// Upper-case HTTP method
    pub method: String,
    /// Path template with `{placeholder}` segments, relative to the group base
    pub path: String,
    pub parameters: Vec<ParameterSpec>,
    /// Declared result model, e.g. `Channel` or `List[Channel]`
    pub response_class: Option<String>,
    pub summary: Option<String>,
}

impl OperationSpec {
    /// Names of all `{placeholder}`s in the path template, in order.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut rest = self.path.as_str();
        while let Some(open) = rest.find('{') {
            rest = &rest[open + 1..];
            if let Some(close) = rest.find('}') {
                out.push(&rest[..close]);
                rest = &rest[close + 1..];
            } else {
                break;
            }
        }
        out
    }
}

/// One model property, normalized
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub data_type: Option<String>,
    pub required: bool,
    pub description: Option<String>,
}

/// One named model: property name → spec
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub name: String,
    pub description: Option<String>,
    pub properties: IndexMap<String, PropertySpec>,
}

/// One resource group, fully resolved and ready to invoke against
#[derive(Debug, Clone)]
pub struct ResourceGroup {
    /// Group name derived from the document file stem, e.g. `channels`
    pub name: String,
    /// Resolved base URL (caller's scheme/host, document's path)
    pub base_url: Url,
    /// Operation name → spec, in document order
    pub operations: IndexMap<String, OperationSpec>,
    /// Model name → spec, in document order
    pub models: IndexMap<String, ModelSpec>,
}

/// The complete loaded API description. Immutable once built; exists only
/// when every group document loaded and validated successfully.
#[derive(Debug, Clone)]
pub struct ApiDescription {
    /// Group name → group, in root-index order
    pub groups: IndexMap<String, ResourceGroup>,
}

impl ApiDescription {
    pub fn group(&self, name: &str) -> Option<&ResourceGroup> {
        self.groups.get(name)
    }

    /// Total number of synthesized operations across all groups.
    pub fn operation_count(&self) -> usize {
        self.groups.values().map(|g| g.operations.len()).sum()
    }
}

// ── Normalization ───────────────────────────────────────────────────

impl ResourceGroup {
    /// Build a normalized group from a raw document.
    ///
    /// Validates that every path placeholder is covered by a required path
    /// parameter, so binding errors cannot hide until call time.
    pub(crate) fn from_raw(name: &str, base_url: Url, doc_url: &str, raw: RawGroupDoc) -> AriResult<Self> {
        let mut operations = IndexMap::new();
        for api in raw.apis {
            for op in api.operations {
                let mut parameters = Vec::with_capacity(op.parameters.len());
                for p in op.parameters {
                    let location = ParamLocation::parse(&p.param_type).ok_or_else(|| {
                        AriError::spec_load(
                            doc_url,
                            None,
                            format!(
                                "operation '{}' parameter '{}' has unknown paramType '{}'",
                                op.nickname, p.name, p.param_type
                            ),
                        )
                    })?;
                    parameters.push(ParameterSpec {
                        name: p.name,
                        location,
                        // Path parameters are always required on the wire even
                        // when the document forgets to say so.
                        required: p.required || location == ParamLocation::Path,
                        data_type: p.data_type,
                    });
                }

                let spec = OperationSpec {
                    name: op.nickname.clone(),
                    method: op.http_method.to_uppercase(),
                    path: api.path.clone(),
                    parameters,
                    response_class: op.response_class,
                    summary: op.summary,
                };

                for placeholder in spec.placeholders() {
                    let covered = spec.parameters.iter().any(|p| {
                        p.location == ParamLocation::Path && p.required && p.name == placeholder
                    });
                    if !covered {
                        return Err(AriError::spec_load(
                            doc_url,
                            None,
                            format!(
                                "operation '{}' placeholder '{{{}}}' has no required path parameter",
                                spec.name, placeholder
                            ),
                        ));
                    }
                }

                operations.insert(spec.name.clone(), spec);
            }
        }

        let mut models = IndexMap::new();
        for (model_name, raw_model) in raw.models {
            let properties = raw_model
                .properties
                .into_iter()
                .map(|(prop_name, p)| {
                    (
                        prop_name,
                        PropertySpec {
                            data_type: p.data_type,
                            required: p.required,
                            description: p.description,
                        },
                    )
                })
                .collect();
            models.insert(
                model_name.clone(),
                ModelSpec {
                    name: model_name,
                    description: raw_model.description,
                    properties,
                },
            );
        }

        Ok(ResourceGroup {
            name: name.to_string(),
            base_url,
            operations,
            models,
        })
    }
}
