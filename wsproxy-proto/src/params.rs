//! Connection parameters carried on the relay's upgrade request.
//!
//! A client names its target in the query string of the WebSocket upgrade:
//!
//! | Key         | Meaning                                           |
//! |-------------|---------------------------------------------------|
//! | `url`       | Target WebSocket URL (required)                   |
//! | `headers`   | JSON object of extra handshake headers (optional) |
//! | `protocols` | Comma-separated sub-protocol list (optional)      |
//!
//! [`ConnectParams`] is the raw, still-serialized form. [`TargetSpec`] is
//! the parsed form the relay dials with.

use std::collections::BTreeMap;

use url::form_urlencoded;

/// Errors that can occur while interpreting connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    /// No `url` parameter, or an empty one.
    #[error("target URL is required")]
    MissingUrl,

    /// The `headers` parameter is not a JSON object.
    #[error("malformed headers parameter: {0}")]
    MalformedHeaders(String),
}

/// Raw connection parameters as they appear in the query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    /// Target WebSocket URL, percent-decoded.
    pub url: Option<String>,
    /// JSON-serialized header object.
    pub headers: Option<String>,
    /// Comma-separated sub-protocols.
    pub protocols: Option<String>,
}

impl ConnectParams {
    /// Decode parameters from a form-encoded query string (without the `?`).
    ///
    /// Unknown keys are ignored and the first occurrence of a repeated key
    /// wins. Never fails: a query without `url` simply yields `url: None`.
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "url" => &mut params.url,
                "headers" => &mut params.headers,
                "protocols" => &mut params.protocols,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into_owned());
            }
        }
        params
    }

    /// Encode the present parameters as a query string (without the `?`).
    #[must_use]
    pub fn to_query(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        if let Some(url) = &self.url {
            serializer.append_pair("url", url);
        }
        if let Some(headers) = &self.headers {
            serializer.append_pair("headers", headers);
        }
        if let Some(protocols) = &self.protocols {
            serializer.append_pair("protocols", protocols);
        }
        serializer.finish()
    }
}

/// A fully parsed outbound target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetSpec {
    /// Target WebSocket URL, never empty.
    pub url: String,
    /// Extra headers for the outbound handshake.
    pub headers: BTreeMap<String, String>,
    /// Sub-protocols to offer, in preference order.
    pub protocols: Vec<String>,
}

/// Outcome of [`TargetSpec::from_params`].
///
/// Malformed headers do not fail the parse; the error is kept here so the
/// caller can report it while carrying on with no extra headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTarget {
    /// The usable target.
    pub spec: TargetSpec,
    /// Set when the `headers` parameter was present but unusable.
    pub header_error: Option<ParamError>,
}

impl TargetSpec {
    /// Create a target with no extra headers or protocols.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Interpret raw connection parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ParamError::MissingUrl`] when `url` is absent or empty.
    pub fn from_params(params: ConnectParams) -> Result<ParsedTarget, ParamError> {
        let url = params
            .url
            .filter(|u| !u.is_empty())
            .ok_or(ParamError::MissingUrl)?;

        let (headers, header_error) = match params.headers.as_deref().map(parse_headers) {
            None => (BTreeMap::new(), None),
            Some(Ok(headers)) => (headers, None),
            Some(Err(e)) => (BTreeMap::new(), Some(e)),
        };

        let protocols = params
            .protocols
            .as_deref()
            .map(parse_protocols)
            .unwrap_or_default();

        Ok(ParsedTarget {
            spec: Self {
                url,
                headers,
                protocols,
            },
            header_error,
        })
    }

    /// Serialize back into raw parameters for a relay URL.
    ///
    /// Empty header maps and protocol lists are omitted.
    #[must_use]
    pub fn to_params(&self) -> ConnectParams {
        let headers = (!self.headers.is_empty())
            .then(|| serde_json::to_string(&self.headers).ok())
            .flatten();
        let protocols = (!self.protocols.is_empty()).then(|| self.protocols.join(","));
        ConnectParams {
            url: Some(self.url.clone()),
            headers,
            protocols,
        }
    }
}

/// Parse the JSON `headers` parameter into a name → value map.
///
/// String values are used verbatim; numbers and booleans use their JSON
/// text. `null`, arrays, and nested objects are skipped.
///
/// # Errors
///
/// Returns [`ParamError::MalformedHeaders`] if the input is not valid JSON
/// or not a JSON object.
pub fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>, ParamError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ParamError::MalformedHeaders(e.to_string()))?;
    let serde_json::Value::Object(object) = value else {
        return Err(ParamError::MalformedHeaders(
            "expected a JSON object".to_string(),
        ));
    };

    Ok(object
        .into_iter()
        .filter_map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((name, value))
        })
        .collect())
}

/// Split the comma-separated `protocols` parameter.
///
/// Entries are trimmed and empty entries dropped; order is preserved.
#[must_use]
pub fn parse_protocols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
