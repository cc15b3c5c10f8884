//! Request and response descriptors
//!
//! An [`InboundRequest`] is whatever the front-end captured off the wire.
//! [`RequestDescriptor::ingest`] normalises it once: the method is checked,
//! headers go through the forwarding table and the body is classified as
//! form parameters or raw bytes. Everything downstream consumes the
//! descriptor.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::cassette::body_bytes;
use crate::fingerprint::fingerprint;
use crate::headers::HeaderTable;
use crate::{ProxyError, Result};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP methods the proxy handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Canonical uppercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// GET and DELETE carry their parameters in the query string
    #[must_use]
    pub fn uses_query_parameters(&self) -> bool {
        matches!(self, Self::Get | Self::Delete)
    }
}

impl FromStr for Method {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(ProxyError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request payload, classified once at ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Body {
    /// Decoded parameters (query string or url-encoded form), in order
    Form(Vec<(String, String)>),
    /// Opaque bytes forwarded unchanged
    Raw(#[serde(with = "body_bytes")] Vec<u8>),
}

impl Body {
    /// Whether there is nothing to send
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Form(params) => params.is_empty(),
            Self::Raw(bytes) => bytes.is_empty(),
        }
    }

    /// Bytes as they go on the wire
    ///
    /// Form parameters are re-encoded as `application/x-www-form-urlencoded`.
    #[must_use]
    pub fn to_wire(&self) -> Vec<u8> {
        match self {
            Self::Form(params) => encode_params(params).into_bytes(),
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::Form(Vec::new())
    }
}

/// Inbound request as captured by the front-end
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Method exactly as received
    pub method: String,
    /// Path without the query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// All received headers
    pub headers: Vec<(String, String)>,
    /// Raw body
    pub body: Bytes,
}

/// Normalised request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Method
    pub method: Method,
    /// Path
    pub path: String,
    /// Forwarded headers, in forwarding-table order
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Payload
    #[serde(default)]
    pub body: Body,
}

impl RequestDescriptor {
    /// Normalise an inbound request
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMethod` for anything other than GET, POST, PUT,
    /// PATCH or DELETE
    pub fn ingest(inbound: InboundRequest, table: &HeaderTable) -> Result<Self> {
        let method: Method = inbound.method.parse()?;
        let headers = table.filter(&inbound.headers);

        let body = if method.uses_query_parameters() {
            Body::Form(parse_params(inbound.query.as_deref().unwrap_or_default()))
        } else if is_form(&inbound.headers) && !inbound.body.is_empty() {
            match std::str::from_utf8(&inbound.body) {
                Ok(text) => Body::Form(parse_params(text)),
                Err(_) => Body::Raw(inbound.body.to_vec()),
            }
        } else {
            Body::Raw(inbound.body.to_vec())
        };

        Ok(Self {
            method,
            path: inbound.path,
            headers,
            body,
        })
    }

    /// Cassette name for this request
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(self.method, &self.path)
    }
}

/// Response as returned upstream or replayed from a cassette
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseDescriptor {
    /// Status code
    pub status: u16,
    /// Headers, in received order
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Body
    #[serde(with = "body_bytes")]
    pub body: Vec<u8>,
}

fn is_form(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type")
            && value
                .split(';')
                .next()
                .is_some_and(|media| media.trim().eq_ignore_ascii_case(FORM_CONTENT_TYPE))
    })
}

/// Decode `a=1&b=2` pairs; `+` means space, undecodable input is kept as-is
#[must_use]
pub fn parse_params(input: &str) -> Vec<(String, String)> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

/// Encode pairs as `a=1&b=2`
#[must_use]
pub fn encode_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced).map_or(spaced.clone(), |decoded| decoded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inbound(method: &str, path: &str) -> InboundRequest {
        InboundRequest {
            method: method.to_string(),
            path: path.to_string(),
            query: None,
            headers: vec![],
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("PATCH".parse::<Method>().unwrap(), Method::Patch);
        assert!(matches!(
            "OPTIONS".parse::<Method>(),
            Err(ProxyError::UnsupportedMethod(m)) if m == "OPTIONS"
        ));
        assert!("get".parse::<Method>().is_err());
    }

    #[test]
    fn test_get_takes_query_parameters() {
        let mut request = inbound("GET", "/documents");
        request.query = Some("page=2&q=hello+world".to_string());
        request.body = Bytes::from_static(b"ignored");

        let descriptor = RequestDescriptor::ingest(request, &HeaderTable::default()).unwrap();
        assert_eq!(
            descriptor.body,
            Body::Form(vec![
                ("page".to_string(), "2".to_string()),
                ("q".to_string(), "hello world".to_string()),
            ])
        );
    }

    #[test]
    fn test_post_form_body_is_parsed() {
        let mut request = inbound("POST", "/documents");
        request.headers = vec![(
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded; charset=utf-8".to_string(),
        )];
        request.body = Bytes::from_static(b"name=x&tag=a%26b");

        let descriptor = RequestDescriptor::ingest(request, &HeaderTable::default()).unwrap();
        assert_eq!(
            descriptor.body,
            Body::Form(vec![
                ("name".to_string(), "x".to_string()),
                ("tag".to_string(), "a&b".to_string()),
            ])
        );
    }

    #[test]
    fn test_post_json_body_is_raw() {
        let mut request = inbound("POST", "/documents");
        request.headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        request.body = Bytes::from_static(br#"{"name":"x"}"#);

        let descriptor = RequestDescriptor::ingest(request, &HeaderTable::default()).unwrap();
        assert_eq!(descriptor.body, Body::Raw(br#"{"name":"x"}"#.to_vec()));
    }

    #[test]
    fn test_ingest_filters_headers() {
        let mut request = inbound("DELETE", "/documents/1");
        request.headers = vec![
            ("X-Custom".to_string(), String::new()),
            ("Authorization".to_string(), "Bearer abc".to_string()),
        ];

        let descriptor = RequestDescriptor::ingest(request, &HeaderTable::default()).unwrap();
        assert_eq!(
            descriptor.headers,
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[test]
    fn test_ingest_rejects_options() {
        let result = RequestDescriptor::ingest(inbound("OPTIONS", "/"), &HeaderTable::default());
        assert!(matches!(result, Err(ProxyError::UnsupportedMethod(_))));
    }

    #[test]
    fn test_form_wire_encoding() {
        let body = Body::Form(vec![("q".to_string(), "a b".to_string())]);
        assert_eq!(body.to_wire(), b"q=a%20b".to_vec());
        assert!(Body::Raw(vec![]).is_empty());
    }

    #[test]
    fn test_parse_params_edge_cases() {
        assert!(parse_params("").is_empty());
        assert_eq!(
            parse_params("flag&&x="),
            vec![
                ("flag".to_string(), String::new()),
                ("x".to_string(), String::new()),
            ]
        );
        assert_eq!(
            parse_params("bad=%zz"),
            vec![("bad".to_string(), "%zz".to_string())]
        );
    }
}
