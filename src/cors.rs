//! CORS option translation.
//!
//! The framework hands the adapter an express-style CORS specification. It
//! is normalized here into a validated [`CorsConfig`] (the testable half)
//! and only then turned into a `tower_http::cors::CorsLayer` (the thin
//! half). Absent optional fields stay absent so the layer's own defaults
//! apply — nothing is defaulted on the way through.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::error::AdapterError;

/// Which origins the framework wants allowed.
#[derive(Clone)]
pub enum CorsOrigin {
    /// `origin: true` — allow any origin (`*`).
    Any,
    /// `origin: false` — never emit `Access-Control-Allow-Origin`.
    Disabled,
    /// A single literal origin.
    Exact(String),
    /// A list of literal origins.
    List(Vec<String>),
    /// A caller-supplied match on the request origin, covering regex-style
    /// origin lists without pulling in a regex engine.
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

/// A field that accepts either a comma-separated string or a list, always
/// normalized to a list.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueList(Vec<String>);

impl ValueList {
    pub fn items(&self) -> &[String] {
        &self.0
    }
}

impl From<&str> for ValueList {
    fn from(csv: &str) -> Self {
        Self(csv.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
    }
}

impl From<String> for ValueList {
    fn from(csv: String) -> Self {
        Self::from(csv.as_str())
    }
}

impl From<Vec<String>> for ValueList {
    fn from(items: Vec<String>) -> Self {
        Self(items)
    }
}

impl From<Vec<&str>> for ValueList {
    fn from(items: Vec<&str>) -> Self {
        Self(items.into_iter().map(str::to_owned).collect())
    }
}

/// The CORS specification as the framework passes it to `enable_cors`.
#[derive(Clone, Default)]
pub struct CorsOptions {
    pub origin: Option<CorsOrigin>,
    pub methods: Option<ValueList>,
    pub allowed_headers: Option<ValueList>,
    pub exposed_headers: Option<ValueList>,
    pub credentials: Option<bool>,
    pub max_age: Option<u64>,
}

// ── Normalized form ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) enum OriginConfig {
    Any,
    Disabled,
    Exact(HeaderValue),
    List(Vec<HeaderValue>),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl std::fmt::Debug for OriginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Disabled => f.write_str("Disabled"),
            Self::Exact(v) => f.debug_tuple("Exact").field(v).finish(),
            Self::List(v) => f.debug_tuple("List").field(v).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Validated, runtime-ready CORS configuration.
#[derive(Clone, Debug)]
pub(crate) struct CorsConfig {
    pub origin: OriginConfig,
    pub methods: Option<Vec<Method>>,
    pub allow_headers: Option<Vec<HeaderName>>,
    pub expose_headers: Option<Vec<HeaderName>>,
    pub credentials: Option<bool>,
    pub max_age: Option<Duration>,
}

/// Validates and normalizes [`CorsOptions`]. Fails fast at registration time
/// on malformed origins, methods, or header names.
pub(crate) fn normalize(options: &CorsOptions) -> Result<CorsConfig, AdapterError> {
    let origin = match &options.origin {
        // The underlying middleware's default is `*`; an absent origin keeps
        // that default.
        None | Some(CorsOrigin::Any) => OriginConfig::Any,
        Some(CorsOrigin::Disabled) => OriginConfig::Disabled,
        Some(CorsOrigin::Exact(origin)) => OriginConfig::Exact(parse_origin(origin)?),
        Some(CorsOrigin::List(origins)) => {
            OriginConfig::List(origins.iter().map(|o| parse_origin(o)).collect::<Result<_, _>>()?)
        }
        Some(CorsOrigin::Predicate(f)) => OriginConfig::Predicate(Arc::clone(f)),
    };

    let methods = options
        .methods
        .as_ref()
        .map(|list| {
            list.items()
                .iter()
                .map(|m| {
                    Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()).map_err(|_| {
                        AdapterError::Header(format!("invalid CORS method `{m}`"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    Ok(CorsConfig {
        origin,
        methods,
        allow_headers: parse_header_list(options.allowed_headers.as_ref())?,
        expose_headers: parse_header_list(options.exposed_headers.as_ref())?,
        credentials: options.credentials,
        max_age: options.max_age.map(Duration::from_secs),
    })
}

/// Builds the runtime middleware from a normalized configuration.
pub(crate) fn to_layer(config: CorsConfig) -> CorsLayer {
    let mut layer = CorsLayer::new();
    layer = layer.allow_origin(match config.origin {
        OriginConfig::Any => AllowOrigin::any(),
        OriginConfig::Disabled => AllowOrigin::predicate(|_, _| false),
        OriginConfig::Exact(origin) => AllowOrigin::exact(origin),
        OriginConfig::List(origins) => AllowOrigin::list(origins),
        OriginConfig::Predicate(f) => AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|origin| f(origin))
        }),
    });
    if let Some(methods) = config.methods {
        layer = layer.allow_methods(methods);
    }
    if let Some(headers) = config.allow_headers {
        layer = layer.allow_headers(headers);
    }
    if let Some(headers) = config.expose_headers {
        layer = layer.expose_headers(headers);
    }
    if let Some(credentials) = config.credentials {
        layer = layer.allow_credentials(credentials);
    }
    if let Some(max_age) = config.max_age {
        layer = layer.max_age(max_age);
    }
    layer
}

fn parse_origin(origin: &str) -> Result<HeaderValue, AdapterError> {
    HeaderValue::from_str(origin)
        .map_err(|_| AdapterError::Header(format!("invalid CORS origin `{origin}`")))
}

fn parse_header_list(
    list: Option<&ValueList>,
) -> Result<Option<Vec<HeaderName>>, AdapterError> {
    list.map(|list| {
        list.items()
            .iter()
            .map(|h| {
                HeaderName::try_from(h.trim())
                    .map_err(|_| AdapterError::Header(format!("invalid CORS header `{h}`")))
            })
            .collect::<Result<Vec<_>, _>>()
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_fields_normalize_to_lists() {
        let list = ValueList::from("GET, POST ,delete");
        assert_eq!(list.items(), ["GET", "POST", "delete"]);

        let list = ValueList::from(vec!["x-a", "x-b"]);
        assert_eq!(list.items(), ["x-a", "x-b"]);
    }

    #[test]
    fn absent_fields_stay_absent() {
        let config = normalize(&CorsOptions::default()).unwrap();
        assert!(matches!(config.origin, OriginConfig::Any));
        assert!(config.methods.is_none());
        assert!(config.allow_headers.is_none());
        assert!(config.expose_headers.is_none());
        assert!(config.credentials.is_none());
        assert!(config.max_age.is_none());
    }

    #[test]
    fn origin_variants_map_through() {
        let config = normalize(&CorsOptions {
            origin: Some(CorsOrigin::Exact("https://example.com".to_owned())),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(config.origin, OriginConfig::Exact(_)));

        let config = normalize(&CorsOptions {
            origin: Some(CorsOrigin::Disabled),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(config.origin, OriginConfig::Disabled));
    }

    #[test]
    fn methods_are_validated_and_uppercased() {
        let config = normalize(&CorsOptions {
            methods: Some("get,post".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.methods.unwrap(), vec![Method::GET, Method::POST]);

        let err = normalize(&CorsOptions {
            methods: Some("not a method".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, AdapterError::Header(_)));
    }

    #[test]
    fn header_lists_are_validated() {
        let config = normalize(&CorsOptions {
            allowed_headers: Some("content-type, x-request-id".into()),
            exposed_headers: Some(vec!["x-trace"].into()),
            credentials: Some(true),
            max_age: Some(600),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(config.allow_headers.as_ref().unwrap().len(), 2);
        assert_eq!(config.expose_headers.as_ref().unwrap().len(), 1);
        assert_eq!(config.credentials, Some(true));
        assert_eq!(config.max_age, Some(Duration::from_secs(600)));

        let err = normalize(&CorsOptions {
            allowed_headers: Some("bad header".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, AdapterError::Header(_)));
    }

    #[test]
    fn layer_builds_from_every_origin_shape() {
        for origin in [
            CorsOrigin::Any,
            CorsOrigin::Disabled,
            CorsOrigin::Exact("https://a.example".to_owned()),
            CorsOrigin::List(vec!["https://a.example".to_owned(), "https://b.example".to_owned()]),
            CorsOrigin::Predicate(Arc::new(|origin| origin.ends_with(".example"))),
        ] {
            let config =
                normalize(&CorsOptions { origin: Some(origin), ..Default::default() }).unwrap();
            let _layer = to_layer(config);
        }
    }
}
