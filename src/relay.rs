use actix_web::{http::header::HeaderMap as InboundHeaderMap, web::Bytes};
use log::warn;
use reqwest::{
    header::{self, HeaderMap, HeaderName},
    Client, Method, StatusCode,
};
use serde_json::Value;
use url::Url;

use crate::{
    config::Config,
    error::{InvalidUrl, RelayError},
    filters::{classify, ContentKind},
};

/// Response headers never handed back to the browser.
///
/// The body is re-served decoded (and possibly rewritten), and the origin's
/// framing and transport security policies no longer apply behind the relay.
pub const DENIED_RESPONSE_HEADERS: [HeaderName; 6] = [
    header::CONTENT_ENCODING,
    header::CONTENT_LENGTH,
    header::CONTENT_SECURITY_POLICY,
    header::STRICT_TRANSPORT_SECURITY,
    header::TRANSFER_ENCODING,
    header::X_FRAME_OPTIONS,
];

const ACCEPT_ENCODING: &str = "gzip, deflate, br";

/// Parses a relay target, accepting only absolute `http`/`https` URLs.
pub fn parse_target(target: &str) -> Result<Url, RelayError> {
    let url = Url::parse(target).map_err(|error| RelayError::InvalidUrl(error.into()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(RelayError::InvalidUrl(InvalidUrl::UnsupportedScheme(
            scheme.to_string(),
        ))),
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InboundHeaders {
    pub user_agent: Option<String>,
    pub accept: Option<String>,
    pub accept_language: Option<String>,
    pub referer: Option<String>,
}

impl InboundHeaders {
    pub fn from_headers(headers: &InboundHeaderMap) -> Self {
        let get = |key: HeaderName| {
            headers
                .get(key)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        };

        Self {
            user_agent: get(header::USER_AGENT),
            accept: get(header::ACCEPT),
            accept_language: get(header::ACCEPT_LANGUAGE),
            referer: get(header::REFERER),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RelayBody {
    Json(Value),
    Form(Vec<(String, String)>),
    Raw {
        content_type: Option<String>,
        bytes: Vec<u8>,
    },
}

impl RelayBody {
    pub fn parse(content_type: Option<&str>, bytes: &[u8]) -> Result<Option<Self>, RelayError> {
        if bytes.is_empty() {
            return Ok(None);
        }

        let mime = content_type.and_then(|value| value.parse::<::mime::Mime>().ok());
        match mime {
            Some(mime)
                if mime.subtype() == ::mime::JSON || mime.suffix() == Some(::mime::JSON) =>
            {
                ::serde_json::from_slice(bytes)
                    .map(|value| Some(Self::Json(value)))
                    .map_err(RelayError::InvalidBody)
            }
            Some(mime)
                if mime.type_() == ::mime::APPLICATION
                    && mime.subtype() == ::mime::WWW_FORM_URLENCODED =>
            {
                Ok(Some(Self::Form(
                    ::url::form_urlencoded::parse(bytes).into_owned().collect(),
                )))
            }
            _ => Ok(Some(Self::Raw {
                content_type: content_type.map(ToString::to_string),
                bytes: bytes.to_vec(),
            })),
        }
    }

    /// Removes the `url` field, which addresses the relay and never the origin.
    pub fn take_url(&mut self) -> Option<String> {
        match self {
            Self::Json(Value::Object(fields)) => match fields.remove("url") {
                Some(Value::String(url)) => Some(url),
                _ => None,
            },
            Self::Json(_) | Self::Raw { .. } => None,
            Self::Form(fields) => {
                let mut url = None;
                fields.retain(|(key, value)| {
                    if key == "url" {
                        url.get_or_insert_with(|| value.clone());
                        false
                    } else {
                        true
                    }
                });
                url
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Json(Value::Object(fields)) => fields.is_empty(),
            Self::Json(Value::Array(items)) => items.is_empty(),
            Self::Json(Value::Null) => true,
            Self::Json(_) => false,
            Self::Form(fields) => fields.is_empty(),
            Self::Raw { bytes, .. } => bytes.is_empty(),
        }
    }

    pub fn encode(&self) -> (Option<&str>, Vec<u8>) {
        match self {
            Self::Json(value) => (Some("application/json"), value.to_string().into_bytes()),
            Self::Form(fields) => (
                Some("application/x-www-form-urlencoded"),
                ::url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish()
                    .into_bytes(),
            ),
            Self::Raw {
                content_type,
                bytes,
            } => (content_type.as_deref(), bytes.clone()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelayRequest {
    method: Method,
    target: Url,
    headers: InboundHeaders,
    body: Option<RelayBody>,
}

impl RelayRequest {
    pub fn new(method: Method, target: Url) -> Self {
        Self {
            method,
            target,
            headers: InboundHeaders::default(),
            body: None,
        }
    }

    /// Builds a relay request from the parts of an inbound HTTP request.
    ///
    /// The target comes from the `url` query parameter, falling back to the
    /// `url` field of a JSON or form body.
    pub fn from_parts(
        method: Method,
        query: &str,
        headers: &InboundHeaderMap,
        body: &[u8],
    ) -> Result<Self, RelayError> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let mut body = RelayBody::parse(content_type, body)?;
        let body_url = body.as_mut().and_then(RelayBody::take_url);

        let query_url = ::url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "url")
            .map(|(_, value)| value.into_owned());

        let target = query_url
            .filter(|url| !url.is_empty())
            .or(body_url.filter(|url| !url.is_empty()))
            .ok_or(RelayError::MissingUrl)?;

        let request = Self::new(method, parse_target(&target)?)
            .with_headers(InboundHeaders::from_headers(headers));
        Ok(match body {
            Some(body) => request.with_body(body),
            None => request,
        })
    }

    pub fn with_headers(mut self, headers: InboundHeaders) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, mut body: RelayBody) -> Self {
        body.take_url();
        self.body = Some(body).filter(|body| !body.is_empty());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn headers(&self) -> &InboundHeaders {
        &self.headers
    }

    pub fn body(&self) -> Option<&RelayBody> {
        self.body.as_ref()
    }

    /// The body sent upstream; GET and HEAD never carry one.
    fn outbound_body(&self) -> Option<&RelayBody> {
        match self.method {
            Method::GET | Method::HEAD => None,
            _ => self.body.as_ref(),
        }
    }
}

pub struct Relay {
    client: Client,
    endpoint: String,
    default_user_agent: String,
    default_accept: String,
    default_accept_language: String,
}

impl Relay {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.relay_endpoint.clone(),
            default_user_agent: config.default_user_agent.clone(),
            default_accept: config.default_accept.clone(),
            default_accept_language: config.default_accept_language.clone(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn build(&self, request: &RelayRequest) -> Result<::reqwest::Request, RelayError> {
        let InboundHeaders {
            user_agent,
            accept,
            accept_language,
            referer,
        } = &request.headers;

        let mut builder = self
            .client
            .request(request.method.clone(), request.target.clone())
            .header(
                header::USER_AGENT,
                user_agent.as_deref().unwrap_or(&self.default_user_agent),
            )
            .header(
                header::ACCEPT,
                accept.as_deref().unwrap_or(&self.default_accept),
            )
            .header(
                header::ACCEPT_LANGUAGE,
                accept_language
                    .as_deref()
                    .unwrap_or(&self.default_accept_language),
            )
            .header(header::ACCEPT_ENCODING, ACCEPT_ENCODING);

        if let Some(referer) = referer {
            // a relayed page refers to its origin page, not to the relay
            builder = match classify::decode_relay_url(&self.endpoint, referer) {
                Some(origin_referer) => builder.header(header::REFERER, origin_referer.as_str()),
                None => builder.header(header::REFERER, referer.as_str()),
            };
        }

        if let Some(body) = request.outbound_body() {
            let (content_type, bytes) = body.encode();
            if let Some(content_type) = content_type {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder = builder.body(bytes);
        }

        builder.build().map_err(RelayError::Upstream)
    }

    pub async fn send(&self, request: RelayRequest) -> Result<RelayResponse, RelayError> {
        let outbound = self.build(&request)?;
        match self.client.execute(outbound).await {
            Ok(response) => Ok(RelayResponse::new(response)),
            Err(e) => {
                warn!("failed to relay {target}: {e}", target = request.target);
                Err(RelayError::Upstream(e))
            }
        }
    }
}

#[derive(Debug)]
pub struct RelayResponse {
    status: StatusCode,
    url: Url,
    headers: HeaderMap,
    kind: ContentKind,
    inner: ::reqwest::Response,
}

impl RelayResponse {
    fn new(inner: ::reqwest::Response) -> Self {
        let kind = ContentKind::from_content_type(
            inner
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
        );

        Self {
            status: inner.status(),
            url: inner.url().clone(),
            headers: filter_headers(inner.headers()),
            kind,
            inner,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub async fn text(self) -> Result<String, RelayError> {
        self.inner.text().await.map_err(RelayError::Upstream)
    }

    pub async fn bytes(self) -> Result<Bytes, RelayError> {
        self.inner.bytes().await.map_err(RelayError::Upstream)
    }
}

pub fn filter_headers(headers: &HeaderMap) -> HeaderMap {
    headers
        .iter()
        .filter(|(key, _)| !DENIED_RESPONSE_HEADERS.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
