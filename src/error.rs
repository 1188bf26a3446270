use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("URL parameter is required")]
    MissingUrl,

    #[error("Invalid URL format")]
    InvalidUrl(#[source] InvalidUrl),

    #[error("Invalid request body")]
    InvalidBody(#[source] ::serde_json::Error),

    #[error("Proxy request failed")]
    Upstream(#[source] ::reqwest::Error),
}

#[derive(Debug, Error)]
pub enum InvalidUrl {
    #[error(transparent)]
    Parse(#[from] ::url::ParseError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl RelayError {
    fn message(&self) -> Option<String> {
        match self {
            Self::MissingUrl => None,
            Self::InvalidUrl(error) => Some(error.to_string()),
            Self::InvalidBody(error) => Some(error.to_string()),
            Self::Upstream(error) => Some(error.to_string()),
        }
    }
}

impl ResponseError for RelayError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl(_) | Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
            message: self.message(),
        })
    }
}

#[cfg(test)]
mod tests {
    use actix_web::body::to_bytes;

    use super::*;

    #[actix_web::test]
    async fn missing_url_is_bad_request() {
        let response = RelayError::MissingUrl.error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.expect("body");
        let body: ::serde_json::Value = ::serde_json::from_slice(&body).expect("json body");
        assert_eq!(body["error"], "URL parameter is required");
        assert!(body.get("message").is_none());
    }

    #[test]
    fn invalid_url_carries_parse_failure() {
        let error = RelayError::InvalidUrl(::url::Url::parse("not a url").unwrap_err().into());

        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            error.message().as_deref(),
            Some("relative URL without a base"),
        );
    }
}
