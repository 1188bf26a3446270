use std::collections::BTreeMap;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::RelayError,
    filters::classify,
    relay::{self, RelayBody, RelayRequest},
};

/// A message posted by the interception script to the hosting context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "proxy-navigate")]
    Navigate { url: String },

    #[serde(rename = "proxy-form-submit")]
    FormSubmit {
        action: String,
        method: String,
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
}

impl ClientMessage {
    pub const NAVIGATE: &'static str = "proxy-navigate";
    pub const FORM_SUBMIT: &'static str = "proxy-form-submit";

    /// Turns the message back into the relay call a host is expected to make.
    ///
    /// `endpoint` is the relay path the rewritten references were anchored to.
    pub fn into_relay_request(self, endpoint: &str) -> Result<RelayRequest, RelayError> {
        match self {
            Self::Navigate { url } => Ok(RelayRequest::new(Method::GET, target(endpoint, &url)?)),
            Self::FormSubmit {
                action,
                method,
                data,
            } => {
                let mut target = target(endpoint, &action)?;
                let method = match method.to_ascii_uppercase().parse::<Method>() {
                    Ok(method) => method,
                    Err(_) => Method::GET,
                };

                if method == Method::GET || method == Method::HEAD {
                    // fields replace the action's query, as a browser submission does
                    target.set_query(None);
                    target.query_pairs_mut().extend_pairs(&data);
                    Ok(RelayRequest::new(method, target))
                } else {
                    Ok(RelayRequest::new(method, target)
                        .with_body(RelayBody::Form(data.into_iter().collect())))
                }
            }
        }
    }
}

fn target(endpoint: &str, relayed: &str) -> Result<Url, RelayError> {
    if relayed.is_empty() {
        return Err(RelayError::MissingUrl);
    }
    match classify::decode_relay_url(endpoint, relayed) {
        Some(url) => relay::parse_target(url.as_str()),
        None => relay::parse_target(relayed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_navigate_message() {
        let message: ClientMessage = ::serde_json::from_str(
            r#"{"type":"proxy-navigate","url":"/api/proxy?url=https%3A%2F%2Fa.test%2Fx"}"#,
        )
        .expect("navigate message");

        let request = message.into_relay_request("/api/proxy").expect("request");
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.target().as_str(), "https://a.test/x");
        assert!(request.body().is_none());
    }

    #[test]
    fn get_form_submit_moves_fields_into_query() {
        let message: ClientMessage = ::serde_json::from_str(
            r#"{
                "type": "proxy-form-submit",
                "action": "/api/proxy?url=https%3A%2F%2Fa.test%2Fsearch",
                "method": "GET",
                "data": {"q": "rust lang"}
            }"#,
        )
        .expect("form message");

        let request = message.into_relay_request("/api/proxy").expect("request");
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.target().as_str(), "https://a.test/search?q=rust+lang");
    }

    #[test]
    fn get_form_submit_replaces_action_query() {
        let message = ClientMessage::FormSubmit {
            action: "/api/proxy?url=https%3A%2F%2Fa.test%2Fsearch%3Fq%3Dold%26page%3D2".into(),
            method: "get".into(),
            data: [("q".to_string(), "new".to_string())].into(),
        };

        let request = message.into_relay_request("/api/proxy").expect("request");
        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.target().as_str(), "https://a.test/search?q=new");
    }

    #[test]
    fn post_form_submit_carries_form_body() {
        let message = ClientMessage::FormSubmit {
            action: "/api/proxy?url=https%3A%2F%2Fa.test%2Flogin".into(),
            method: "POST".into(),
            data: [("user".to_string(), "me".to_string())].into(),
        };

        let request = message.into_relay_request("/api/proxy").expect("request");
        assert_eq!(request.method(), &Method::POST);
        assert_eq!(
            request.body(),
            Some(&RelayBody::Form(vec![("user".into(), "me".into())])),
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let message = ClientMessage::Navigate { url: "/x".into() };

        assert_eq!(
            ::serde_json::to_value(&message).expect("json"),
            ::serde_json::json!({"type": ClientMessage::NAVIGATE, "url": "/x"}),
        );
    }

    #[test]
    fn empty_target_is_missing() {
        let message = ClientMessage::Navigate { url: String::new() };

        assert!(matches!(
            message.into_relay_request("/api/proxy"),
            Err(RelayError::MissingUrl),
        ));
    }
}
