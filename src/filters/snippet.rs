use url::Url;

use crate::message::ClientMessage;

/// Marks anchors and forms whose navigation is handed to the host.
pub const LINK_MARKER: &str = "data-proxy-link";
pub const FORM_MARKER: &str = "data-proxy-form";

pub const SCRIPT_MARKER: &str = "data-proxy-interceptor";

const TEMPLATE: &str = include_str!("interceptor.js");

pub fn generate(base: &Url, endpoint: &str) -> String {
    [
        ("__PROXY_BASE__", js_string(base.as_str())),
        ("__PROXY_ENDPOINT__", js_string(endpoint)),
        ("__PROXY_LINK_MARKER__", js_string(LINK_MARKER)),
        ("__PROXY_FORM_MARKER__", js_string(FORM_MARKER)),
        ("__PROXY_NAVIGATE__", js_string(ClientMessage::NAVIGATE)),
        ("__PROXY_FORM_SUBMIT__", js_string(ClientMessage::FORM_SUBMIT)),
    ]
    .iter()
    .fold(TEMPLATE.to_string(), |script, (placeholder, value)| {
        script.replace(placeholder, value)
    })
}

pub fn script_element(base: &Url, endpoint: &str) -> String {
    format!(
        "<script {SCRIPT_MARKER}>{script}</script>",
        script = generate(base, endpoint),
    )
}

/// Quotes `value` as a JS string literal that is also safe inside `<script>`.
fn js_string(value: &str) -> String {
    ::serde_json::Value::from(value)
        .to_string()
        .replace("</", "<\\/")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}
