use std::borrow::Cow;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use super::RewriteContext;

/// `encodeURIComponent`'s unescaped set minus `'`, `(` and `)`, so a relay URL
/// can sit inside `url('...')` and quoted attributes verbatim.
const RELAY_QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*');

const SKIPPED_PREFIXES: [&str; 4] = ["#", "javascript:", "data:", "mailto:"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classified<'a> {
    Skip(&'a str),
    Relay(String),
}

impl<'a> Classified<'a> {
    pub fn into_cow(self) -> Cow<'a, str> {
        match self {
            Self::Skip(reference) => Cow::Borrowed(reference),
            Self::Relay(url) => Cow::Owned(url),
        }
    }

    pub fn into_relay(self) -> Option<String> {
        match self {
            Self::Skip(_) => None,
            Self::Relay(url) => Some(url),
        }
    }

    pub fn is_relay(&self) -> bool {
        matches!(self, Self::Relay(_))
    }
}

pub fn is_skipped(reference: &str) -> bool {
    SKIPPED_PREFIXES.iter().any(|prefix| {
        reference
            .get(..prefix.len())
            .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
    })
}

pub fn classify<'a>(reference: &'a str, ctx: &RewriteContext) -> Classified<'a> {
    if reference.is_empty() || is_skipped(reference) {
        return Classified::Skip(reference);
    }

    match ctx.base().join(reference) {
        Ok(absolute) => Classified::Relay(relay_url(ctx.endpoint(), &absolute)),
        Err(_) => Classified::Skip(reference),
    }
}

/// Builds `<endpoint>?url=<encoded target>`.
pub fn relay_url(endpoint: &str, target: &Url) -> String {
    format!(
        "{endpoint}?url={target}",
        target = utf8_percent_encode(target.as_str(), RELAY_QUERY),
    )
}

/// Recovers the target of a relay URL, absolute or path-relative.
///
/// Returns `None` when `candidate` does not address `endpoint` or carries no
/// parseable `url` parameter.
pub fn decode_relay_url(endpoint: &str, candidate: &str) -> Option<Url> {
    let (path, query) = match Url::parse(candidate) {
        Ok(url) => (
            url.path().to_string(),
            url.query().map(ToString::to_string)?,
        ),
        Err(::url::ParseError::RelativeUrlWithoutBase) => {
            let (path, query) = candidate.split_once('?')?;
            (path.to_string(), query.to_string())
        }
        Err(_) => return None,
    };
    if path != endpoint {
        return None;
    }

    ::url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "url")
        .and_then(|(_, value)| Url::parse(&value).ok())
}

pub fn decode_target(encoded: &str) -> Option<Url> {
    let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
    Url::parse(&decoded).ok()
}
