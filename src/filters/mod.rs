pub mod classify;
pub mod css;
pub mod html;
pub mod snippet;

use std::fmt;

use log::debug;
use url::Url;

#[derive(Clone, Debug)]
pub struct RewriteContext {
    base: Url,
    origin: String,
    endpoint: String,
}

impl RewriteContext {
    pub fn new(base: Url, endpoint: impl Into<String>) -> Self {
        Self {
            origin: base.origin().ascii_serialization(),
            base,
            endpoint: endpoint.into(),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Re-anchors the context on another base, e.g. a document's `<base href>`.
    pub fn with_base(&self, base: Url) -> Self {
        Self::new(base, self.endpoint.clone())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Css,
    Text,
    Binary,
}

impl ContentKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(mime) = content_type.and_then(|value| value.parse::<::mime::Mime>().ok()) else {
            return Self::Binary;
        };

        if mime.type_() == ::mime::TEXT {
            if mime.subtype() == ::mime::HTML {
                Self::Html
            } else if mime.subtype() == ::mime::CSS {
                Self::Css
            } else {
                Self::Text
            }
        } else if mime.type_() == ::mime::APPLICATION
            && (mime.subtype() == ::mime::JSON
                || mime.subtype() == ::mime::JAVASCRIPT
                || mime.suffix() == Some(::mime::JSON))
        {
            Self::Text
        } else {
            Self::Binary
        }
    }

    pub fn rewritten_content_type(self) -> Option<&'static str> {
        match self {
            Self::Html => Some("text/html; charset=utf-8"),
            Self::Css => Some("text/css; charset=utf-8"),
            Self::Text | Self::Binary => None,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Text => "text",
            Self::Binary => "binary",
        })
    }
}

pub struct DefaultResponseFilter;

impl ResponseFilterBuilder for DefaultResponseFilter {
    type FILTER = ResponseFilters;

    fn try_build(self) -> ::anyhow::Result<<Self as ResponseFilterBuilder>::FILTER> {
        let css = self::css::RESPONSE_FILTER_BUILDER.try_build()?;
        let html = self::html::ResponseFilterBuilder { css: css.clone() }.try_build()?;

        Ok(ResponseFilters { css, html })
    }
}

pub struct ResponseFilters {
    css: self::css::ResponseFilter,
    html: self::html::ResponseFilter,
}

impl ResponseFilters {
    pub fn get(&self, kind: ContentKind) -> Option<&dyn ResponseFilter> {
        match kind {
            ContentKind::Html => Some(&self.html),
            ContentKind::Css => Some(&self.css),
            ContentKind::Text | ContentKind::Binary => None,
        }
    }

    pub fn filter(&self, kind: ContentKind, ctx: &RewriteContext, body: String) -> String {
        match self.get(kind) {
            Some(filter) => {
                debug!("rewriting {kind} body from {origin}", origin = ctx.origin());
                filter.filter(ctx, body)
            }
            None => body,
        }
    }
}

pub trait ResponseFilterBuilder {
    type FILTER: 'static + Send + Sync;

    fn try_build(self) -> ::anyhow::Result<<Self as ResponseFilterBuilder>::FILTER>;
}

pub trait ResponseFilter
where
    Self: Send + Sync,
{
    fn filter(&self, ctx: &RewriteContext, body: String) -> String;
}
