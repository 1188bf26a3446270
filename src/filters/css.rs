use std::borrow::Cow;

use regex::{Captures, Regex};

use super::{classify, RewriteContext};

/// Lexical `url(...)` matcher: quoted or bare argument, no CSS grammar.
pub const RESPONSE_FILTER_BUILDER: ResponseFilterBuilder<'static> = ResponseFilterBuilder {
    name: "css",
    re: r#"url\(['"]?([^'")]+)['"]?\)"#,
};

pub struct ResponseFilterBuilder<'a> {
    pub name: &'a str,
    pub re: &'a str,
}

impl super::ResponseFilterBuilder for ResponseFilterBuilder<'static> {
    type FILTER = ResponseFilter;

    fn try_build(self) -> ::anyhow::Result<<Self as super::ResponseFilterBuilder>::FILTER> {
        let Self { name, re } = self;

        Ok(ResponseFilter {
            regex: Regex::new(re).map_err(|e| {
                ::anyhow::anyhow!("failed to init a regex response filter ({name}): {e}")
            })?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ResponseFilter {
    regex: Regex,
}

impl ResponseFilter {
    pub fn rewrite<'t>(&self, css: &'t str, ctx: &RewriteContext) -> Cow<'t, str> {
        self.regex.replace_all(css, |caps: &Captures| {
            let whole = &caps[0];
            let argument = &caps[1];
            if argument.starts_with("data:") || argument.starts_with('#') {
                return whole.to_string();
            }

            match ctx.base().join(argument) {
                Ok(absolute) => format!(
                    "url('{}')",
                    classify::relay_url(ctx.endpoint(), &absolute),
                ),
                Err(_) => whole.to_string(),
            }
        })
    }
}

impl super::ResponseFilter for ResponseFilter {
    fn filter(&self, ctx: &RewriteContext, body: String) -> String {
        let rewritten = match self.rewrite(&body, ctx) {
            Cow::Borrowed(_) => None,
            Cow::Owned(rewritten) => Some(rewritten),
        };
        rewritten.unwrap_or(body)
    }
}
