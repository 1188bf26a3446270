use std::{borrow::Cow, cell::RefCell, mem};

use html_escape::decode_html_entities;
use lol_html::{
    element, errors::RewritingError, html_content::ContentType, html_content::Element, text,
    HtmlRewriter, OutputSink, Settings,
};
use log::warn;

use super::{classify, snippet, RewriteContext};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttributeKind {
    Url,
    /// A comma-separated list of `url [descriptor]` candidates.
    SrcSet,
    /// A form target; missing or empty means the document itself.
    FormAction,
}

#[derive(Copy, Clone, Debug)]
pub struct RewriteRule {
    pub element: &'static str,
    pub attribute: &'static str,
    pub kind: AttributeKind,
    pub marker: Option<&'static str>,
}

impl RewriteRule {
    const fn new(element: &'static str, attribute: &'static str) -> Self {
        Self {
            element,
            attribute,
            kind: AttributeKind::Url,
            marker: None,
        }
    }

    const fn srcset(element: &'static str) -> Self {
        Self {
            element,
            attribute: "srcset",
            kind: AttributeKind::SrcSet,
            marker: None,
        }
    }

    fn selector(&self) -> String {
        match self.kind {
            AttributeKind::FormAction => self.element.to_string(),
            AttributeKind::Url | AttributeKind::SrcSet => {
                format!("{}[{}]", self.element, self.attribute)
            }
        }
    }
}

pub static REWRITE_RULES: [RewriteRule; 14] = [
    RewriteRule {
        element: "a",
        attribute: "href",
        kind: AttributeKind::Url,
        marker: Some(snippet::LINK_MARKER),
    },
    RewriteRule::new("link", "href"),
    RewriteRule::new("script", "src"),
    RewriteRule::new("img", "src"),
    RewriteRule::new("img", "data-src"),
    RewriteRule::srcset("img"),
    RewriteRule::new("source", "src"),
    RewriteRule::srcset("source"),
    RewriteRule {
        element: "form",
        attribute: "action",
        kind: AttributeKind::FormAction,
        marker: Some(snippet::FORM_MARKER),
    },
    RewriteRule::new("iframe", "src"),
    RewriteRule::new("video", "src"),
    RewriteRule::new("video", "poster"),
    RewriteRule::new("audio", "src"),
    RewriteRule::new("track", "src"),
];

pub struct ResponseFilterBuilder {
    pub css: super::css::ResponseFilter,
}

impl super::ResponseFilterBuilder for ResponseFilterBuilder {
    type FILTER = ResponseFilter;

    fn try_build(self) -> ::anyhow::Result<<Self as super::ResponseFilterBuilder>::FILTER> {
        let Self { css } = self;

        Ok(ResponseFilter { css })
    }
}

pub struct ResponseFilter {
    css: super::css::ResponseFilter,
}

impl ResponseFilter {
    pub fn rewrite(&self, html: &str, ctx: &RewriteContext) -> Result<String, RewritingError> {
        let ctx = &document_base(html, ctx);
        let css = &self.css;
        let script = snippet::script_element(ctx.base(), ctx.endpoint());
        let style = RefCell::new(String::new());

        let mut output = Vec::with_capacity(html.len() + script.len());
        let mut element_content_handlers = vec![
            element!("meta[http-equiv]", |el| {
                let is_csp = el.get_attribute("http-equiv").map_or(false, |value| {
                    value.trim().eq_ignore_ascii_case("content-security-policy")
                });
                if is_csp {
                    el.remove();
                }
                Ok(())
            }),
            element!("[integrity]", |el| {
                el.remove_attribute("integrity");
                Ok(())
            }),
            element!("base[href]", |el| {
                el.remove_attribute("href");
                Ok(())
            }),
        ];
        element_content_handlers.extend(REWRITE_RULES.iter().map(move |rule| {
            element!(rule.selector(), move |el| {
                rewrite_attribute(el, rule, ctx);
                Ok(())
            })
        }));
        element_content_handlers.extend([
            element!("[style]", |el| {
                if let Some(value) = el.get_attribute("style") {
                    let value = decode_html_entities(&value);
                    if let Cow::Owned(rewritten) = css.rewrite(&value, ctx) {
                        el.set_attribute("style", &rewritten)?;
                    }
                }
                Ok(())
            }),
            text!("style", |chunk| {
                let mut buffer = style.borrow_mut();
                buffer.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    let source = mem::take(&mut *buffer);
                    chunk.replace(&css.rewrite(&source, ctx), ContentType::Html);
                } else {
                    chunk.remove();
                }
                Ok(())
            }),
            element!("head", |el| {
                el.append(&script, ContentType::Html);
                Ok(())
            }),
        ]);

        let rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers,
                ..Settings::default()
            },
            |c: &[u8]| output.extend_from_slice(c),
        );
        feed(rewriter, html)?;

        Ok(String::from_utf8(output)
            .unwrap_or_else(|error| String::from_utf8_lossy(error.as_bytes()).into_owned()))
    }
}

impl super::ResponseFilter for ResponseFilter {
    fn filter(&self, ctx: &RewriteContext, body: String) -> String {
        match self.rewrite(&body, ctx) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to rewrite html from {origin}: {e}", origin = ctx.origin());
                body
            }
        }
    }
}

fn feed<O>(mut rewriter: HtmlRewriter<'_, O>, html: &str) -> Result<(), RewritingError>
where
    O: OutputSink,
{
    rewriter.write(html.as_bytes())?;
    rewriter.end()
}

/// Resolves the document's effective base: its first `<base href>`, if any.
fn document_base(html: &str, ctx: &RewriteContext) -> RewriteContext {
    let href = RefCell::new(None);
    let rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![element!("base[href]", |el| {
                let mut href = href.borrow_mut();
                if href.is_none() {
                    *href = el.get_attribute("href");
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    if feed(rewriter, html).is_err() {
        return ctx.clone();
    }

    href.into_inner()
        .and_then(|href| ctx.base().join(decode_html_entities(&href).trim()).ok())
        .map_or_else(|| ctx.clone(), |base| ctx.with_base(base))
}

fn rewrite_attribute(el: &mut Element, rule: &RewriteRule, ctx: &RewriteContext) {
    let value = el.get_attribute(rule.attribute).unwrap_or_default();
    let value = decode_html_entities(&value);

    let rewritten = match rule.kind {
        AttributeKind::Url => classify::classify(&value, ctx).into_relay(),
        AttributeKind::SrcSet => rewrite_srcset(&value, ctx),
        AttributeKind::FormAction => {
            let action = match value.trim() {
                "" => ctx.base().as_str(),
                action => action,
            };
            classify::classify(action, ctx).into_relay()
        }
    };
    let Some(rewritten) = rewritten else {
        return;
    };

    let result = el.set_attribute(rule.attribute, &rewritten).and_then(|()| {
        match rule.marker {
            Some(marker) => el.set_attribute(marker, "true"),
            None => Ok(()),
        }
    });
    if let Err(e) = result {
        warn!("failed to rewrite <{} {}>: {e}", rule.element, rule.attribute);
    }
}

fn rewrite_srcset(srcset: &str, ctx: &RewriteContext) -> Option<String> {
    let mut candidates = Vec::new();
    let mut changed = false;

    let mut rest = srcset;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }

        let end = rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let (url, tail) = rest.split_at(end);
        let (url, descriptors) = if url.ends_with(',') {
            rest = tail;
            (url.trim_end_matches(','), "")
        } else {
            let end = tail.find(',').unwrap_or(tail.len());
            rest = &tail[end..];
            (url, tail[..end].trim())
        };

        let url = classify::classify(url, ctx);
        changed |= url.is_relay();
        let url = url.into_cow();
        candidates.push(match descriptors {
            "" => url.into_owned(),
            descriptors => format!("{url} {descriptors}"),
        });
    }

    changed.then(|| candidates.join(", "))
}

#[cfg(test)]
mod tests {
    use regex::Regex;
    use url::Url;

    use super::super::ResponseFilterBuilder as _;
    use super::*;

    fn rewrite(html: &str, base: &str) -> String {
        let css = super::super::css::RESPONSE_FILTER_BUILDER
            .try_build()
            .expect("css filter");
        let filter = ResponseFilterBuilder { css }.try_build().expect("html filter");
        let ctx = RewriteContext::new(Url::parse(base).expect("base url"), "/api/proxy");
        filter.rewrite(html, &ctx).expect("rewritten html")
    }

    /// Decoded targets of every relayed attribute, in document order.
    fn targets(html: &str) -> Vec<String> {
        let re = Regex::new(r"/api/proxy\?url=([A-Za-z0-9%._~*!-]+)").expect("regex");
        re.captures_iter(html)
            .map(|caps| {
                classify::decode_target(&caps[1])
                    .expect("decodable target")
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn rewrites_anchor_with_marker() {
        let html = rewrite(
            r#"<html><head></head><body><a href="/x">x</a></body></html>"#,
            "https://a.test",
        );

        assert!(html.contains(
            r#"<a href="/api/proxy?url=https%3A%2F%2Fa.test%2Fx" data-proxy-link="true">"#
        ));
    }

    #[test]
    fn appends_interceptor_as_last_child_of_head() {
        let html = rewrite(
            r#"<html><head><title>t</title></head><body></body></html>"#,
            "https://a.test/page",
        );

        let script = html
            .find("<script data-proxy-interceptor>")
            .expect("interceptor script");
        let title = html.find("</title>").expect("title");
        let head_end = html.find("</head>").expect("head end");
        assert!(title < script && script < head_end);
        assert!(html.contains(r#"var BASE = "https://a.test/page";"#));
    }

    #[test]
    fn rewrites_every_rule_element() {
        let html = rewrite(
            r#"<html><head>
                <link rel="stylesheet" href="site.css">
                <script src="/app.js"></script>
            </head><body>
                <img src="a.png" data-src="lazy.png">
                <picture><source src="b.webp" srcset="c.webp"></picture>
                <iframe src="https://embed.test/frame"></iframe>
                <video src="v.mp4" poster="p.jpg"><track src="subs.vtt"></video>
                <audio src="s.mp3"></audio>
            </body></html>"#,
            "https://a.test/dir/",
        );

        assert_eq!(
            targets(&html),
            [
                "https://a.test/dir/site.css",
                "https://a.test/app.js",
                "https://a.test/dir/a.png",
                "https://a.test/dir/lazy.png",
                "https://a.test/dir/b.webp",
                "https://a.test/dir/c.webp",
                "https://embed.test/frame",
                "https://a.test/dir/v.mp4",
                "https://a.test/dir/p.jpg",
                "https://a.test/dir/subs.vtt",
                "https://a.test/dir/s.mp3",
            ],
        );
    }

    #[test]
    fn leaves_skipped_references_untouched() {
        let source = r##"<a href="#top">top</a><a href="javascript:void(0)">js</a><a href="mailto:me@a.test">mail</a><img src="data:image/png;base64,AAAA">"##;
        let html = rewrite(source, "https://a.test/");

        assert_eq!(html, source);
        assert!(!html.contains("data-proxy-link"));
    }

    #[test]
    fn anchors_forms_to_base_when_action_is_missing() {
        let html = rewrite(
            r#"<form method="post"><input name="q"></form><form action="">x</form><form action="/search">y</form>"#,
            "https://a.test/page?x=1",
        );

        assert_eq!(
            targets(&html),
            [
                "https://a.test/page?x=1",
                "https://a.test/page?x=1",
                "https://a.test/search",
            ],
        );
        assert_eq!(html.matches(r#"data-proxy-form="true""#).count(), 3);
        assert!(html.contains(r#"method="post""#));
    }

    #[test]
    fn rewrites_srcset_per_candidate() {
        let html = rewrite(
            r#"<img srcset="small.png 480w, /large.png 2x,data:image/png;base64,AAAA 3x">"#,
            "https://a.test/img/",
        );

        assert_eq!(
            targets(&html),
            ["https://a.test/img/small.png", "https://a.test/large.png"],
        );
        assert!(html.contains(" 480w, /api/proxy?url="));
        assert!(html.contains(" 2x, data:image/png;base64,AAAA 3x\""));
    }

    #[test]
    fn honors_and_drops_base_element() {
        let html = rewrite(
            r#"<html><head><base href="https://cdn.test/assets/"></head><body><img src="i.png"></body></html>"#,
            "https://a.test/page",
        );

        assert_eq!(targets(&html)[0], "https://cdn.test/assets/i.png");
        assert!(!html.contains(r#"href="https://cdn.test/assets/""#));
        assert!(html.contains(r#"var BASE = "https://cdn.test/assets/";"#));
    }

    #[test]
    fn decodes_character_references_before_resolving() {
        let html = rewrite(r#"<a href="/s?a=1&amp;b=2">s</a>"#, "https://a.test/");

        assert_eq!(targets(&html), ["https://a.test/s?a=1&b=2"]);
    }

    #[test]
    fn strips_origin_security_policies() {
        let html = rewrite(
            r#"<html><head><meta http-equiv="Content-Security-Policy" content="default-src 'self'"><script src="/a.js" integrity="sha384-abc"></script></head></html>"#,
            "https://a.test/",
        );

        assert!(!html.contains("Content-Security-Policy"));
        assert!(!html.contains("integrity"));
    }

    #[test]
    fn rewrites_inline_styles() {
        let html = rewrite(
            r#"<style>body { background: url("bg.png") }</style><div style="background:url(&quot;/d.png&quot;)"></div>"#,
            "https://a.test/dir/",
        );

        assert_eq!(
            targets(&html),
            ["https://a.test/dir/bg.png", "https://a.test/d.png"],
        );
    }

    #[test]
    fn decodes_named_references_like_a_browser() {
        let html = rewrite(
            r#"<a href="/s?a=1&amp;b=&nbsp;x&#x41;">s</a>"#,
            "https://a.test/",
        );

        assert_eq!(targets(&html), ["https://a.test/s?a=1&b=%C2%A0xA"]);
    }
}
