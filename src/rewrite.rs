/*!
 * # Response Content Transformer
 *
 * Applied to HTML responses only. Three passes, in order: substitute
 * literal gateway-host occurrences with the target host, patch
 * root-relative attribute references (a `<base>` element does not affect
 * those), then inject the `<base>` element and the interception agent at
 * the top of `<head>`.
 */

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::agent;
use crate::codec::TargetContext;

/// `href`/`src`/`action` values starting with a single `/`. The engine has
/// no lookahead, so the character after the slash is captured and re-emitted
/// to exclude protocol-relative `//` references.
static ROOT_RELATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(href|src|action)\s*=\s*(["'])/([^/])"#).expect("valid attribute regex")
});

static HEAD_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<head[^>]*>").expect("valid head regex"));

/// Rewrite one HTML document for delivery through the gateway.
pub fn transform_html(input: &str, ctx: &TargetContext) -> String {
    let text = substitute_gateway_host(input, ctx);
    let text = rewrite_root_relative(&text, ctx);
    inject_head(&text, ctx)
}

/// Absolute links the target generated for what it believes is its own host
/// can textually match the gateway host; hand them back to the target.
/// Distinct from the attribute rewriting below.
fn substitute_gateway_host(input: &str, ctx: &TargetContext) -> String {
    input.replace(&ctx.gateway_host, &ctx.target_host())
}

fn rewrite_root_relative(input: &str, ctx: &TargetContext) -> String {
    let origin = ctx.target_origin();
    ROOT_RELATIVE_RE
        .replace_all(input, |caps: &Captures| {
            format!(
                "{}={}{}://{}{}/{}/{}",
                &caps[1],
                &caps[2],
                ctx.scheme,
                ctx.gateway_host,
                ctx.secret,
                origin,
                &caps[3]
            )
        })
        .to_string()
}

/// Inject `<base href>` and the agent as the first children of `<head>`,
/// so document-relative references resolve under the gateway without any
/// further rewriting. Documents without a head tag get the block prepended.
fn inject_head(input: &str, ctx: &TargetContext) -> String {
    let base_url = ctx.proxy_base_url();
    let block = format!(
        "<base href=\"{}\">{}",
        base_url,
        agent::agent_script(ctx, &base_url)
    );

    match HEAD_OPEN_RE.find(input) {
        Some(head) => {
            let mut out = String::with_capacity(input.len() + block.len());
            out.push_str(&input[..head.end()]);
            out.push_str(&block);
            out.push_str(&input[head.end()..]);
            out
        }
        None => format!("{}{}", block, input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn ctx(target: &str) -> TargetContext {
        TargetContext {
            target: Url::parse(target).unwrap(),
            scheme: "https".to_string(),
            gateway_host: "gw.example".to_string(),
            secret: "/gate".to_string(),
        }
    }

    #[test]
    fn test_root_relative_href_is_rewritten() {
        let ctx = ctx("https://a.com/dir/page.html");
        let out = rewrite_root_relative(r#"<a href="/p">x</a>"#, &ctx);
        assert_eq!(
            out,
            r#"<a href="https://gw.example/gate/https://a.com/p">x</a>"#
        );
    }

    #[test]
    fn test_src_and_action_are_rewritten() {
        let ctx = ctx("https://a.com/");
        let out = rewrite_root_relative(r#"<img src='/i.png'><form action="/post">"#, &ctx);
        assert!(out.contains(r#"src='https://gw.example/gate/https://a.com/i.png'"#));
        assert!(out.contains(r#"action="https://gw.example/gate/https://a.com/post""#));
    }

    #[test]
    fn test_protocol_relative_is_untouched() {
        let ctx = ctx("https://a.com/");
        let input = r#"<script src="//cdn.example/lib.js"></script>"#;
        assert_eq!(rewrite_root_relative(input, &ctx), input);
    }

    #[test]
    fn test_document_relative_is_untouched() {
        let ctx = ctx("https://a.com/");
        let input = r#"<a href="./next.html">n</a><a href="page.html">p</a>"#;
        assert_eq!(rewrite_root_relative(input, &ctx), input);
    }

    #[test]
    fn test_bare_root_href() {
        let ctx = ctx("https://a.com/dir/");
        let out = rewrite_root_relative(r#"<a href="/">home</a>"#, &ctx);
        assert_eq!(
            out,
            r#"<a href="https://gw.example/gate/https://a.com/">home</a>"#
        );
    }

    #[test]
    fn test_host_substitution_replaces_every_occurrence() {
        let ctx = ctx("https://a.com/");
        let out = substitute_gateway_host(
            "see http://gw.example/x and //gw.example/y",
            &ctx,
        );
        assert_eq!(out, "see http://a.com/x and //a.com/y");
    }

    #[test]
    fn test_base_and_agent_injected_after_head() {
        let ctx = ctx("https://a.com/dir/page.html");
        let out = transform_html("<html><head><title>t</title></head></html>", &ctx);
        let base = r#"<head><base href="https://gw.example/gate/https://a.com/dir/">"#;
        assert!(out.contains(base));
        assert!(out.contains("function proxyUrl"));
        let base_pos = out.find("<base").unwrap();
        let title_pos = out.find("<title").unwrap();
        assert!(base_pos < title_pos);
    }

    #[test]
    fn test_head_with_attributes() {
        let ctx = ctx("https://a.com/");
        let out = transform_html(r#"<head lang="en"><title>t</title></head>"#, &ctx);
        assert!(out.contains(r#"<head lang="en"><base href="#));
    }

    #[test]
    fn test_headless_document_gets_block_prepended() {
        let ctx = ctx("https://a.com/");
        let out = transform_html("<p>bare</p>", &ctx);
        assert!(out.starts_with("<base href="));
        assert!(out.ends_with("<p>bare</p>"));
    }

    #[test]
    fn test_full_pipeline() {
        let ctx = ctx("https://a.com/dir/");
        let out = transform_html(r#"<html><head></head><a href="/p">x</a></html>"#, &ctx);
        assert!(out.contains(r#"href="https://gw.example/gate/https://a.com/p""#));
        assert!(out.contains(r#"<base href="https://gw.example/gate/https://a.com/dir/">"#));
    }
}
