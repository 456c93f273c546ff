use std::sync::Arc;

use insta::assert_snapshot;
use pagefarm::{
    application::render::RenderContext,
    domain::entities::{ContentFragments, SiteRecord, TemplateText},
    template::{CompiledTemplate, FunctionTable, TemplateConverter, TemplateError},
};
use time::macros::datetime;

const LANDING: &str = include_str!("fixtures/landing.tpl");
const LANDING_NATIVE: &str = include_str!("fixtures/landing.native.html");

fn site() -> SiteRecord {
    SiteRecord {
        domain: "x.com".to_string(),
        site_id: "site-x".to_string(),
        name: "X Travel".to_string(),
        template: "landing".to_string(),
        content_group: "travel".to_string(),
        analytics: "<script>stat()</script>".to_string(),
        push_script: "<script>push()</script>".to_string(),
    }
}

fn fragments() -> Arc<ContentFragments> {
    Arc::new(ContentFragments {
        keywords: vec!["基线对齐".to_string()],
        images: vec!["/img/sea.jpg".to_string()],
        titles: vec!["周末去哪儿".to_string()],
        contents: vec!["旅游".to_string()],
    })
}

#[test]
fn landing_fixture_converts_to_native_dialect() {
    let native = TemplateConverter::new()
        .convert(LANDING)
        .expect("landing converts");
    assert_eq!(native, LANDING_NATIVE);
}

#[test]
fn native_output_converts_to_itself() {
    let again = TemplateConverter::new()
        .convert(LANDING_NATIVE)
        .expect("native converts");
    assert_eq!(again, LANDING_NATIVE);
}

#[test]
fn landing_fixture_renders_with_site_values() {
    let compiled = CompiledTemplate::compile(&TemplateText {
        name: "landing".to_string(),
        version: "1".to_string(),
        body: LANDING.to_string(),
    })
    .expect("compiles");

    let functions: Vec<&str> = compiled.functions().iter().map(String::as_str).collect();
    assert_eq!(
        functions,
        [
            "cls",
            "iterate",
            "pinyin",
            "random_content",
            "random_keyword",
            "random_url"
        ]
    );

    let context = RenderContext::new(
        &site(),
        "/promo",
        fragments(),
        datetime!(2026-03-01 08:00 UTC),
        FunctionTable::new(fragments(), 42),
    );
    let html = compiled.render(context.into_value()).expect("renders");

    assert!(html.contains("<title>周末去哪儿 - X Travel</title>"), "{html}");
    assert!(html.contains("<h1>基线对齐</h1>"), "{html}");
    assert_eq!(html.matches("<a href=\"/ji-xian-dui-qi/").count(), 3);
    assert!(html.contains("<p data-n=\"1\">"));
    assert!(html.contains("<p data-n=\"2\">"));
    assert!(!html.contains("<p data-n=\"3\">"));
    assert!(html.contains("<script>stat()</script><script>push()</script>"));
    assert!(!html.contains("footer scripts"));
}

#[test]
fn unknown_functions_are_reported_before_rendering() {
    let err = TemplateConverter::new()
        .convert("<p>\n{{ random_thing() }}\n</p>")
        .expect_err("unknown function");
    assert_eq!(err.line, 2);
    assert_snapshot!(err.kind.to_string(), @"call to unknown function `random_thing`");
}

#[test]
fn unclosed_loops_point_at_their_opening_line() {
    let err = CompiledTemplate::compile(&TemplateText {
        name: "broken".to_string(),
        version: "7".to_string(),
        body: "<ul>\n{% loop 3 %}\n<li>{{ random_keyword() }}</li>\n</ul>".to_string(),
    })
    .expect_err("unclosed loop");

    let TemplateError::Convert { name, version, source } = err else {
        panic!("expected a conversion error, got {err:?}");
    };
    assert_eq!((name.as_str(), version.as_str()), ("broken", "7"));
    assert_eq!(source.line, 2);
    assert_snapshot!(
        source.kind.to_string(),
        @"`loop` block opened on line 2 is never closed"
    );
}

#[test]
fn bundled_sample_template_compiles() {
    let compiled = CompiledTemplate::compile(&TemplateText {
        name: "home".to_string(),
        version: "sample".to_string(),
        body: include_str!("../data/templates/home.html").to_string(),
    })
    .expect("sample template compiles");

    assert!(compiled.functions().contains("random_image"));
    assert!(compiled.native_source().contains("{{ fx.pinyin(page.keyword) }}"));
}
