//! End-to-end rendering of compiled pages.

use gsp_parser::ParseOptions;
use gsp_runtime::{
    compile_source, render, render_to_string, Bindings, CodecSettings, EncodingStateRegistry,
    RenderEnv, RenderError, TagCallable, TagDescriptor, TagError, TagLibrary, Value,
};
use insta::assert_snapshot;
use pretty_assertions::assert_eq;
use rayon::prelude::*;
use smol_str::SmolStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn bindings(entries: &[(&str, Value)]) -> Bindings {
    entries
        .iter()
        .map(|(name, value)| ((*name).into(), value.clone()))
        .collect()
}

fn test_library() -> TagLibrary {
    TagLibrary::new("my", "MyTagLib")
        .tag(
            TagDescriptor::new(
                "greeting",
                TagCallable::no_args(|_| Ok(Value::from("Hello <World>"))),
            )
            .returns_value(),
        )
        .tag(TagDescriptor::new(
            "link",
            TagCallable::attrs(|attrs, ctx| {
                let href = attrs.get("href").cloned().unwrap_or_default();
                ctx.write(format!("<a href=\"{href}\">"))?;
                ctx.write("link</a>")?;
                Ok(Value::Null)
            }),
        ))
        .tag(TagDescriptor::new(
            "stamp",
            TagCallable::attrs(|_, ctx| {
                ctx.write("[stamp]")?;
                Ok(Value::Null)
            }),
        ))
        .tag(
            TagDescriptor::new(
                "echo",
                TagCallable::with_body(|attrs, body, ctx| {
                    ctx.write(attrs.get("value").cloned().unwrap_or_default())?;
                    let output = body.call(ctx)?;
                    ctx.write(output)?;
                    Ok(Value::Null)
                }),
            )
            .encode_as(CodecSettings {
                taglib: Some("HTML".into()),
                ..CodecSettings::default()
            }),
        )
        .tag(TagDescriptor::new(
            "depth",
            TagCallable::no_args(|ctx| {
                let depth = ctx.frame_depth();
                ctx.write(depth.to_string())?;
                Ok(Value::Null)
            }),
        ))
        .tag(TagDescriptor::new(
            "fail",
            TagCallable::no_args(|_| Err(TagError::msg("boom"))),
        ))
}

fn env() -> RenderEnv {
    let env = RenderEnv::default();
    env.taglibs.register(test_library());
    env
}

fn render_source(source: &str, bindings: Bindings) -> Result<String, RenderError> {
    let page = compile_source("test.gsp", source, &ParseOptions::default()).unwrap();
    render_to_string(&page, bindings, &env())
}

#[test]
fn expressions_are_html_encoded() {
    let html = render_source(
        "<p>${name}</p>",
        bindings(&[("name", Value::from("<Tom & Jerry>"))]),
    )
    .unwrap();
    assert_eq!(html, "<p>&lt;Tom &amp; Jerry&gt;</p>");
}

#[test]
fn plain_html_is_written_unchanged() {
    let html = render_source("<div>hi</div>", Bindings::new()).unwrap();
    assert_eq!(html, "<div>hi</div>");
}

#[test]
fn blank_lines_around_expressions_are_kept() {
    let source =
        "Please click the link below to confirm your email address:\n\n${uri}\n\n\nThanks";
    let html = render_source(
        source,
        bindings(&[("uri", Value::from("https://example.com/confirm/7"))]),
    )
    .unwrap();
    assert_eq!(
        html,
        "Please click the link below to confirm your email address:\n\nhttps://example.com/confirm/7\n\n\nThanks"
    );
}

#[test]
fn expressions_are_evaluated_once_per_render() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let env = env();
    env.taglibs.register(TagLibrary::new("counter", "CounterTagLib").tag(
        TagDescriptor::new(
            "next",
            TagCallable::no_args(move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Value::from(n))
            }),
        )
        .returns_value(),
    ));
    let page =
        compile_source("count.gsp", "<b>${counter.next()}</b>", &ParseOptions::default()).unwrap();

    let html = render_to_string(&page, Bindings::new(), &env).unwrap();
    assert_eq!(html, "<b>1</b>");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn null_expressions_print_nothing() {
    let html = render_source("[${missing}]", Bindings::new()).unwrap();
    assert_eq!(html, "[]");
}

#[test]
fn unknown_namespace_is_reported() {
    let error = render_source("<tbody>\n  <tt:form />\n</tbody>", Bindings::new()).unwrap_err();
    match &error {
        RenderError::TagNotFound {
            namespace,
            name,
            line,
            ..
        } => {
            assert_eq!(namespace, "tt");
            assert_eq!(name, "form");
            assert_eq!(*line, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_snapshot!(error.to_string(), @"Tag [form] does not exist. No corresponding tag library found for namespace: tt");
}

#[test]
fn tag_failures_are_wrapped() {
    let error = render_source("line one\n<my:fail/>", Bindings::new()).unwrap_err();
    let RenderError::TagExecution(failure) = &error else {
        panic!("unexpected error: {error:?}");
    };
    assert_eq!(failure.namespace, "my");
    assert_eq!(failure.tag, "fail");
    assert_eq!(failure.library, "MyTagLib");
    assert_eq!(failure.page, "test.gsp");
    assert_eq!(failure.line, 2);
    assert_snapshot!(error.to_string(), @"Error executing tag <my:fail>: boom");
}

#[test]
fn nested_errors_pass_through_unchanged() {
    let error = render_source(
        "<g:if test=\"${true}\">\n${missing.name}</g:if>",
        Bindings::new(),
    )
    .unwrap_err();
    assert!(matches!(error, RenderError::Evaluation { line: 2, .. }));
    assert_snapshot!(error.to_string(), @"Error evaluating expression [missing.name] on line [2] of [test.gsp]: Cannot get property 'name' on null object");
}

#[test]
fn frames_are_balanced_when_a_tag_fails() {
    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let env = env();
    env.taglibs.register(TagLibrary::new("spy", "SpyTagLib").tag(TagDescriptor::new(
        "watch",
        TagCallable::with_body(move |_, body, ctx| {
            let depth = ctx.frame_depth();
            let stats = ctx.frame_stats();
            let outcome = body.call(ctx);
            let after = ctx.frame_stats();
            sink.lock().unwrap().push((
                depth,
                ctx.frame_depth(),
                after.pushed - stats.pushed,
                after.popped - stats.popped,
                outcome.is_err(),
            ));
            Ok(Value::Null)
        }),
    )));
    let page = compile_source(
        "spy.gsp",
        "<spy:watch><my:fail encodeAs=\"HTML\"/></spy:watch>",
        &ParseOptions::default(),
    )
    .unwrap();

    let html = render_to_string(&page, Bindings::new(), &env).unwrap();
    assert_eq!(html, "");
    let records = records.lock().unwrap();
    let (before, after, pushed, popped, failed) = records[0];
    assert_eq!(before, after);
    assert_eq!(pushed, 2, "body capture frame and the failing tag's frame");
    assert_eq!(popped, pushed);
    assert!(failed);
}

#[test]
fn core_conditionals() {
    let source = "<g:if test=\"${n > 1}\">many</g:if><g:elseif test=\"${n == 1}\">one</g:elseif><g:else>none</g:else>";
    let render = |n: i64| render_source(source, bindings(&[("n", Value::from(n))])).unwrap();
    assert_eq!(render(5), "many");
    assert_eq!(render(1), "one");
    assert_eq!(render(0), "none");

    let html = render_source("<g:unless test=\"${flag}\">off</g:unless>", Bindings::new()).unwrap();
    assert_eq!(html, "off");
}

#[test]
fn else_without_if_fails() {
    let error = render_source("<g:else>x</g:else>", Bindings::new()).unwrap_err();
    assert!(matches!(error, RenderError::TagExecution(_)));
}

#[test]
fn each_binds_items_and_status() {
    let html = render_source(
        "<g:each in=\"${items}\" var=\"item\" status=\"i\">${i}:${item};</g:each>",
        bindings(&[("items", Value::from(vec!["a", "<b>"]))]),
    )
    .unwrap();
    assert_eq!(html, "0:a;1:&lt;b&gt;;");

    let html = render_source(
        "<g:each in=\"${[1, 2, 3]}\">${it * 10} </g:each>",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "10 20 30 ");
}

#[test]
fn set_assigns_page_variables() {
    let html = render_source(
        "<g:set var=\"total\" value=\"${2 + 3}\"/>${total}<g:set var=\"label\">x${total}</g:set>${label}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "5x5");
}

#[test]
fn body_value_is_returned_when_nothing_was_written() {
    let html = render_source("<g:set var=\"n\"><% 6 * 7 %></g:set>[${n}]", Bindings::new())
        .unwrap();
    assert_eq!(html, "[42]");

    let html = render_source("<g:set var=\"n\">a<% 6 * 7 %></g:set>[${n}]", Bindings::new())
        .unwrap();
    assert_eq!(html, "[a]");

    let html = render_source("<g:set var=\"n\"><% 6 * 7 %>b</g:set>[${n}]", Bindings::new())
        .unwrap();
    assert_eq!(html, "[b]");
}

#[test]
fn while_reevaluates_its_test() {
    let html = render_source(
        "<% i = 0 %><g:while test=\"${i < 3}\"><% i = i + 1 %>${i}</g:while>",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "123");
}

#[test]
fn collect_and_find_all() {
    let book = |title: &str, pages: i64| -> Value {
        [
            (SmolStr::new("title"), Value::from(title)),
            (SmolStr::new("pages"), Value::from(pages)),
        ]
            .into_iter()
            .collect()
    };
    let books = Value::List(vec![book("Dune", 412), book("Emma", 90), book("<Ulysses>", 730)]);

    let html = render_source(
        "<g:collect in=\"${books}\" expr=\"it.title\">[${it}]</g:collect>",
        bindings(&[("books", books.clone())]),
    )
    .unwrap();
    assert_eq!(html, "[Dune][Emma][&lt;Ulysses&gt;]");

    let html = render_source(
        "<g:findAll in=\"${books}\" expr=\"${it.pages > 100}\">${it.title};</g:findAll>",
        bindings(&[("books", books)]),
    )
    .unwrap();
    assert_eq!(html, "Dune;&lt;Ulysses&gt;;");
}

#[test]
fn scriptlets_and_declarations() {
    let html = render_source(
        "<%! greeting = 'hi' %><% count = 2 %><%= count * 2 %> ${greeting}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "4 hi");
}

#[test]
fn page_directive_changes_expression_codec() {
    let html = render_source(
        "<%@ page defaultCodec=\"none\" %>${'<b>'}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "<b>");
}

#[test]
fn explicit_encoding_is_not_repeated() {
    let html = render_source("${'<b>'.encodeAsHTML()}", Bindings::new()).unwrap();
    assert_eq!(html, "&lt;b&gt;");

    let html = render_source("${raw('<b>')}", Bindings::new()).unwrap();
    assert_eq!(html, "<b>");
}

#[test]
fn javascript_applies_to_safely_encoded_values() {
    let html = render_source(
        "${'<b>'.encodeAsHTML().encodeAsJavaScript()}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "\\u0026lt;b\\u0026gt;");
}

#[test]
fn unknown_codec_is_an_error() {
    let error = render_source("${'x'.encodeAsRot13()}", Bindings::new()).unwrap_err();
    assert_snapshot!(error.to_string(), @"Unknown codec [Rot13]");
}

#[test]
fn apply_codec_changes_body_codecs() {
    let html = render_source(
        "<g:applyCodec encodeAs=\"none\">${'<b>'}</g:applyCodec>${'<b>'}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "<b>&lt;b&gt;");
}

#[test]
fn taglib_codec_does_not_reencode_body() {
    let html = render_source(
        "<my:echo value=\"${'<i>'}\"><b>${x}</b></my:echo>",
        bindings(&[("x", Value::from("<u>"))]),
    )
    .unwrap();
    assert_eq!(html, "&lt;i&gt;<b>&lt;u&gt;</b>");
}

#[test]
fn returned_values_are_written_in_statement_context() {
    let html = render_source("<my:greeting/>", Bindings::new()).unwrap();
    assert_eq!(html, "Hello <World>");

    let html = render_source("<my:greeting encodeAs=\"HTML\"/>", Bindings::new()).unwrap();
    assert_eq!(html, "Hello &lt;World&gt;");
}

#[test]
fn tags_in_expressions_return_their_output() {
    let html = render_source("${my.greeting()}", Bindings::new()).unwrap();
    assert_eq!(html, "Hello &lt;World&gt;");

    let html = render_source("${my.link(href: '/home')}", Bindings::new()).unwrap();
    assert_eq!(html, "<a href=\"/home\">link</a>");
}

#[test]
fn default_namespace_tags_are_callable_by_name() {
    let html = render_source(
        "${applyCodec(encodeAs: 'none', '<i>')}",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "<i>");
}

#[test]
fn every_invocation_pushes_a_frame() {
    let html = render_source(
        "<my:depth/>|<g:if test=\"${true}\"><my:depth/></g:if>",
        Bindings::new(),
    )
    .unwrap();
    assert_eq!(html, "2|4");
}

#[test]
fn single_argument_tags_print_their_body_after_the_call() {
    let html = render_source("<my:stamp>body ${1 + 1}</my:stamp>", Bindings::new()).unwrap();
    assert_eq!(html, "[stamp]body 2");
}

#[test]
fn registry_is_cleared_after_render() {
    let page = compile_source("clear.gsp", "${a}<br/>", &ParseOptions::default()).unwrap();
    let mut out = Vec::new();
    let mut registry = EncodingStateRegistry::new();
    render(
        &page,
        bindings(&[("a", Value::from("<x>"))]),
        &mut out,
        &mut registry,
        &env(),
    )
    .unwrap();
    assert_eq!(out, b"&lt;x&gt;<br/>");
    assert!(registry.is_empty());
}

#[test]
fn reloaded_libraries_apply_to_new_renders() {
    let env = RenderEnv::default();
    let page = compile_source("reload.gsp", "<my:stamp/>", &ParseOptions::default()).unwrap();
    assert!(render_to_string(&page, Bindings::new(), &env).is_err());
    env.taglibs.register(test_library());
    assert_eq!(
        render_to_string(&page, Bindings::new(), &env).unwrap(),
        "[stamp]"
    );
}

#[test]
fn shared_page_renders_concurrently() {
    let page = Arc::new(
        compile_source(
            "shared.gsp",
            "<li>${n}</li><g:each in=\"${[n, n]}\">${it}</g:each>",
            &ParseOptions::default(),
        )
        .unwrap(),
    );
    let env = env();
    let outputs: Vec<(i64, String)> = (0..64i64)
        .into_par_iter()
        .map(|n| {
            let html = render_to_string(&page, bindings(&[("n", Value::from(n))]), &env).unwrap();
            (n, html)
        })
        .collect();
    for (n, html) in outputs {
        assert_eq!(html, format!("<li>{n}</li>{n}{n}"));
    }
}
