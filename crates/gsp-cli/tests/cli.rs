//! Runs the `gsp` binary against temporary projects.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

/// A diagnostic from the JSON output.
#[derive(Debug, Deserialize)]
struct JsonDiagnostic {
    stage: String,
    filename: String,
    line: u32,
    message: String,
}

fn project(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn gsp(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gsp"))
        .args(args)
        .arg("--workspace")
        .arg(root)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn check_passes_on_valid_templates() {
    let dir = project(&[
        ("views/index.gsp", b"<p>${title}</p>"),
        ("views/user/show.gsp", b"<g:if test=\"${user}\">${user.name}</g:if>"),
        ("views/readme.txt", b"${not a template"),
    ]);
    let output = gsp(dir.path(), &["check"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("gsp found 0 errors in 2 templates"));
}

#[test]
fn check_reports_failures_as_json() {
    let dir = project(&[
        ("views/good.gsp", b"<p>ok</p>"),
        ("views/bad.gsp", b"<p>\n${oops</p>"),
        ("views/codec.gsp", b"<%@ page defaultCodec=\"Rot13\" %>${x}"),
        ("build/views/bad.gsp", b"${"),
    ]);
    let output = gsp(dir.path(), &["check", "--output", "json"]);
    assert_eq!(output.status.code(), Some(1));

    let diagnostics: Vec<JsonDiagnostic> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(diagnostics.len(), 2);

    let bad = diagnostics
        .iter()
        .find(|d| d.filename == "views/bad.gsp")
        .unwrap();
    assert_eq!(bad.stage, "parse");
    assert_eq!(bad.line, 2);
    assert_eq!(bad.message, "Unclosed GSP expression");

    let codec = diagnostics
        .iter()
        .find(|d| d.filename == "views/codec.gsp")
        .unwrap();
    assert_eq!(codec.stage, "codec");
    assert_eq!(codec.message, "Unknown codec [Rot13]");
}

#[test]
fn check_honours_configured_extensions() {
    let dir = project(&[
        ("gsp.json", br#"{ "extensions": [".gson"] }"#),
        ("views/a.gson", b"${broken"),
        ("views/b.gsp", b"${broken"),
    ]);
    let output = gsp(dir.path(), &["check", "--output", "machine"]);
    assert_eq!(output.status.code(), Some(1));
    let text = stdout(&output);
    assert!(text.contains("ERROR views/a.gson:1 Unclosed GSP expression (gsp::parse)"));
    assert!(!text.contains("b.gsp"));
}

#[test]
fn render_with_model() {
    let dir = project(&[
        (
            "index.gsp",
            b"<p>${user.name}</p><g:each in=\"${user.roles}\">[${it}]</g:each>",
        ),
        (
            "model.json",
            br#"{ "user": { "name": "<Ada>", "roles": ["admin", "dev"] } }"#,
        ),
    ]);
    let output = gsp(dir.path(), &["render", "index.gsp", "--model", "model.json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "<p>&lt;Ada&gt;</p>[admin][dev]");
}

#[test]
fn render_uses_configured_codecs() {
    let dir = project(&[
        ("gsp.json", br#"{ "defaultCodec": "none" }"#),
        ("raw.gsp", b"${'<b>'}"),
    ]);
    let output = gsp(dir.path(), &["render", "raw.gsp"]);
    assert_eq!(stdout(&output), "<b>");

    let output = gsp(dir.path(), &["render", "raw.gsp", "--default-codec", "HTML"]);
    assert_eq!(stdout(&output), "&lt;b&gt;");
}

#[test]
fn render_decodes_latin1() {
    let dir = project(&[("cafe.gsp", b"caf\xe9 ${1 + 1}")]);
    let output = gsp(
        dir.path(),
        &["render", "cafe.gsp", "--encoding", "ISO-8859-1"],
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "café 2");

    let output = gsp(dir.path(), &["render", "cafe.gsp"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Template is not valid UTF-8"));
}

#[test]
fn render_failure_reports_location() {
    let dir = project(&[("fail.gsp", b"<ul>\n  <tt:form/>\n</ul>")]);
    let output = gsp(dir.path(), &["render", "fail.gsp"]);
    assert_eq!(output.status.code(), Some(1));
    let text = stderr(&output);
    assert!(text.contains(
        "Tag [form] does not exist. No corresponding tag library found for namespace: tt"
    ));
    assert!(text.contains("<tt:form/>"));
    assert!(stdout(&output).is_empty());
}

#[test]
fn render_writes_output_file() {
    let dir = project(&[("page.gsp", b"<h1>${2 * 21}</h1>")]);
    let output = gsp(dir.path(), &["render", "page.gsp", "--out", "page.html"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(
        fs::read_to_string(dir.path().join("page.html")).unwrap(),
        "<h1>42</h1>"
    );
}

#[test]
fn render_rejects_non_object_models() {
    let dir = project(&[("page.gsp", b"x"), ("model.json", b"[1]")]);
    let output = gsp(dir.path(), &["render", "page.gsp", "--model", "model.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("expected an object, found an array"));
}

#[test]
fn compile_prints_operations() {
    let dir = project(&[(
        "list.gsp",
        b"<%@ page contentType=\"text/plain\" %><g:each in=\"${items}\">${it}</g:each>",
    )]);
    let output = gsp(dir.path(), &["compile", "list.gsp"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("page list.gsp\n  contentType: text/plain\n"));
    assert!(text.contains("CreateTagBody 1"));
    assert!(text.contains("InvokeTag g:each"));

    let output = gsp(dir.path(), &["compile", "list.gsp", "--json"]);
    let page: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(page["source_name"], "list.gsp");
    assert_eq!(page["content_type"], "text/plain");
    assert!(page["operations"].as_array().is_some_and(|ops| !ops.is_empty()));
}
