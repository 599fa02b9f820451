use std::io::Write;

use indexmap::IndexMap;
use mext::{render_file, Value};

fn write_file(dir: &std::path::Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn include_resolves_relative_to_including_file() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "partial.mext", "Hello, {name}!");
    let main = write_file(dir.path(), "main.mext", "{@include \"partial.mext\" name=who}");

    let mut params = IndexMap::new();
    params.insert("who".to_string(), Value::str("World"));

    let out = render_file(&main, params).unwrap();
    assert_eq!(out, "Hello, World!");
}

#[test]
fn include_falls_back_to_mext_suffix() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "partial.mext", "body");
    let main = write_file(dir.path(), "main.mext", "{@include \"partial\"}");

    let out = render_file(&main, IndexMap::new()).unwrap();
    assert_eq!(out, "body");
}

#[test]
fn include_does_not_leak_locals_back_to_caller() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "partial.mext", "{@set secret value}{secret}");
    let main = write_file(
        dir.path(),
        "main.mext",
        "{@include \"partial.mext\" value=v}{@if undefined secret}ok{@else}leaked{@endif}",
    );

    let mut params = IndexMap::new();
    params.insert("v".to_string(), Value::str("42"));

    let out = render_file(&main, params).unwrap();
    assert_eq!(out, "42ok");
}

#[test]
fn cyclic_include_is_a_runtime_error() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_file(dir.path(), "a.mext", "{@include \"b.mext\"}");
    write_file(dir.path(), "b.mext", "{@include \"a.mext\"}");

    let err = render_file(&a, IndexMap::new()).unwrap_err();
    assert!(err.is_runtime());
}

#[test]
fn missing_include_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let main = write_file(dir.path(), "main.mext", "{@include \"does_not_exist.mext\"}");

    let err = render_file(&main, IndexMap::new());
    assert!(err.is_err());
}

#[test]
fn import_json_merges_scalars_into_locals() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "data.json", r#"{"greeting": "hi", "count": 3}"#);
    let main = write_file(dir.path(), "main.mext", "{@import \"data.json\"}{greeting} {count}");

    let out = render_file(&main, IndexMap::new()).unwrap();
    assert_eq!(out, "hi 3");
}

#[test]
fn import_yaml_with_namespace() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "data.yaml", "name: Ada\nage: 30\n");
    let main = write_file(dir.path(), "main.mext", "{@import \"data.yaml\" as person}{person.name} is {person.age}");

    let out = render_file(&main, IndexMap::new()).unwrap();
    assert_eq!(out, "Ada is 30");
}

#[test]
fn import_raw_text_requires_namespace() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "notes.txt", "plain text body");
    let main = write_file(dir.path(), "main.mext", "{@import \"notes.txt\"}");

    let err = render_file(&main, IndexMap::new());
    assert!(err.is_err());
}

#[test]
fn import_raw_text_with_namespace_binds_string() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "notes.txt", "plain text body");
    let main = write_file(dir.path(), "main.mext", "{@import \"notes.txt\" as notes}{notes}");

    let out = render_file(&main, IndexMap::new()).unwrap();
    assert_eq!(out, "plain text body");
}

#[test]
fn nested_include_gets_default_formatters_only() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "partial.mext", "{@format shout v}");
    let main = write_file(dir.path(), "main.mext", "{@include \"partial.mext\" v=v}");

    let mut params = IndexMap::new();
    params.insert("v".to_string(), Value::str("ok"));

    let mut parser = mext::Parser::new();
    parser.register_formatter(
        "shout",
        std::rc::Rc::new(|v: &Value, _: &IndexMap<String, Value>| {
            Ok(format!("{}!!!", v.to_display_string()))
        }),
    );

    let err = parser.render_file(&main, params, IndexMap::new());
    assert!(err.is_err(), "a custom formatter must not leak into a nested include's fresh registry");
}
