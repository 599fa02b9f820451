use indexmap::IndexMap;
use mext::{render, Parser, Value};

fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
    let mut m = IndexMap::new();
    for (k, v) in pairs {
        m.insert((*k).to_string(), v.clone());
    }
    m
}

#[test]
fn scenario_plain_field_substitution() {
    let out = render("{var}", params(&[("var", Value::str("Pass"))])).unwrap();
    assert_eq!(out, "Pass");
}

#[test]
fn scenario_final_strip_off_keeps_trailing_newline() {
    let out = render(
        "{@option final_strip off}\nEmpty line at the end.\n",
        IndexMap::new(),
    )
    .unwrap();
    assert_eq!(out, "Empty line at the end.\n");
}

#[test]
fn scenario_set_rebinds_a_local() {
    let out = render(
        "{var1}\n{@set var1 var2}\n{var1}",
        params(&[("var1", Value::str("V1")), ("var2", Value::str("V2"))]),
    )
    .unwrap();
    assert_eq!(out, "V1\nV2");
}

#[test]
fn scenario_for_over_a_list() {
    let out = render(
        "{@for item in arr}\n- {item}\n{@endfor}",
        params(&[(
            "arr",
            Value::List(vec![Value::str("A"), Value::str("B"), Value::str("C")]),
        )]),
    )
    .unwrap();
    assert_eq!(out, "- A\n- B\n- C");
}

#[test]
fn scenario_if_empty_matrix() {
    let template = "{@if empty v}e{@else}n{@endif}";
    let cases: Vec<(Value, &str)> = vec![
        (Value::List(vec![]), "e"),
        (Value::Map(IndexMap::new()), "e"),
        (Value::Null, "e"),
        (Value::List(vec![Value::Int(1)]), "n"),
        (Value::Map(params(&[("a", Value::Int(1))])), "n"),
        (Value::Int(0), "n"),
        (Value::str("a"), "n"),
    ];
    for (v, expected) in cases {
        let out = render(template, params(&[("v", v)])).unwrap();
        assert_eq!(out, expected);
    }
}

#[test]
fn scenario_format_json_two_space_indent() {
    let mut m = IndexMap::new();
    m.insert("n".to_string(), Value::str("A"));
    let mut m2 = IndexMap::new();
    m2.insert("n".to_string(), Value::str("B"));
    let out = render(
        "{@format json arr}",
        params(&[("arr", Value::List(vec![Value::Map(m), Value::Map(m2)]))]),
    )
    .unwrap();
    assert!(out.contains("  \"n\": \"A\""));
    assert!(out.starts_with('['));
}

#[test]
fn scenario_trim_newline_around_empty_if_block() {
    let out = render(
        "Start.\n\n{@trim_newline}{@if true}{@endif}\n\nEnd.",
        IndexMap::new(),
    )
    .unwrap();
    assert_eq!(out, "Start.\n\nEnd.");
}

#[test]
fn scenario_for_over_an_insertion_ordered_map() {
    let mut d = IndexMap::new();
    d.insert("a".to_string(), Value::Int(1));
    d.insert("b".to_string(), Value::Int(2));
    let out = render(
        "{@for k,v in d}{k}:{v}\n{@endfor}",
        params(&[("d", Value::Map(d))]),
    )
    .unwrap();
    assert_eq!(out, "a:1\nb:2");
}

#[test]
fn invariant_no_directives_round_trips_stripped() {
    let out = render("  hello world  ", IndexMap::new()).unwrap();
    assert_eq!(out, "hello world");
}

#[test]
fn invariant_no_directives_preserves_with_final_strip_off() {
    let out = render("{@option final_strip off}  hello world  ", IndexMap::new()).unwrap();
    assert_eq!(out, "  hello world  ");
}

#[test]
fn invariant_if_true_and_if_not_false_are_equivalent() {
    let with_true = render("{@if true}body{@endif}", IndexMap::new()).unwrap();
    let with_not_false = render("{@if not false}body{@endif}", IndexMap::new()).unwrap();
    assert_eq!(with_true, "body");
    assert_eq!(with_not_false, "body");
}

#[test]
fn invariant_comment_block_is_never_evaluated() {
    let out = render(
        "before{@comment}{@if undefined_name}boom{@endif}{@endcomment}after",
        IndexMap::new(),
    )
    .unwrap();
    assert_eq!(out, "beforeafter");
}

#[test]
fn invariant_for_over_empty_iterable_emits_nothing() {
    let out = render(
        "before{@for item in arr}- {item}\n{@endfor}after",
        params(&[("arr", Value::List(vec![]))]),
    )
    .unwrap();
    assert_eq!(out, "beforeafter");
}

#[test]
fn dotted_and_indexed_field_access() {
    let mut inner = IndexMap::new();
    inner.insert("list".to_string(), Value::List(vec![Value::Int(10), Value::Int(20)]));
    let out = render(
        "{obj.list[1]}",
        params(&[("obj", Value::Map(inner))]),
    )
    .unwrap();
    assert_eq!(out, "20");
}

#[test]
fn conversion_repr_quotes_strings() {
    let out = render("{v!r}", params(&[("v", Value::str("hi"))])).unwrap();
    assert_eq!(out, "'hi'");
}

#[test]
fn undefined_field_reference_is_a_runtime_error() {
    let err = render("{nope}", IndexMap::new()).unwrap_err();
    assert!(err.is_runtime());
}

#[test]
fn unknown_keyword_is_a_syntax_error() {
    let err = render("{@bogus}", IndexMap::new()).unwrap_err();
    assert!(!err.is_runtime());
}

#[test]
fn count_resets_undefined_variable_to_zero_then_increments() {
    let out = render("{@count hits}{hits}{@count hits}{hits}", IndexMap::new()).unwrap();
    assert_eq!(out, "01");
}

#[test]
fn default_does_not_override_an_existing_param() {
    let out = render(
        "{@default greeting fallback}{greeting}",
        params(&[("greeting", Value::str("hi")), ("fallback", Value::str("nope"))]),
    )
    .unwrap();
    assert_eq!(out, "hi");
}

#[test]
fn nested_for_loops_track_level_independently() {
    let out = render(
        "{@for row in rows}{@for cell in row}{cell}{@endfor}|{@endfor}",
        params(&[(
            "rows",
            Value::List(vec![
                Value::List(vec![Value::str("a"), Value::str("b")]),
                Value::List(vec![Value::str("c")]),
            ]),
        )]),
    )
    .unwrap();
    assert_eq!(out, "ab|c|");
}

#[test]
fn randomized_nesting_ends_with_level_zero_and_matching_output() {
    let templates = [
        "{@if true}{@for x in xs}{x}{@endfor}{@endif}",
        "{@for x in xs}{@if empty x}{@else}{x}{@endif}{@endfor}",
        "{@comment}{@if true}{@for x in xs}{x}{@endfor}{@endif}{@endcomment}tail",
        "{@if false}{@elif true}{@for x in xs}{x}{@endfor}{@endif}",
    ];
    for t in templates {
        let out = render(t, params(&[("xs", Value::List(vec![Value::str("z")]))]));
        assert!(out.is_ok(), "template {t:?} should render without error");
    }
}

#[test]
fn parser_can_be_reused_across_renders() {
    let mut parser = Parser::new();
    let first = parser
        .render("{a}".to_string(), None, params(&[("a", Value::Int(1))]), IndexMap::new())
        .unwrap();
    let second = parser
        .render("{a}".to_string(), None, params(&[("a", Value::Int(2))]), IndexMap::new())
        .unwrap();
    assert_eq!(first, "1");
    assert_eq!(second, "2");
}
