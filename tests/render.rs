mod helpers;

use sigma::{Engine, ErrorKind, ROOT};

use crate::helpers::Writer;

#[test]
fn render_block_repeatedly() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN row -->{name}<!-- END row -->")
        .unwrap();

    let mut result = String::new();
    for name in ["a", "b"] {
        template.set_variable("name", name).unwrap();
        template.render("row").unwrap();
        result.push_str(&template.take_output("row").unwrap());
    }
    assert_eq!(result, "ab");
}

#[test]
fn render_block_output_accumulates() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<table><!-- BEGIN row --><tr><td>{n}</td></tr><!-- END row --></table>")
        .unwrap();
    for n in 1..=3 {
        template.set_variable("n", &n).unwrap();
        template.render("row").unwrap();
    }
    assert_eq!(
        template.output(ROOT).unwrap(),
        "<table><tr><td>1</td></tr><tr><td>2</td></tr><tr><td>3</td></tr></table>"
    );
}

#[test]
fn render_nested_blocks() {
    let engine = Engine::new();
    let mut template = engine
        .compile(
            "<!-- BEGIN list -->{title}:<!-- BEGIN item --> {name}<!-- END item -->;<!-- END list -->",
        )
        .unwrap();

    for (title, items) in [("x", vec!["1", "2"]), ("y", vec!["3"])] {
        for name in items {
            template.set_variable("name", name).unwrap();
            template.render("item").unwrap();
        }
        template.set_variable("title", title).unwrap();
        template.render("list").unwrap();
    }
    assert_eq!(template.output(ROOT).unwrap(), "x: 1 2;y: 3;");
}

#[test]
fn render_returns_whether_empty() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN a -->{x}<!-- BEGIN b -->{y}<!-- END b --><!-- END a -->")
        .unwrap();
    assert!(template.render("a").unwrap());

    template.set_variable("y", "1").unwrap();
    assert!(!template.render("a").unwrap());
}

#[test]
fn render_parent_consumes_variable_before_children() {
    let engine = Engine::new();
    let mut template = engine
        .compile("[{x}]<!-- BEGIN a -->({x})<!-- END a -->")
        .unwrap();
    template.set_variable("x", "1").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "[1]");
}

#[test]
fn render_variable_consumed_once() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN a -->{x}<!-- END a -->|<!-- BEGIN b -->{x}<!-- END b -->")
        .unwrap();
    template.set_variable("x", "1").unwrap();
    template.render("a").unwrap();
    template.touch_block("b").unwrap();
    template.render("b").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "1|");
}

#[test]
fn render_variable_consumed_once_keep_unknown() {
    let mut engine = Engine::new();
    engine.set_remove_unknown_variables(false);
    let mut template = engine
        .compile("<!-- BEGIN a -->{x}<!-- END a -->|<!-- BEGIN b -->{x}<!-- END b -->")
        .unwrap();
    template.set_variable("x", "1").unwrap();
    template.render("a").unwrap();
    template.touch_block("b").unwrap();
    template.render("b").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "1|{x}");
}

#[test]
fn render_variable_consumed_by_first_sibling() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN a -->a={x}<!-- END a --><!-- BEGIN b -->b={x}<!-- END b -->")
        .unwrap();
    template.set_variable("x", "1").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "a=1");
}

#[test]
fn render_empty_block_removed() {
    let engine = Engine::new();
    let mut template = engine
        .compile("a<!-- BEGIN x -->static<!-- END x -->b")
        .unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "ab");
}

#[test]
fn render_empty_block_kept() {
    let mut engine = Engine::new();
    engine.set_remove_empty_blocks(false);
    let mut template = engine
        .compile("a<!-- BEGIN x -->static {y}<!-- END x -->b")
        .unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "astatic b");
}

#[test]
fn render_touched_block() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN basket -->{item}<!-- END basket --><!-- BEGIN empty -->Your basket is empty<!-- END empty -->")
        .unwrap();
    template.touch_block("empty").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "Your basket is empty");
}

#[test]
fn render_touch_applies_once() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN x -->static<!-- END x -->")
        .unwrap();
    template.touch_block("x").unwrap();
    template.render("x").unwrap();
    template.render("x").unwrap();
    assert_eq!(template.take_output("x").unwrap(), "static");
}

#[test]
fn render_hidden_block_drains_variables() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN x -->x={v}<!-- END x --><!-- BEGIN y -->y={v}<!-- END y -->")
        .unwrap();

    template.set_variable("v", "1").unwrap();
    template.hide_block("x").unwrap();
    template.render(ROOT).unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "");

    // The hidden flag only applies to one render.
    template.set_variable("v", "2").unwrap();
    template.render(ROOT).unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "x=2");
}

#[test]
fn render_touch_and_hide_are_exclusive() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN x -->static<!-- END x -->")
        .unwrap();
    template.hide_block("x").unwrap();
    template.touch_block("x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "static");

    let mut template = engine
        .compile("<!-- BEGIN x -->{v}<!-- END x -->")
        .unwrap();
    template.set_variable("v", "1").unwrap();
    template.touch_block("x").unwrap();
    template.hide_block("x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "");
}

#[test]
fn render_global_variables() {
    let engine = Engine::new();
    let mut template = engine
        .compile("{g}<!-- BEGIN a -->{g}{v}<!-- END a --><!-- BEGIN b -->{g}<!-- END b -->")
        .unwrap();
    template.set_global_variable("g", "G").unwrap();
    template.set_variable("v", "1").unwrap();
    // Global variables never make a block non-empty.
    assert_eq!(template.output(ROOT).unwrap(), "GG1");
}

#[test]
fn render_global_variables_are_not_consumed() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN row -->{g}{n}<!-- END row -->")
        .unwrap();
    template.set_global_variable("g", "-").unwrap();
    for n in 1..=2 {
        template.set_variable("n", &n).unwrap();
        template.render("row").unwrap();
    }
    assert_eq!(template.output(ROOT).unwrap(), "-1-2");
}

#[test]
fn render_global_overrides_local() {
    let engine = Engine::new();
    let mut template = engine.compile("{v}").unwrap();
    template.set_variable("v", "local").unwrap();
    template.set_global_variable("v", "global").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "global");
}

#[test]
fn render_values_are_not_rescanned() {
    let mut engine = Engine::new();
    engine.set_remove_unknown_variables(false);
    let mut template = engine.compile("{a}{b}").unwrap();
    template.set_variable("a", "{b}").unwrap();
    template.set_variable("b", "x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "{b}x");
}

#[test]
fn render_remove_unknown_variables() {
    let engine = Engine::new();
    let mut template = engine.compile("a{x}b{ y }c{z.w-1}d").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "abcd");
}

#[test]
fn render_preserve_data() {
    let mut engine = Engine::new();
    engine.set_preserve_data(true);
    let mut template = engine.compile("{v}{w}").unwrap();
    template.set_variable("v", "{w}").unwrap();
    template.set_variable("w", "x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "{w}x");
}

#[test]
fn render_without_preserve_data_strips_injected_placeholders() {
    let engine = Engine::new();
    let mut template = engine.compile("{v}{w}").unwrap();
    template.set_variable("v", "{w}").unwrap();
    template.set_variable("w", "x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "x");
}

#[test]
fn render_root_renders_once_on_output() {
    let engine = Engine::new();
    let mut template = engine.compile("<!-- BEGIN a -->{x}<!-- END a -->").unwrap();
    template.set_variable("x", "1").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "1");
    template.set_variable("x", "2").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "1");
    template.render(ROOT).unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "12");
}

#[test]
fn render_current_block() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN row -->{n},<!-- END row -->")
        .unwrap();
    assert_eq!(template.current_block(), ROOT);
    template.set_current_block("row").unwrap();
    assert_eq!(template.current_block(), "row");
    for n in 1..=2 {
        template.set_variable("n", &n).unwrap();
        template.render_current();
    }
    assert_eq!(template.output(ROOT).unwrap(), "1,2,");

    let err = template.set_current_block("nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BlockNotFound);
    assert_eq!(template.current_block(), "row");
}

#[test]
fn render_with_values() {
    #[derive(serde::Serialize)]
    struct Row {
        id: u32,
        name: &'static str,
    }

    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN row -->{id}:{name}<!-- END row -->")
        .unwrap();
    let out = template
        .render_with("row", &Row { id: 7, name: "x" })
        .unwrap();
    assert_eq!(out, "7:x");
    assert_eq!(template.output("row").unwrap(), "");
}

#[test]
fn render_unknown_block() {
    let engine = Engine::new();
    let mut template = engine.compile("").unwrap();
    let err = template.render("nope").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BlockNotFound);
    assert_eq!(err.to_string(), "cannot find block `nope`");
    for err in [
        template.output("nope").unwrap_err(),
        template.touch_block("nope").unwrap_err(),
        template.hide_block("nope").unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::BlockNotFound);
    }
}

#[test]
fn render_clear_variables() {
    let engine = Engine::new();
    let mut template = engine.compile("{a}{g}").unwrap();
    template.set_variable("a", "1").unwrap();
    template.set_global_variable("g", "2").unwrap();
    template.clear_variables();
    assert_eq!(template.output(ROOT).unwrap(), "2");
}

#[test]
fn render_write_output() {
    let engine = Engine::new();
    let mut template = engine.compile("Hello {name}!").unwrap();
    template.set_variable("name", "World").unwrap();
    let mut w = Writer::new();
    template.write_output(ROOT, &mut w).unwrap();
    assert_eq!(w.into_string(), "Hello World!");
}

#[test]
fn render_write_output_error() {
    let engine = Engine::new();
    let mut template = engine.compile("Hello").unwrap();
    let mut w = Writer::failing();
    let err = template.write_output(ROOT, &mut w).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(err.to_string(), "failed to write output");
}

#[test]
fn render_set_template_resets_state() {
    let engine = Engine::new();
    let mut template = engine.compile("<!-- BEGIN a -->{x}<!-- END a -->").unwrap();
    template.set_variable("x", "1").unwrap();
    template.set_global_variable("g", "G").unwrap();
    template.render("a").unwrap();
    template.set_variable("y", "lost").unwrap();

    template.set_template("{y}{g}").unwrap();
    assert!(!template.block_exists("a"));
    assert_eq!(template.output(ROOT).unwrap(), "G");
}

#[test]
fn render_underscored_variable() {
    let engine = Engine::new();
    let mut template = engine
        .compile("<!-- BEGIN b -->[{__title__}]<!-- END b -->")
        .unwrap();
    assert_eq!(template.placeholder_list("b").unwrap(), ["__title__"]);

    template.set_variable("__title__", "T").unwrap();
    assert!(!template.render("b").unwrap());
    assert_eq!(template.output(ROOT).unwrap(), "[T]");
}
