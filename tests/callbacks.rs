use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sigma::{Engine, ErrorKind, ROOT};

#[cfg(feature = "builtins")]
#[test]
fn callbacks_builtins() {
    let engine = Engine::new();
    let mut template = engine
        .compile("{v:h}|{v:e}|func_u('a b&c')|func_r('a b')|func_j({q})")
        .unwrap();
    template.set_variable("v", "<é>").unwrap();
    template.set_variable("q", "it's").unwrap();
    assert_eq!(
        template.output(ROOT).unwrap(),
        "&lt;é&gt;|&lt;&#233;&gt;|a+b%26c|a%20b|it\\x27s"
    );
}

#[cfg(feature = "builtins")]
#[test]
fn callbacks_quoted_comma() {
    let engine = Engine::new();
    let mut template = engine.compile("func_h('a,b')").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "a,b");
}

#[test]
fn callbacks_custom() {
    let mut engine = Engine::new();
    engine
        .add_callback("link", |href: &str, text: &str| {
            format!("<a href=\"{href}\">{text}</a>")
        })
        .unwrap();
    let mut template = engine
        .compile("func_link('https://example.com', {title})")
        .unwrap();
    template.set_variable("title", "Example").unwrap();
    assert_eq!(
        template.output(ROOT).unwrap(),
        "<a href=\"https://example.com\">Example</a>"
    );
}

#[test]
fn callbacks_missing_and_extra_arguments() {
    let mut engine = Engine::new();
    engine
        .add_callback("pair", |a: &str, b: &str| format!("{a}+{b}"))
        .unwrap();
    engine.add_callback("now", || "noon").unwrap();
    let mut template = engine
        .compile("func_pair(x) func_pair(x, y, z) func_now(ignored)")
        .unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "x+ x+y noon");
}

#[test]
fn callbacks_unregistered_echo_first_argument() {
    let engine = Engine::new();
    let mut template = engine
        .compile("func_nope(first, second)|func_none()|{v:nope}")
        .unwrap();
    template.set_variable("v", "value").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "first||value");
}

#[test]
fn callbacks_preserving_args() {
    let mut engine = Engine::new();
    engine
        .add_callback("len", |s: &str| s.len().to_string())
        .unwrap();
    engine
        .add_callback_preserving_args("rawlen", |s: &str| s.len().to_string())
        .unwrap();
    let mut template = engine.compile("func_len({v}) func_rawlen({v})").unwrap();
    template.set_variable("v", "x").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "1 3");
}

#[test]
fn callbacks_memoized_per_render() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new();
    {
        let count = count.clone();
        engine
            .add_callback("count", move |s: &str| {
                count.fetch_add(1, Ordering::SeqCst);
                s.to_owned()
            })
            .unwrap();
    }

    let mut template = engine
        .compile("func_count(a)<!-- BEGIN x -->{v}func_count(a)func_count(b)<!-- END x -->func_count(a)")
        .unwrap();
    template.set_variable("v", "-").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "a-aba");
    assert_eq!(count.load(Ordering::SeqCst), 2);

    template.render(ROOT).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 3);
}

#[test]
fn callbacks_not_called_for_removed_blocks() {
    let count = Arc::new(AtomicUsize::new(0));
    let mut engine = Engine::new();
    {
        let count = count.clone();
        engine
            .add_callback("count", move || {
                count.fetch_add(1, Ordering::SeqCst);
                ""
            })
            .unwrap();
    }
    let mut template = engine
        .compile("<!-- BEGIN x -->func_count()<!-- END x -->")
        .unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "");
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn callbacks_override_builtin() {
    let mut engine = Engine::new();
    engine.add_callback("h", |s: &str| s.to_uppercase()).unwrap();
    let mut template = engine.compile("{v:h}").unwrap();
    template.set_variable("v", "<b>").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "<B>");
}

#[test]
fn callbacks_invalid_name() {
    let mut engine = Engine::new();
    for name in ["", "1abc", "a-b", "a b"] {
        let err = engine.add_callback(name, |s: &str| s.to_owned()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCallback);
        assert_eq!(err.name(), Some(name));
    }
}

#[test]
fn callbacks_owned_name() {
    let mut engine = Engine::new();
    let name = String::from("twice");
    engine
        .add_callback(name, |s: &str| s.repeat(2))
        .unwrap();
    let mut template = engine.compile("func_twice(ab)").unwrap();
    assert_eq!(template.output(ROOT).unwrap(), "abab");
}

#[test]
fn callbacks_custom_prefix() {
    let syntax = sigma::Syntax::builder().function_prefix("call_").build();
    let engine = Engine::with_syntax(syntax);
    let mut template = engine.compile("call_h('<') func_h('<')").unwrap();
    #[cfg(feature = "builtins")]
    assert_eq!(template.output(ROOT).unwrap(), "&lt; func_h('<')");
    #[cfg(not(feature = "builtins"))]
    assert_eq!(template.output(ROOT).unwrap(), "< func_h('<')");
}
