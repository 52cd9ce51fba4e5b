//! Scans block content for variable placeholders and function calls.
//!
//! Every `{name}` placeholder is recorded as a variable of the block. A
//! `{name:fn}` placeholder and every `func_name(args...)` expression is
//! interned as a [`Call`] and rewritten to the call's memo placeholder so
//! that the result can be spliced in at render time.

use crate::types::syntax::{function_name_len, Syntax};
use crate::types::tree::{Block, Call, Tree};
use crate::{Error, Result};

/// Scans a block's content, recording its variables and calls.
///
/// `children` are the names of the block's child blocks, whose placeholders
/// are not variables.
pub fn block(syntax: &Syntax, tree: &mut Tree, block: &mut Block, children: &[&str]) -> Result<()> {
    let content = placeholders(syntax, tree, block, children);
    block.content = calls(syntax, tree, block, &content)?;
    Ok(())
}

/// Records variables and rewrites `{name:fn}` placeholders.
fn placeholders(syntax: &Syntax, tree: &mut Tree, block: &mut Block, children: &[&str]) -> String {
    let owned = std::mem::take(&mut block.content);
    let content: &str = &owned;
    let mut out = String::with_capacity(content.len());
    let mut last = 0;

    for m in syntax.matches(content) {
        let name = &content[m.name];
        if !is_child(name, children) && !is_memo(name) {
            block.add_variable(name);
        }
        if let Some(func) = m.func {
            let call = Call {
                name: content[func].to_owned(),
                args: vec![syntax.placeholder(name)],
            };
            let id = tree.intern(call);
            block.add_function(id);
            out.push_str(&content[last..m.span.m]);
            out.push_str(&syntax.placeholder(&id.placeholder_name()));
            last = m.span.n;
        }
    }
    out.push_str(&content[last..]);
    out
}

/// Extracts inline `func_name(...)` calls.
fn calls(syntax: &Syntax, tree: &mut Tree, block: &mut Block, content: &str) -> Result<String> {
    let prefix = syntax.function_prefix.as_str();
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let mut i = 0;

    while let Some(d) = content[i..].find(prefix) {
        let at = i + d;
        let j = at + prefix.len();
        let k = j + function_name_len(&content[j..]);
        let l = k + content[k..]
            .find(|c: char| !c.is_whitespace())
            .unwrap_or(content.len() - k);
        if k == j || !content[l..].starts_with('(') {
            i = j;
            continue;
        }

        let (args, end) = match arguments(&content[l + 1..]) {
            Ok((args, n)) => (args, l + 1 + n),
            Err((msg, n)) => {
                let n = (l + 1 + n).min(content.len());
                return Err(Error::callback_syntax(msg, content, at..n));
            }
        };
        let call = Call {
            name: content[j..k].to_owned(),
            args,
        };
        let id = tree.intern(call);
        block.add_function(id);
        out.push_str(&content[last..at]);
        out.push_str(&syntax.placeholder(&id.placeholder_name()));
        last = end;
        i = end;
    }
    out.push_str(&content[last..]);
    Ok(out)
}

fn is_child(name: &str, children: &[&str]) -> bool {
    name.strip_prefix("__")
        .and_then(|n| n.strip_suffix("__"))
        .map_or(false, |n| children.contains(&n))
}

/// Memo placeholders of calls, `__function_N__`, are reserved.
fn is_memo(name: &str) -> bool {
    name.strip_prefix("__function_")
        .and_then(|n| n.strip_suffix("__"))
        .map_or(false, |n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first argument.
    Start,
    /// After a `,` separator.
    Next,
    /// Inside an unquoted argument.
    Bare,
    /// Inside a quoted section of an unquoted argument, e.g. `a'b,c'`.
    BareQuoted(char),
    /// Inside a quoted argument.
    Quoted(char),
    /// After a backslash inside a quoted argument.
    Escape(char),
    /// After the closing quote of a quoted argument.
    AfterQuote,
}

/// Parses call arguments starting just after the opening parenthesis.
///
/// Returns the arguments and the number of bytes consumed including the
/// closing parenthesis, or an error message and the byte offset at which it
/// occurred.
pub(crate) fn arguments(s: &str) -> std::result::Result<(Vec<String>, usize), (String, usize)> {
    let mut args = Vec::new();
    let mut arg = String::new();
    let mut state = State::Start;

    for (i, c) in s.char_indices() {
        let after = i + c.len_utf8();
        let unexpected = || (format!("unexpected `{c}`"), after);
        state = match state {
            State::Start | State::Next => match c {
                ')' if state == State::Start => return Ok((args, after)),
                ',' | ')' => return Err(unexpected()),
                '\'' | '"' => State::Quoted(c),
                c if c.is_whitespace() => state,
                c => {
                    arg.push(c);
                    State::Bare
                }
            },

            State::Bare => match c {
                ')' => {
                    args.push(arg.trim_end().to_owned());
                    return Ok((args, after));
                }
                ',' => {
                    args.push(std::mem::take(&mut arg).trim_end().to_owned());
                    State::Next
                }
                '\'' | '"' => {
                    arg.push(c);
                    State::BareQuoted(c)
                }
                c => {
                    arg.push(c);
                    State::Bare
                }
            },

            State::BareQuoted(q) => {
                arg.push(c);
                if c == q {
                    State::Bare
                } else {
                    state
                }
            }

            State::Quoted(q) => match c {
                '\\' => State::Escape(q),
                c if c == q => State::AfterQuote,
                c => {
                    arg.push(c);
                    state
                }
            },

            State::Escape(q) => {
                arg.push(c);
                State::Quoted(q)
            }

            State::AfterQuote => match c {
                ')' => {
                    args.push(arg);
                    return Ok((args, after));
                }
                ',' => {
                    args.push(std::mem::take(&mut arg));
                    State::Next
                }
                c if c.is_whitespace() => state,
                c => {
                    return Err((
                        format!("unexpected `{c}`, expected `)` or `,`"),
                        after,
                    ))
                }
            },
        };
    }

    Err(("unexpected end of input".into(), s.len()))
}
