//! Extracts the nested block regions from template source.
//!
//! The source is scanned for `<!-- BEGIN name -->` and `<!-- END name -->`
//! tags. Regions are matched by name, so `BEGIN x` only pairs with `END x`.
//! A begin tag that is never closed is kept as literal text and its nested
//! blocks are attached to the enclosing block instead.

use std::collections::HashSet;

use crate::types::span::Span;
use crate::types::syntax::{is_block_char, take_while, Syntax};
use crate::types::tree::{child_placeholder_name, Block, BlockId};
use crate::{Error, Result};

/// A markup tag, e.g. `<!-- BEGIN name -->`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag<'s> {
    Begin(&'s str),
    End(&'s str),
    Comment,
    EndComment,
    Include(&'s str),
}

/// A block that has been opened but not yet closed.
struct Frame<'s> {
    name: &'s str,
    begin: Span,
    content: String,
    children: Vec<usize>,
}

/// Splits the source into blocks.
///
/// The returned blocks use fragment local ids, the block at index zero is
/// the top level block with the given name and wraps the entire source.
pub fn extract(syntax: &Syntax, source: &str, top: &str) -> Result<Vec<Block>> {
    let mut blocks = vec![Block::new(top, "")];
    let mut seen = HashSet::from([top]);
    let mut stack = vec![Frame::new(top, Span::from(0..0))];

    let mut last = 0;
    let mut i = 0;
    while let Some(d) = source[i..].find("<!--") {
        let at = i + d;
        match tag_at(source, at) {
            Some((Tag::Begin(name), end)) => {
                top_mut(&mut stack).content.push_str(&source[last..at]);
                stack.push(Frame::new(name, Span::from(at..end)));
                last = end;
                i = end;
            }

            Some((Tag::End(name), end)) if stack[1..].iter().any(|f| f.name == name) => {
                top_mut(&mut stack).content.push_str(&source[last..at]);

                // Any blocks opened after the one being closed were never
                // closed themselves.
                while stack.last().map(|f| f.name) != Some(name) {
                    unclose(source, &mut stack);
                }
                let frame = stack.pop().expect("frame exists");
                if !seen.insert(frame.name) {
                    return Err(Error::duplicate_block(frame.name));
                }

                let index = blocks.len();
                let mut block = Block::new(frame.name, frame.content);
                block.children = frame.children.into_iter().map(BlockId).collect();
                blocks.push(block);

                let parent = top_mut(&mut stack);
                let placeholder = syntax.placeholder(&child_placeholder_name(frame.name));
                parent.content.push_str(&placeholder);
                parent.children.push(index);

                last = end;
                i = end;
            }

            _ => i = at + 4,
        }
    }
    top_mut(&mut stack).content.push_str(&source[last..]);

    while stack.len() > 1 {
        unclose(source, &mut stack);
    }
    let frame = stack.pop().expect("top level frame exists");
    blocks[0].content = frame.content;
    blocks[0].children = frame.children.into_iter().map(BlockId).collect();

    for p in 0..blocks.len() {
        for c in blocks[p].children.clone() {
            blocks[c.0].parent = Some(BlockId(p));
        }
    }
    Ok(blocks)
}

/// Merges the innermost open block into its parent as literal text.
fn unclose(source: &str, stack: &mut Vec<Frame<'_>>) {
    let frame = stack.pop().expect("frame exists");
    let parent = top_mut(stack);
    parent.content.push_str(&source[frame.begin]);
    parent.content.push_str(&frame.content);
    parent.children.extend(frame.children);
}

fn top_mut<'a, 's>(stack: &'a mut [Frame<'s>]) -> &'a mut Frame<'s> {
    stack.last_mut().expect("top level frame exists")
}

impl<'s> Frame<'s> {
    fn new(name: &'s str, begin: Span) -> Self {
        Self {
            name,
            begin,
            content: String::new(),
            children: Vec::new(),
        }
    }
}

/// Removes `<!-- COMMENT --> ... <!-- /COMMENT -->` regions.
///
/// Each comment extends to the nearest closing tag.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    let mut i = 0;
    while let Some(d) = source[i..].find("<!--") {
        let at = i + d;
        match tag_at(source, at) {
            Some((Tag::Comment, end)) => match find_tag(source, end, Tag::EndComment) {
                Some(close) => {
                    out.push_str(&source[last..at]);
                    last = close;
                    i = close;
                }
                None => break,
            },
            _ => i = at + 4,
        }
    }
    out.push_str(&source[last..]);
    out
}

/// Returns the end of the first occurrence of the tag at or after `i`.
fn find_tag(source: &str, mut i: usize, tag: Tag<'_>) -> Option<usize> {
    while let Some(d) = source[i..].find("<!--") {
        let at = i + d;
        match tag_at(source, at) {
            Some((t, end)) if t == tag => return Some(end),
            _ => i = at + 4,
        }
    }
    None
}

/// Parses the tag starting exactly at byte `i`, returning the tag and the
/// end of it.
///
/// Whitespace is required between each part of the tag, e.g.
/// `<!--BEGIN x-->` is not a tag.
pub fn tag_at(source: &str, i: usize) -> Option<(Tag<'_>, usize)> {
    let s = source.get(i..)?.strip_prefix("<!--")?;
    let mut j = i + 4;

    let ws = whitespace(s);
    if ws == 0 {
        return None;
    }
    j += ws;

    let rest = &source[j..];
    let (keyword, len) = if rest.starts_with("BEGIN") {
        ("BEGIN", 5)
    } else if rest.starts_with("END") {
        ("END", 3)
    } else if rest.starts_with("COMMENT") {
        ("COMMENT", 7)
    } else if rest.starts_with("/COMMENT") {
        ("/COMMENT", 8)
    } else if rest.get(..7).map_or(false, |k| k.eq_ignore_ascii_case("INCLUDE")) {
        ("INCLUDE", 7)
    } else {
        return None;
    };
    j += len;

    let ws = whitespace(&source[j..]);
    if ws == 0 {
        return None;
    }
    j += ws;

    let tag = match keyword {
        "COMMENT" => return close(source, j, Tag::Comment),
        "/COMMENT" => return close(source, j, Tag::EndComment),
        "INCLUDE" => {
            let len = take_while(&source[j..], |c| !c.is_whitespace());
            if len == 0 {
                return None;
            }
            let path = &source[j..j + len];
            j += len;
            Tag::Include(path)
        }
        _ => {
            let len = take_while(&source[j..], is_block_char);
            if len == 0 {
                return None;
            }
            let name = &source[j..j + len];
            j += len;
            if keyword == "BEGIN" {
                Tag::Begin(name)
            } else {
                Tag::End(name)
            }
        }
    };

    let ws = whitespace(&source[j..]);
    if ws == 0 {
        return None;
    }
    close(source, j + ws, tag)
}

fn close<'s>(source: &str, j: usize, tag: Tag<'s>) -> Option<(Tag<'s>, usize)> {
    source[j..].strip_prefix("-->").map(|_| (tag, j + 3))
}

fn whitespace(s: &str) -> usize {
    take_while(s, |c| c.is_ascii_whitespace() || c == '\x0b')
}
