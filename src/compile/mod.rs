//! Compile template source into blocks.
//!
//! This process has three stages:
//! - Author comments are removed.
//! - Block regions are extracted into a fragment of blocks.
//! - Each block is scanned for variables and function calls.
//!
//! The fragment is only grafted into the tree by the caller once every stage
//! has succeeded.

pub mod blocks;
pub mod scan;

use std::collections::HashSet;

use crate::types::syntax::Syntax;
use crate::types::tree::{Block, BlockId, Tree, Trigger};
use crate::{Error, Result};

/// Compiles source into a fragment whose top level block is named `top`.
///
/// If `replacing` is given then that block and its descendants are about
/// to be replaced, so their names may appear in the fragment.
pub fn fragment(
    syntax: &Syntax,
    tree: &mut Tree,
    source: &str,
    top: &str,
    replacing: Option<BlockId>,
) -> Result<Vec<Block>> {
    let source = blocks::strip_comments(source);
    let mut fragment = blocks::extract(syntax, &source, top)?;
    check_names(tree, &fragment, replacing)?;
    for i in 0..fragment.len() {
        let names: Vec<_> = fragment[i]
            .children
            .iter()
            .map(|c| fragment[c.0].name.clone())
            .collect();
        let children: Vec<_> = names.iter().map(String::as_str).collect();
        scan::block(syntax, tree, &mut fragment[i], &children)?;
    }
    tracing::debug!(top, blocks = fragment.len(), "compiled template");
    Ok(fragment)
}

/// Checks that the fragment's block names are unique and not already in
/// use.
pub fn check_names(tree: &Tree, fragment: &[Block], replacing: Option<BlockId>) -> Result<()> {
    let reusable = replacing.map(|id| tree.names_under(id)).unwrap_or_default();
    let mut seen = HashSet::new();
    for block in fragment {
        let name = block.name.as_str();
        if !seen.insert(name) || (tree.contains(name) && !reusable.contains(&name)) {
            return Err(Error::duplicate_block(name));
        }
    }
    Ok(())
}

/// Replaces `<!-- INCLUDE path -->` directives with trigger placeholders.
///
/// Trigger names are numbered from `next` which is advanced past the
/// returned triggers.
pub fn triggers(syntax: &Syntax, source: &str, next: &mut usize) -> (String, Vec<Trigger>) {
    let source = blocks::strip_comments(source);
    let mut out = String::with_capacity(source.len());
    let mut triggers = Vec::new();
    let mut last = 0;
    let mut i = 0;
    while let Some(d) = source[i..].find("<!--") {
        let at = i + d;
        match blocks::tag_at(&source, at) {
            Some((blocks::Tag::Include(path), end)) => {
                let name = format!("trigger_{next}");
                *next += 1;
                out.push_str(&source[last..at]);
                out.push_str(&syntax.placeholder(&name));
                triggers.push(Trigger {
                    name,
                    path: path.to_owned(),
                });
                last = end;
                i = end;
            }
            _ => i = at + 4,
        }
    }
    out.push_str(&source[last..]);
    (out, triggers)
}
