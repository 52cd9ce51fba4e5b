//! Renders blocks of a compiled [`Tree`].
//!
//! A render pass walks the tree depth first. Each block first consumes its
//! own variables from the store, then renders its children, then picks up
//! any global variables it references. All values are collected into a
//! [`Pass`] shared by the whole walk, and substituted in one go when the
//! outermost block is emitted.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::mem;

use crate::callbacks;
use crate::types::tree::{child_placeholder_name, BlockId, Tree};
use crate::vars::Variables;
use crate::Engine;

/// The mutable render state of a template.
#[derive(Debug, Default)]
pub struct State {
    pub vars: Variables,
    /// Blocks emitted on the next render even if empty.
    pub touched: HashSet<BlockId>,
    /// Blocks never emitted on the next render.
    pub hidden: HashSet<BlockId>,
    /// Accumulated output of each block.
    pub output: HashMap<BlockId, String>,
    /// Whether the root block has been rendered.
    pub root_rendered: bool,
}

/// Placeholder values collected during one top level render call.
///
/// Holds variable values as well as memoized call results keyed by their
/// placeholder name.
type Pass = HashMap<String, String>;

pub struct Renderer<'a, 'engine> {
    engine: &'a Engine<'engine>,
    tree: &'a Tree,
    state: &'a mut State,
}

impl<'a, 'engine> Renderer<'a, 'engine> {
    pub fn new(engine: &'a Engine<'engine>, tree: &'a Tree, state: &'a mut State) -> Self {
        Self {
            engine,
            tree,
            state,
        }
    }

    /// Renders the block, appending to its output.
    ///
    /// Returns `true` if the block was empty, i.e. it substituted no local
    /// variables and had no non-empty children.
    pub fn render(&mut self, id: BlockId) -> bool {
        let mut pass = Pass::new();
        self.block(id, &mut pass, false, false)
    }

    fn block(&mut self, id: BlockId, pass: &mut Pass, recursive: bool, fake: bool) -> bool {
        let engine = self.engine;
        let tree = self.tree;
        let block = tree.get(id);
        if id == BlockId::ROOT {
            self.state.root_rendered = true;
        }
        self.state.output.entry(id).or_default();

        // Own variables are consumed before any child gets the chance.
        let mut empty = true;
        for name in &block.variables {
            if let Some(value) = self.state.vars.take(name) {
                pass.insert(name.clone(), value);
                empty = false;
            }
        }

        let mut splice = HashMap::new();
        for &child in &block.children {
            let placeholder = child_placeholder_name(&tree.get(child).name);
            if self.state.hidden.contains(&child) {
                // Still walked so that its variables are drained.
                self.block(child, pass, true, true);
                self.state.hidden.remove(&child);
                splice.insert(placeholder, String::new());
            } else {
                self.block(child, pass, true, fake);
                let output = self
                    .state
                    .output
                    .get_mut(&child)
                    .map(mem::take)
                    .unwrap_or_default();
                if !output.is_empty() {
                    empty = false;
                }
                splice.insert(placeholder, output);
            }
        }

        for name in &block.variables {
            if let Some(value) = self.state.vars.global(name) {
                pass.insert(name.clone(), value.to_owned());
            }
        }

        if fake {
            return empty;
        }

        let emit = !empty
            || id == BlockId::ROOT
            || !engine.options.remove_empty_blocks
            || self.state.touched.contains(&id);
        if !emit {
            return empty;
        }

        for &call_id in &block.functions {
            let placeholder = call_id.placeholder_name();
            let result = match pass.get(&placeholder) {
                Some(result) => result.clone(),
                None => {
                    let call = tree.call(call_id);
                    let cb = engine.callbacks.get(call.name.as_str());
                    let args = match cb {
                        Some(cb) if cb.preserve_args => call.args.clone(),
                        _ => call
                            .args
                            .iter()
                            .map(|arg| self.substitute(arg, pass).into_owned())
                            .collect(),
                    };
                    let result = callbacks::call(cb, args);
                    pass.insert(placeholder.clone(), result.clone());
                    result
                }
            };
            splice.insert(placeholder, result);
        }

        let syntax = &engine.syntax;
        let mut content = syntax.replace(&block.content, |name| splice.get(name));
        if !recursive {
            content = Cow::Owned(self.substitute(&content, pass).into_owned());
        }

        self.state.output.entry(id).or_default().push_str(&content);
        self.state.touched.remove(&id);
        tracing::trace!(block = %block.name, recursive, "emitted block");
        empty
    }

    /// Substitutes the collected values into the text.
    ///
    /// With `preserve_data` the opening delimiter inside values is protected
    /// so that data is never treated as a placeholder.
    fn substitute<'s>(&self, s: &'s str, pass: &Pass) -> Cow<'s, str> {
        let syntax = &self.engine.syntax;
        if self.engine.options.preserve_data {
            let preserved = syntax.preserved();
            syntax.replace(s, |name| {
                pass.get(name).map(|v| v.replace(syntax.open.as_str(), &preserved))
            })
        } else {
            syntax.replace(s, |name| pass.get(name))
        }
    }
}
