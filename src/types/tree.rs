//! Defines the compiled block [`Tree`].
//!
//! Blocks live in an arena and refer to each other by [`BlockId`]. Names are
//! unique across the whole tree and map to ids through an index. Function
//! calls are interned so that identical calls share one [`CallId`] and
//! therefore one memoized result per render pass.
//!
//! Slots of removed blocks and ids of calls no longer referenced by any block
//! are reused, so repeatedly replacing blocks does not grow the tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// The reserved name of the block wrapping the whole document.
pub const ROOT: &str = "__global__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(usize);

/// A function call found in a block, e.g. `func_h('text')` or `{name:h}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    pub args: Vec<String>,
}

/// A deferred `<!-- INCLUDE path -->`, standing in the content as the
/// `{trigger_N}` placeholder until the file is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    /// Content with child blocks and function calls replaced by
    /// placeholders.
    pub content: String,
    /// Variable names referenced directly in the content, in order of first
    /// appearance.
    pub variables: Vec<String>,
    pub children: Vec<BlockId>,
    pub functions: Vec<CallId>,
    pub parent: Option<BlockId>,
}

#[derive(Debug)]
pub struct Tree {
    blocks: Vec<Option<Block>>,
    names: HashMap<String, BlockId>,
    /// Block slots emptied by removal.
    free: Vec<BlockId>,
    calls: Vec<Call>,
    call_ids: HashMap<Call, CallId>,
    /// Call ids not referenced by any block.
    free_calls: Vec<CallId>,
}

impl BlockId {
    pub const ROOT: Self = Self(0);
}

impl CallId {
    /// The name of the placeholder holding the memoized result.
    pub fn placeholder_name(self) -> String {
        format!("__function_{}__", self.0)
    }
}

impl Block {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            variables: Vec::new(),
            children: Vec::new(),
            functions: Vec::new(),
            parent: None,
        }
    }

    pub fn add_variable(&mut self, name: &str) {
        if !self.has_variable(name) {
            self.variables.push(name.to_owned());
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v == name)
    }

    pub fn add_function(&mut self, id: CallId) {
        if !self.functions.contains(&id) {
            self.functions.push(id);
        }
    }
}

/// Returns the name of the placeholder that refers to a child block.
pub fn child_placeholder_name(block: &str) -> String {
    format!("__{block}__")
}

impl Tree {
    /// Construct a new tree containing only an empty root block.
    pub fn new() -> Self {
        let mut tree = Self {
            blocks: Vec::new(),
            names: HashMap::new(),
            free: Vec::new(),
            calls: Vec::new(),
            call_ids: HashMap::new(),
            free_calls: Vec::new(),
        };
        tree.names.insert(ROOT.to_owned(), BlockId::ROOT);
        tree.blocks.push(Some(Block::new(ROOT, "")));
        tree
    }

    pub fn get(&self, id: BlockId) -> &Block {
        self.blocks[id.0].as_ref().expect("block id is live")
    }

    pub fn get_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks[id.0].as_mut().expect("block id is live")
    }

    pub fn id(&self, name: &str) -> Option<BlockId> {
        self.names.get(name).copied()
    }

    /// Looks up a block by name, failing if it does not exist.
    pub fn lookup(&self, name: &str) -> Result<BlockId> {
        self.id(name).ok_or_else(|| Error::block_not_found(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Interns a call, returning the id shared by all identical calls.
    pub fn intern(&mut self, call: Call) -> CallId {
        if let Some(id) = self.call_ids.get(&call) {
            return *id;
        }
        let id = match self.free_calls.pop() {
            Some(id) => {
                self.calls[id.0] = call.clone();
                id
            }
            None => {
                self.calls.push(call.clone());
                CallId(self.calls.len() - 1)
            }
        };
        self.call_ids.insert(call, id);
        id
    }

    /// Forgets calls that no block refers to, freeing their ids for reuse.
    pub fn release_calls(&mut self) {
        let mut used = vec![false; self.calls.len()];
        for block in self.blocks.iter().flatten() {
            for f in &block.functions {
                used[f.0] = true;
            }
        }
        self.call_ids.retain(|_, id| used[id.0]);
        self.free_calls = (0..self.calls.len())
            .rev()
            .filter(|i| !used[*i])
            .map(CallId)
            .collect();
    }

    pub fn call(&self, id: CallId) -> &Call {
        &self.calls[id.0]
    }

    /// Returns the block and all its descendants, depth first in declaration
    /// order.
    pub fn descendants(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.get(id).children.iter().rev());
        }
        out
    }

    /// Returns the blocks that reference the variable, depth first from the
    /// root.
    pub fn owners(&self, variable: &str) -> Vec<BlockId> {
        self.descendants(BlockId::ROOT)
            .into_iter()
            .filter(|id| self.get(*id).has_variable(variable))
            .collect()
    }

    /// Inserts compiled blocks into the tree.
    ///
    /// The blocks use fragment local ids, where index zero is the top level
    /// block. If `slot` is given the top level block takes over that id,
    /// otherwise it is allocated one. Returns the id of the top level block.
    ///
    /// The caller must have checked that none of the names already exist.
    pub fn graft(&mut self, fragment: Vec<Block>, slot: Option<BlockId>) -> BlockId {
        let ids: Vec<_> = (0..fragment.len())
            .map(|i| match (i, slot) {
                (0, Some(slot)) => slot,
                _ => self.alloc(),
            })
            .collect();
        let map = |local: BlockId| ids[local.0];

        let parent = slot.and_then(|s| self.blocks[s.0].as_ref().and_then(|b| b.parent));
        for (i, mut block) in fragment.into_iter().enumerate() {
            let id = ids[i];
            block.children = block.children.into_iter().map(map).collect();
            block.parent = match block.parent {
                Some(p) => Some(map(p)),
                None => parent,
            };
            self.names.insert(block.name.clone(), id);
            self.blocks[id.0] = Some(block);
        }
        ids[0]
    }

    fn alloc(&mut self) -> BlockId {
        self.free.pop().unwrap_or_else(|| {
            self.blocks.push(None);
            BlockId(self.blocks.len() - 1)
        })
    }

    /// Removes all descendants of the block, returning their ids.
    ///
    /// The block itself keeps its slot, name and parent but loses its
    /// children.
    pub fn remove_descendants(&mut self, id: BlockId) -> Vec<BlockId> {
        let removed: Vec<_> = self.descendants(id).into_iter().skip(1).collect();
        for r in &removed {
            if let Some(block) = self.blocks[r.0].take() {
                self.names.remove(&block.name);
                self.free.push(*r);
            }
        }
        self.get_mut(id).children.clear();
        removed
    }

    /// Merges a block into its parent in place of the given placeholder
    /// token.
    ///
    /// The block's children, variables and calls are taken over by the
    /// parent.
    pub fn inline(&mut self, id: BlockId, token: &str) {
        let Some(block) = self.blocks[id.0].take() else {
            return;
        };
        self.names.remove(&block.name);
        self.free.push(id);
        let Some(parent_id) = block.parent else {
            return;
        };
        for c in &block.children {
            self.get_mut(*c).parent = Some(parent_id);
        }
        let parent = self.get_mut(parent_id);
        parent.content = parent.content.replace(token, &block.content);
        if let Some(pos) = parent.children.iter().position(|c| *c == id) {
            parent.children.splice(pos..=pos, block.children.iter().copied());
        }
        for v in &block.variables {
            parent.add_variable(v);
        }
        for f in &block.functions {
            parent.add_function(*f);
        }
    }

    /// Returns the names of the block and all its descendants.
    pub fn names_under(&self, id: BlockId) -> Vec<&str> {
        self.descendants(id)
            .into_iter()
            .map(|id| self.get(id).name.as_str())
            .collect()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment() -> Vec<Block> {
        let mut a = Block::new("a", "x{__b__}");
        a.children.push(BlockId(1));
        let mut b = Block::new("b", "y");
        b.parent = Some(BlockId(0));
        vec![a, b]
    }

    #[test]
    fn tree_graft_new() {
        let mut tree = Tree::new();
        let a = tree.graft(fragment(), None);
        tree.get_mut(BlockId::ROOT).children.push(a);
        tree.get_mut(a).parent = Some(BlockId::ROOT);

        let b = tree.id("b").unwrap();
        assert_eq!(tree.get(b).parent, Some(a));
        assert_eq!(tree.get(a).children, [b]);
        assert_eq!(tree.names_under(BlockId::ROOT), [ROOT, "a", "b"]);
    }

    #[test]
    fn tree_graft_slot() {
        let mut tree = Tree::new();
        let mut fragment = fragment();
        fragment[0].name = ROOT.into();
        let top = tree.graft(fragment, Some(BlockId::ROOT));
        assert_eq!(top, BlockId::ROOT);
        assert_eq!(tree.get(BlockId::ROOT).content, "x{__b__}");
        assert_eq!(tree.get(tree.id("b").unwrap()).parent, Some(BlockId::ROOT));
    }

    #[test]
    fn tree_remove_descendants() {
        let mut tree = Tree::new();
        let mut fragment = fragment();
        fragment[0].name = ROOT.into();
        tree.graft(fragment, Some(BlockId::ROOT));
        let removed = tree.remove_descendants(BlockId::ROOT);
        assert_eq!(removed.len(), 1);
        assert!(!tree.contains("b"));
        assert!(tree.contains(ROOT));
        assert!(tree.get(BlockId::ROOT).children.is_empty());
    }

    #[test]
    fn tree_remove_descendants_reuses_slots() {
        let mut tree = Tree::new();
        for _ in 0..3 {
            tree.remove_descendants(BlockId::ROOT);
            let mut fragment = fragment();
            fragment[0].name = ROOT.into();
            tree.graft(fragment, Some(BlockId::ROOT));
        }
        assert_eq!(tree.blocks.len(), 2);
        assert_eq!(tree.get(BlockId::ROOT).children, [tree.id("b").unwrap()]);
    }

    #[test]
    fn tree_inline() {
        let mut tree = Tree::new();
        let mut fragment = fragment();
        fragment[0].name = ROOT.into();
        fragment[0].content = "<{__a__}>".into();
        let mut a = Block::new("a", "x{__b__}y");
        a.parent = Some(BlockId(0));
        a.children.push(BlockId(2));
        a.add_variable("v");
        fragment[0].children = vec![BlockId(1)];
        fragment[1] = a;
        let mut b = Block::new("b", "z");
        b.parent = Some(BlockId(1));
        fragment.push(b);
        tree.graft(fragment, Some(BlockId::ROOT));

        let a = tree.id("a").unwrap();
        let b = tree.id("b").unwrap();
        tree.inline(a, "{__a__}");
        assert!(!tree.contains("a"));
        let root = tree.get(BlockId::ROOT);
        assert_eq!(root.content, "<x{__b__}y>");
        assert_eq!(root.children, [b]);
        assert_eq!(root.variables, ["v"]);
        assert_eq!(tree.get(b).parent, Some(BlockId::ROOT));
    }

    #[test]
    fn tree_intern() {
        let mut tree = Tree::new();
        let call = || Call {
            name: "h".into(),
            args: vec!["a".into()],
        };
        let x = tree.intern(call());
        let y = tree.intern(call());
        let z = tree.intern(Call {
            name: "h".into(),
            args: vec!["b".into()],
        });
        assert_eq!(x, y);
        assert_ne!(x, z);
        assert_eq!(x.placeholder_name(), "__function_0__");
    }

    #[test]
    fn tree_release_calls() {
        let mut tree = Tree::new();
        let call = |arg: &str| Call {
            name: "h".into(),
            args: vec![arg.into()],
        };
        let a = tree.intern(call("a"));
        let b = tree.intern(call("b"));
        tree.get_mut(BlockId::ROOT).add_function(b);

        tree.release_calls();
        let c = tree.intern(call("c"));
        assert_eq!(c, a);
        assert_eq!(tree.call(c).args, ["c"]);
        assert_eq!(tree.intern(call("b")), b);
        assert_eq!(tree.calls.len(), 2);

        // Released calls are interned afresh.
        let a = tree.intern(call("a"));
        assert_eq!(tree.calls.len(), 3);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
