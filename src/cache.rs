//! The compiled template cache.
//!
//! A compiled file is stored as JSON next to other cached templates, one
//! file per source. The cache file's modification time is set to that of
//! the source, an entry is only valid while the two are exactly equal.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::types::syntax::Syntax;
use crate::types::tree::{Block, BlockId, Call, Tree, Trigger, ROOT};

/// The serialized form of a compiled block and its descendants.
///
/// The top level block is always stored under the root name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prepared {
    pub blocks: BTreeMap<String, String>,
    pub variables: BTreeMap<String, Vec<String>>,
    pub children: BTreeMap<String, Vec<String>>,
    pub functions: BTreeMap<String, BTreeMap<String, Call>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub triggers: Vec<Trigger>,
}

impl Prepared {
    /// Snapshots the block and its descendants.
    ///
    /// With `trim` each line of content is trimmed and blank lines are
    /// removed.
    pub fn export(tree: &Tree, top: BlockId, triggers: &[Trigger], trim: bool) -> Self {
        let top_name = tree.get(top).name.as_str();
        let rename = |name: &str| {
            if name == top_name {
                ROOT.to_owned()
            } else {
                name.to_owned()
            }
        };

        let mut prepared = Self {
            blocks: BTreeMap::new(),
            variables: BTreeMap::new(),
            children: BTreeMap::new(),
            functions: BTreeMap::new(),
            triggers: triggers.to_vec(),
        };
        for id in tree.descendants(top) {
            let block = tree.get(id);
            let name = rename(&block.name);
            let content = if trim {
                trim_lines(&block.content)
            } else {
                block.content.clone()
            };
            let children = block
                .children
                .iter()
                .map(|c| rename(&tree.get(*c).name))
                .collect();
            let functions = block
                .functions
                .iter()
                .map(|f| (f.placeholder_name(), tree.call(*f).clone()))
                .collect();
            prepared.blocks.insert(name.clone(), content);
            prepared.variables.insert(name.clone(), block.variables.clone());
            prepared.children.insert(name.clone(), children);
            prepared.functions.insert(name, functions);
        }
        prepared
    }

    /// Converts the snapshot back into a fragment of blocks whose top level
    /// block is named `top`.
    ///
    /// Calls are interned into the tree and triggers are given fresh names,
    /// the content is rewritten to match. Returns `None` if the snapshot is
    /// inconsistent.
    pub fn import(
        self,
        syntax: &Syntax,
        tree: &mut Tree,
        top: &str,
        next_trigger: &mut usize,
    ) -> Option<(Vec<Block>, Vec<Trigger>)> {
        let Self {
            mut blocks,
            mut variables,
            mut children,
            mut functions,
            triggers,
        } = self;

        let mut renames = HashMap::new();
        let triggers: Vec<_> = triggers
            .into_iter()
            .map(|t| {
                let name = format!("trigger_{}", *next_trigger);
                *next_trigger += 1;
                renames.insert(t.name, name.clone());
                Trigger { name, path: t.path }
            })
            .collect();

        // Blocks are laid out depth first so that index zero is the top.
        let mut order = vec![ROOT.to_owned()];
        let mut seen = HashSet::from([ROOT.to_owned()]);
        let mut fragment = Vec::new();
        let mut i = 0;
        while i < order.len() {
            let name = order[i].clone();
            let content = blocks.remove(&name)?;
            let mut block = Block::new(if i == 0 { top } else { name.as_str() }, "");

            for child in children.remove(&name)? {
                if !seen.insert(child.clone()) {
                    return None;
                }
                block.children.push(BlockId(order.len()));
                order.push(child);
            }

            for (old, call) in functions.remove(&name).unwrap_or_default() {
                let id = tree.intern(call);
                block.add_function(id);
                renames.insert(old, id.placeholder_name());
            }

            for var in variables.remove(&name).unwrap_or_default() {
                block.add_variable(renames.get(&var).unwrap_or(&var));
            }

            block.content = content;
            fragment.push(block);
            i += 1;
        }

        for block in &mut fragment {
            block.content = syntax
                .replace(&block.content, |name| {
                    renames.get(name).map(|n| syntax.placeholder(n))
                })
                .into_owned();
        }
        for p in 0..fragment.len() {
            for c in fragment[p].children.clone() {
                fragment[c.0].parent = Some(BlockId(p));
            }
        }
        Some((fragment, triggers))
    }
}

fn trim_lines(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(feature = "cache")]
pub use self::io::{cached_name, is_valid, load, store};

#[cfg(feature = "cache")]
mod io {
    use std::fs;
    use std::io::{self, BufReader, Write};
    use std::path::{Path, PathBuf};
    use std::time::SystemTime;

    use tempfile::NamedTempFile;

    use super::Prepared;

    /// Returns the cache file path for a template filename.
    pub fn cached_name(dir: &Path, filename: &str) -> PathBuf {
        let mut name = filename.replace('/', "__");
        if cfg!(windows) {
            name = name.replace('\\', "__").replace(':', "");
        }
        dir.join(format!("{name}.it"))
    }

    /// Whether the cache file exists and has exactly the same modification
    /// time as the source.
    pub fn is_valid(source: &Path, cached: &Path) -> bool {
        match (modified(source), modified(cached)) {
            (Some(s), Some(c)) => s == c,
            _ => false,
        }
    }

    pub fn load(cached: &Path) -> io::Result<Prepared> {
        let file = fs::File::open(cached)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Writes the cache file atomically and stamps it with the source's
    /// modification time.
    pub fn store(source: &Path, cached: &Path, prepared: &Prepared) -> io::Result<()> {
        let json = serde_json::to_vec(prepared)?;
        let parent = match cached.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut temp_file = NamedTempFile::new_in(parent)?;
        temp_file.write_all(&json)?;
        temp_file.as_file().sync_all()?;
        let file = temp_file.persist(cached).map_err(|e| e.error)?;

        if let Some(mtime) = modified(source) {
            file.set_modified(mtime)?;
        }
        Ok(())
    }

    fn modified(path: &Path) -> Option<SystemTime> {
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }
}
