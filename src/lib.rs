//! A block template compiler and renderer.
//!
//! # Features
//!
//! ### Syntax
//!
//! - Placeholders: `{user.name}`
//! - Placeholders passed through a callback: `{user.name:h}`
//! - Nested blocks: `<!-- BEGIN row --> ... <!-- END row -->`
//! - Inline callback calls: `func_link('https://example.com', {title})`
//! - Comments: `<!-- COMMENT --> ... <!-- /COMMENT -->`
//! - Included files: `<!-- INCLUDE header.html -->`
//! - Configurable delimiters: `[[ user.name ]]`
//!
//! ### Engine
//!
//! - Blocks are repeated by rendering them again, there is no loop syntax
//! - Empty blocks are removed from the output
//! - Set variables using any [`serde`] serializable values
//! - Compiled templates can be cached on disk
//! - Write output to a [`String`] or any [`std::io::Write`] implementor
//!
//! # Getting started
//!
//! Your entry point is the [`Engine`] struct. The engine stores the syntax
//! config, registered callbacks and file options. Generally, you only need
//! to construct one engine during the lifetime of a program.
//!
//! ```
//! let engine = sigma::Engine::new();
//! ```
//!
//! Next, [`.compile`][Engine::compile] is used to compile a template. A
//! template holds the compiled blocks together with the variables and
//! rendered output.
//!
//! ```
//! # let engine = sigma::Engine::new();
//! let mut template = engine.compile("<ul><!-- BEGIN item --><li>{name}</li><!-- END item --></ul>")?;
//! # Ok::<(), sigma::Error>(())
//! ```
//!
//! Blocks are rendered one at a time using
//! [`.render`][Template::render]. Each render consumes the variables it
//! uses and appends to the block's output. Finally, the whole document is
//! fetched using [`.output`][Template::output].
//!
//! ```
//! # let engine = sigma::Engine::new();
//! # let mut template = engine.compile("<ul><!-- BEGIN item --><li>{name}</li><!-- END item --></ul>")?;
//! for name in ["Alice", "Bob"] {
//!     template.set_variable("name", name)?;
//!     template.render("item")?;
//! }
//! assert_eq!(template.output(sigma::ROOT)?, "<ul><li>Alice</li><li>Bob</li></ul>");
//! # Ok::<(), sigma::Error>(())
//! ```
//!
//! # Examples
//!
//! ### Transform data using callbacks
//!
//! Data can be transformed using registered callbacks, either by suffixing
//! a placeholder with the callback name or by calling it inline.
//!
//! ```
//! let mut engine = sigma::Engine::new();
//! engine.add_callback("shout", |s: &str| s.to_uppercase())?;
//!
//! let mut template = engine.compile("{greeting:shout}, func_shout('world')!")?;
//! template.set_variable("greeting", "hello")?;
//!
//! assert_eq!(template.output(sigma::ROOT)?, "HELLO, WORLD!");
//! # Ok::<(), sigma::Error>(())
//! ```
//!
//! See the [`Callback`] trait documentation for more information on
//! callbacks.
//!
//! ### Render a template using custom syntax
//!
//! The placeholder delimiters can be set by constructing an engine using
//! [`Engine::with_syntax`].
//!
//! ```
//! #[derive(serde::Serialize)]
//! struct Context { user: User }
//!
//! #[derive(serde::Serialize)]
//! struct User { name: String }
//!
//! let syntax = sigma::Syntax::builder().placeholder("[[", "]]").build();
//! let engine = sigma::Engine::with_syntax(syntax);
//!
//! let ctx = Context { user: User { name: "John Smith".into() } };
//! let mut template = engine.compile("Hello [[user.name]]!")?;
//! template.set_variables(&ctx)?;
//!
//! assert_eq!(template.output(sigma::ROOT)?, "Hello John Smith!");
//! # Ok::<(), sigma::Error>(())
//! ```
//!
//! ### Load templates from files
//!
//! Templates are loaded relative to the engine root. When a cache
//! directory is set compiled templates are stored there and reused for as
//! long as the source file is unchanged.
//!
//! ```no_run
//! let mut engine = sigma::Engine::new();
//! engine.set_root("templates");
//! engine.set_cache_dir("cache")?;
//!
//! let mut template = engine.template();
//! template.load_file("index.html")?;
//! template.set_variable("title", "Home")?;
//! template.write_output(sigma::ROOT, std::io::stdout())?;
//! # Ok::<(), sigma::Error>(())
//! ```

mod cache;
mod callbacks;
mod compile;
mod error;
mod render;
mod types;
mod vars;

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

use serde::Serialize;

#[cfg(feature = "builtins")]
pub use crate::callbacks::builtins;
pub use crate::callbacks::Callback;
pub use crate::error::{Error, ErrorKind};
pub use crate::types::syntax::{Syntax, SyntaxBuilder};
pub use crate::types::tree::ROOT;

#[cfg(feature = "cache")]
use crate::cache::Prepared;
use crate::callbacks::Registered;
use crate::render::{Renderer, State};
use crate::types::syntax::is_function_name;
use crate::types::tree::{child_placeholder_name, Block, BlockId, Tree, Trigger};

/// A type alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The default limit on nested `INCLUDE` directives.
const MAX_INCLUDE_DEPTH: usize = 64;

/// The compilation engine.
pub struct Engine<'engine> {
    syntax: Syntax,
    callbacks: BTreeMap<Cow<'engine, str>, Registered>,
    options: Options,
    root: PathBuf,
    cache_dir: Option<PathBuf>,
    max_include_depth: usize,
}

#[derive(Debug, Clone)]
struct Options {
    remove_unknown_variables: bool,
    remove_empty_blocks: bool,
    preserve_data: bool,
    trim_on_save: bool,
}

/// A compiled template together with its variables and rendered output.
pub struct Template<'engine> {
    engine: &'engine Engine<'engine>,
    tree: Tree,
    state: State,
    current: BlockId,
    next_trigger: usize,
}

/// A block and its descendants, see [`Template::block_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTree<'a> {
    pub name: &'a str,
    pub children: Vec<BlockTree<'a>>,
}

/// Where a compiled fragment is attached.
enum Target {
    /// As a new block in place of a placeholder in `parent`.
    Add { parent: BlockId, placeholder: String },
    /// Over an existing block.
    Replace { id: BlockId, keep_content: bool },
}

impl Default for Options {
    fn default() -> Self {
        Self {
            remove_unknown_variables: true,
            remove_empty_blocks: true,
            preserve_data: false,
            trim_on_save: true,
        }
    }
}

impl<'engine> Default for Engine<'engine> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<'engine> Engine<'engine> {
    /// Construct a new engine.
    ///
    /// With the `builtins` feature the escaping callbacks `h`, `e`, `u`, `r`
    /// and `j` are registered.
    #[inline]
    pub fn new() -> Self {
        Self::with_syntax(Syntax::default())
    }

    /// Construct a new engine with custom syntax.
    ///
    /// # Examples
    ///
    /// ```
    /// use sigma::{Engine, Syntax};
    ///
    /// let syntax = Syntax::builder().placeholder("<%", "%>").function_prefix("call_").build();
    /// let engine = Engine::with_syntax(syntax);
    /// ```
    pub fn with_syntax(syntax: Syntax) -> Self {
        #[allow(unused_mut)]
        let mut registry = BTreeMap::new();
        #[cfg(feature = "builtins")]
        {
            let escapes: [(&str, fn(&str) -> String); 5] = [
                ("h", builtins::html_special_chars),
                ("e", builtins::html_entities),
                ("u", builtins::url_encode),
                ("r", builtins::raw_url_encode),
                ("j", builtins::js_escape),
            ];
            for (name, f) in escapes {
                registry.insert(Cow::Borrowed(name), callbacks::new(f, false));
            }
        }
        Self {
            syntax,
            callbacks: registry,
            options: Options::default(),
            root: PathBuf::new(),
            cache_dir: None,
            max_include_depth: MAX_INCLUDE_DEPTH,
        }
    }

    /// Set the directory that template filenames are relative to.
    #[inline]
    pub fn set_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.root = root.into();
        self
    }

    /// Set the directory where compiled templates are cached.
    ///
    /// Fails with [`ErrorKind::BadCacheDir`] if the path is not an existing
    /// directory. Without the `cache` feature the directory is validated but
    /// never used.
    pub fn set_cache_dir(&mut self, dir: impl Into<PathBuf>) -> Result<&mut Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::bad_cache_dir(&dir));
        }
        self.cache_dir = Some(dir);
        Ok(self)
    }

    /// Set the maximum nesting of `INCLUDE` directives, defaults to 64.
    #[inline]
    pub fn set_max_include_depth(&mut self, depth: usize) -> &mut Self {
        self.max_include_depth = depth;
        self
    }

    /// Whether placeholders without a value are removed from the output,
    /// defaults to `true`.
    #[inline]
    pub fn set_remove_unknown_variables(&mut self, yes: bool) -> &mut Self {
        self.options.remove_unknown_variables = yes;
        self
    }

    /// Whether blocks without any substituted variables are left out of the
    /// output, defaults to `true`.
    #[inline]
    pub fn set_remove_empty_blocks(&mut self, yes: bool) -> &mut Self {
        self.options.remove_empty_blocks = yes;
        self
    }

    /// Whether variable values are protected from being interpreted as
    /// placeholders, defaults to `false`.
    #[inline]
    pub fn set_preserve_data(&mut self, yes: bool) -> &mut Self {
        self.options.preserve_data = yes;
        self
    }

    /// Whether cached templates have each line trimmed and blank lines
    /// removed, defaults to `true`.
    #[inline]
    pub fn set_trim_on_save(&mut self, yes: bool) -> &mut Self {
        self.options.trim_on_save = yes;
        self
    }

    /// Set an option by name.
    ///
    /// The recognized names are `remove_unknown_variables`,
    /// `remove_empty_blocks`, `preserve_data` and `trim_on_save`.
    ///
    /// # Examples
    ///
    /// ```
    /// let mut engine = sigma::Engine::new();
    /// engine.set_option("preserve_data", true)?;
    ///
    /// let err = engine.set_option("strict", true).unwrap_err();
    /// assert_eq!(err.kind(), sigma::ErrorKind::UnknownOption);
    /// # Ok::<(), sigma::Error>(())
    /// ```
    pub fn set_option(&mut self, name: &str, value: bool) -> Result<&mut Self> {
        let option = match name {
            "remove_unknown_variables" => &mut self.options.remove_unknown_variables,
            "remove_empty_blocks" => &mut self.options.remove_empty_blocks,
            "preserve_data" => &mut self.options.preserve_data,
            "trim_on_save" => &mut self.options.trim_on_save,
            _ => return Err(Error::unknown_option(name)),
        };
        *option = value;
        Ok(self)
    }

    /// Register a callback.
    ///
    /// Arguments have any placeholders substituted before the call. An
    /// existing callback with the same name is replaced.
    #[inline]
    pub fn add_callback<N, F, R, A>(&mut self, name: N, f: F) -> Result<&mut Self>
    where
        N: Into<Cow<'engine, str>>,
        F: Callback<R, A> + Send + Sync + 'static,
        R: Into<String>,
    {
        self.insert_callback(name.into(), callbacks::new(f, false))
    }

    /// Register a callback that receives its arguments exactly as written in
    /// the template.
    #[inline]
    pub fn add_callback_preserving_args<N, F, R, A>(&mut self, name: N, f: F) -> Result<&mut Self>
    where
        N: Into<Cow<'engine, str>>,
        F: Callback<R, A> + Send + Sync + 'static,
        R: Into<String>,
    {
        self.insert_callback(name.into(), callbacks::new(f, true))
    }

    fn insert_callback(&mut self, name: Cow<'engine, str>, cb: Registered) -> Result<&mut Self> {
        if !is_function_name(&name) {
            return Err(Error::invalid_callback(&name));
        }
        self.callbacks.insert(name, cb);
        Ok(self)
    }

    /// Compile a template.
    #[inline]
    pub fn compile(&self, source: &str) -> Result<Template<'_>> {
        let mut template = self.template();
        template.set_template(source)?;
        Ok(template)
    }

    /// Returns an empty template, ready to be loaded from a file.
    #[inline]
    pub fn template(&self) -> Template<'_> {
        Template {
            engine: self,
            tree: Tree::new(),
            state: State::default(),
            current: BlockId::ROOT,
            next_trigger: 0,
        }
    }
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("syntax", &self.syntax)
            .field("callbacks", &self.callbacks.keys())
            .field("options", &self.options)
            .field("root", &self.root)
            .field("cache_dir", &self.cache_dir)
            .field("max_include_depth", &self.max_include_depth)
            .finish()
    }
}

impl<'engine> Template<'engine> {
    /// Replace the template with the given source.
    ///
    /// All blocks, output and local variables are discarded. Global
    /// variables are kept. On failure the template is left unchanged.
    pub fn set_template(&mut self, source: &str) -> Result<()> {
        let mut tree = Tree::new();
        let fragment =
            compile::fragment(&self.engine.syntax, &mut tree, source, ROOT, Some(BlockId::ROOT))?;
        tree.graft(fragment, Some(BlockId::ROOT));
        self.tree = tree;
        self.next_trigger = 0;
        self.reset_state();
        Ok(())
    }

    /// Replace the template with the contents of a file.
    ///
    /// The filename is relative to the engine root. `INCLUDE` directives
    /// are resolved relative to the root as well.
    ///
    /// A [`ErrorKind::CacheWrite`] error means the template was loaded but
    /// could not be cached, it is still usable.
    pub fn load_file(&mut self, filename: &str) -> Result<()> {
        let tree = mem::take(&mut self.tree);
        let state = mem::take(&mut self.state);
        let next_trigger = mem::take(&mut self.next_trigger);
        let target = Target::Replace {
            id: BlockId::ROOT,
            keep_content: false,
        };
        let result = self.load(filename, ROOT, target, 0);
        self.state = state;
        match result {
            Err(err) if err.kind() != ErrorKind::CacheWrite => {
                self.tree = tree;
                self.next_trigger = next_trigger;
                Err(err)
            }
            result => {
                self.reset_state();
                result
            }
        }
    }

    /// Add a new block in place of a placeholder.
    ///
    /// The placeholder must be found in exactly one block. The source is
    /// compiled as the content of the new block.
    ///
    /// # Examples
    ///
    /// ```
    /// let engine = sigma::Engine::new();
    /// let mut template = engine.compile("<h1>{title}</h1>{body}")?;
    /// template.add_block("body", "content", "<p>{text}</p>")?;
    ///
    /// template.set_variable("text", "Hello")?;
    /// template.render("content")?;
    /// assert_eq!(template.output(sigma::ROOT)?, "<h1></h1><p>Hello</p>");
    /// # Ok::<(), sigma::Error>(())
    /// ```
    pub fn add_block(&mut self, placeholder: &str, block: &str, source: &str) -> Result<()> {
        if self.tree.contains(block) {
            return Err(Error::block_exists(block));
        }
        let parent = self.owner(placeholder)?;
        let fragment = compile::fragment(&self.engine.syntax, &mut self.tree, source, block, None)?;
        let target = Target::Add {
            parent,
            placeholder: placeholder.to_owned(),
        };
        self.attach(fragment, target);
        Ok(())
    }

    /// Add a new block in place of a placeholder, from a file.
    ///
    /// See [`.add_block`][Template::add_block].
    pub fn add_block_file(&mut self, placeholder: &str, block: &str, filename: &str) -> Result<()> {
        if self.tree.contains(block) {
            return Err(Error::block_exists(block));
        }
        let parent = self.owner(placeholder)?;
        let target = Target::Add {
            parent,
            placeholder: placeholder.to_owned(),
        };
        self.load(filename, block, target, 0)
    }

    /// Replace the content of a block and all of its descendants.
    ///
    /// Unless `keep_content` is set the output rendered so far for the block
    /// is discarded.
    pub fn replace_block(&mut self, block: &str, source: &str, keep_content: bool) -> Result<()> {
        let id = self.tree.lookup(block)?;
        let fragment =
            compile::fragment(&self.engine.syntax, &mut self.tree, source, block, Some(id))?;
        self.attach(fragment, Target::Replace { id, keep_content });
        Ok(())
    }

    /// Replace the content of a block and all of its descendants, from a
    /// file.
    ///
    /// See [`.replace_block`][Template::replace_block].
    pub fn replace_block_file(
        &mut self,
        block: &str,
        filename: &str,
        keep_content: bool,
    ) -> Result<()> {
        let id = self.tree.lookup(block)?;
        self.load(filename, block, Target::Replace { id, keep_content }, 0)
    }

    /// Whether a block with this name exists.
    #[inline]
    pub fn block_exists(&self, block: &str) -> bool {
        self.tree.contains(block)
    }

    /// Returns the names of the direct children of a block.
    pub fn block_list(&self, parent: &str) -> Result<Vec<&str>> {
        let id = self.tree.lookup(parent)?;
        Ok(self
            .tree
            .get(id)
            .children
            .iter()
            .map(|c| self.tree.get(*c).name.as_str())
            .collect())
    }

    /// Returns a block and all of its descendants.
    pub fn block_tree(&self, parent: &str) -> Result<BlockTree<'_>> {
        let id = self.tree.lookup(parent)?;
        Ok(self.subtree(id))
    }

    fn subtree(&self, id: BlockId) -> BlockTree<'_> {
        let block = self.tree.get(id);
        BlockTree {
            name: &block.name,
            children: block.children.iter().map(|c| self.subtree(*c)).collect(),
        }
    }

    /// Returns the names of the placeholders in a block.
    ///
    /// Placeholders in child blocks are not included.
    pub fn placeholder_list(&self, block: &str) -> Result<Vec<&str>> {
        let id = self.tree.lookup(block)?;
        Ok(self
            .tree
            .get(id)
            .variables
            .iter()
            .map(String::as_str)
            .collect())
    }

    /// Returns the name of the first block containing the placeholder.
    ///
    /// If a block is given only that block is searched.
    pub fn placeholder_exists(&self, placeholder: &str, block: Option<&str>) -> Result<Option<&str>> {
        let found = match block {
            Some(block) => {
                let id = self.tree.lookup(block)?;
                Some(id).filter(|id| self.tree.get(*id).has_variable(placeholder))
            }
            None => self.tree.owners(placeholder).first().copied(),
        };
        Ok(found.map(|id| self.tree.get(id).name.as_str()))
    }

    /// Set the block used by [`.render_current`][Template::render_current].
    pub fn set_current_block(&mut self, block: &str) -> Result<()> {
        self.current = self.tree.lookup(block)?;
        Ok(())
    }

    /// Returns the name of the current block.
    #[inline]
    pub fn current_block(&self) -> &str {
        &self.tree.get(self.current).name
    }

    /// Render the current block, see [`.render`][Template::render].
    #[inline]
    pub fn render_current(&mut self) -> bool {
        self.render_id(self.current)
    }

    /// Render a block on the next render of its parent even if it is empty.
    pub fn touch_block(&mut self, block: &str) -> Result<()> {
        let id = self.tree.lookup(block)?;
        self.state.hidden.remove(&id);
        self.state.touched.insert(id);
        Ok(())
    }

    /// Leave a block out of the next render of its parent even if it is not
    /// empty.
    ///
    /// The variables it uses are still consumed.
    pub fn hide_block(&mut self, block: &str) -> Result<()> {
        let id = self.tree.lookup(block)?;
        self.state.touched.remove(&id);
        self.state.hidden.insert(id);
        Ok(())
    }

    /// Set a variable.
    ///
    /// Nested values are flattened using dotted names, e.g. setting `user`
    /// to `{"name": "John"}` sets `user.name`.
    #[inline]
    pub fn set_variable<T>(&mut self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.state.vars.set(name, value)
    }

    /// Set each entry of a map or struct as a variable.
    #[inline]
    pub fn set_variables<T>(&mut self, values: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.state.vars.set_all(values)
    }

    /// Set a global variable.
    ///
    /// Global variables are never consumed and are available to every
    /// block, they take precedence over local variables of the same name.
    #[inline]
    pub fn set_global_variable<T>(&mut self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.state.vars.set_global(name, value)
    }

    /// Set each entry of a map or struct as a global variable.
    #[inline]
    pub fn set_global_variables<T>(&mut self, values: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.state.vars.set_all_global(values)
    }

    /// Drop all variables that have not been consumed, globals are kept.
    #[inline]
    pub fn clear_variables(&mut self) {
        self.state.vars.clear();
    }

    /// Render a block, appending to its output.
    ///
    /// Returns `true` if the block was empty.
    pub fn render(&mut self, block: &str) -> Result<bool> {
        let id = self.tree.lookup(block)?;
        Ok(self.render_id(id))
    }

    fn render_id(&mut self, id: BlockId) -> bool {
        Renderer::new(self.engine, &self.tree, &mut self.state).render(id)
    }

    /// Returns the output of a block.
    ///
    /// The root block is rendered first if it has never been rendered.
    pub fn output(&mut self, block: &str) -> Result<String> {
        let id = self.tree.lookup(block)?;
        if id == BlockId::ROOT && !self.state.root_rendered {
            self.render_id(id);
        }
        let output = self.state.output.get(&id).map(String::as_str).unwrap_or("");
        Ok(self.finish(output))
    }

    /// Returns the output of a block and clears it.
    pub fn take_output(&mut self, block: &str) -> Result<String> {
        let output = self.output(block)?;
        if let Some(id) = self.tree.id(block) {
            self.state.output.remove(&id);
        }
        Ok(output)
    }

    /// Write the output of a block to a writer.
    pub fn write_output<W>(&mut self, block: &str, mut writer: W) -> Result<()>
    where
        W: io::Write,
    {
        let output = self.output(block)?;
        writer.write_all(output.as_bytes()).map_err(Error::io)
    }

    /// Set variables, render a block and take its output.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::collections::BTreeMap;
    ///
    /// let engine = sigma::Engine::new();
    /// let mut template = engine.compile("<!-- BEGIN row -->{name}={value}<!-- END row -->")?;
    ///
    /// let vars = BTreeMap::from([("name", "x"), ("value", "1")]);
    /// assert_eq!(template.render_with("row", &vars)?, "x=1");
    /// # Ok::<(), sigma::Error>(())
    /// ```
    pub fn render_with<T>(&mut self, block: &str, values: &T) -> Result<String>
    where
        T: Serialize + ?Sized,
    {
        self.set_variables(values)?;
        self.render(block)?;
        self.take_output(block)
    }

    fn finish(&self, output: &str) -> String {
        let engine = self.engine;
        let syntax = &engine.syntax;
        let mut output = if engine.options.remove_unknown_variables {
            syntax.strip(output)
        } else {
            output.to_owned()
        };
        if engine.options.preserve_data {
            output = output.replace(&syntax.preserved(), &syntax.open);
        }
        output
    }

    fn reset_state(&mut self) {
        let mut vars = mem::take(&mut self.state.vars);
        vars.clear();
        self.state = State {
            vars,
            ..State::default()
        };
        self.current = BlockId::ROOT;
    }

    /// Returns the only block containing the placeholder.
    fn owner(&self, placeholder: &str) -> Result<BlockId> {
        match self.tree.owners(placeholder).as_slice() {
            [] => Err(Error::placeholder_not_found(placeholder)),
            [id] => Ok(*id),
            _ => Err(Error::placeholder_duplicate(placeholder)),
        }
    }

    /// Grafts a compiled fragment into the tree, returning the id of its top
    /// level block.
    fn attach(&mut self, fragment: Vec<Block>, target: Target) -> BlockId {
        let engine = self.engine;
        match target {
            Target::Add {
                parent,
                placeholder,
            } => {
                let token = engine
                    .syntax
                    .placeholder(&child_placeholder_name(&fragment[0].name));
                let id = self.tree.graft(fragment, None);
                self.tree.get_mut(id).parent = Some(parent);

                let block = self.tree.get_mut(parent);
                block.content = engine
                    .syntax
                    .replace(&block.content, |name| {
                        (name == placeholder).then_some(token.as_str())
                    })
                    .into_owned();
                block.children.push(id);
                block.variables.retain(|v| *v != placeholder);
                id
            }
            Target::Replace { id, keep_content } => {
                for removed in self.tree.remove_descendants(id) {
                    self.forget(removed);
                }
                if !keep_content {
                    self.state.output.remove(&id);
                }
                self.state.touched.remove(&id);
                self.state.hidden.remove(&id);
                let id = self.tree.graft(fragment, Some(id));
                self.tree.release_calls();
                id
            }
        }
    }

    /// Drops the render state of a removed block.
    fn forget(&mut self, id: BlockId) {
        self.state.output.remove(&id);
        self.state.touched.remove(&id);
        self.state.hidden.remove(&id);
        if self.current == id {
            self.current = BlockId::ROOT;
        }
    }

    /// Loads a file as the block `top`, then resolves its includes.
    fn load(&mut self, filename: &str, top: &str, target: Target, depth: usize) -> Result<()> {
        let engine = self.engine;
        if depth > engine.max_include_depth {
            return Err(Error::max_include_depth(engine.max_include_depth));
        }
        let path = engine.root.join(filename);
        let replacing = match target {
            Target::Replace { id, .. } => Some(id),
            Target::Add { .. } => None,
        };

        let (fragment, triggers, compiled) = self.prepare(filename, &path, top, replacing)?;
        let id = self.attach(fragment, target);

        // The cache holds the file as compiled, before includes are pulled.
        #[cfg(feature = "cache")]
        let snapshot = match &engine.cache_dir {
            Some(dir) if compiled => Some((
                cache::cached_name(dir, filename),
                Prepared::export(&self.tree, id, &triggers, engine.options.trim_on_save),
            )),
            _ => None,
        };
        #[cfg(not(feature = "cache"))]
        let _ = (id, compiled);

        let mut deferred = None;
        for trigger in triggers {
            if let Err(err) = self.pull(trigger, depth + 1) {
                if err.kind() != ErrorKind::CacheWrite {
                    return Err(err);
                }
                deferred.get_or_insert(err);
            }
        }

        #[cfg(feature = "cache")]
        if let Some((cached, prepared)) = snapshot {
            if let Err(err) = cache::store(&path, &cached, &prepared) {
                tracing::debug!(path = %cached.display(), error = %err, "failed to write cached template");
                return Err(Error::cache_write(&cached, err));
            }
            tracing::debug!(path = %cached.display(), "wrote cached template");
        }

        deferred.map_or(Ok(()), Err)
    }

    /// Produces the compiled fragment for a file, from the cache if possible.
    ///
    /// The returned flag is `true` if the file was compiled from source.
    fn prepare(
        &mut self,
        filename: &str,
        path: &Path,
        top: &str,
        replacing: Option<BlockId>,
    ) -> Result<(Vec<Block>, Vec<Trigger>, bool)> {
        let engine = self.engine;

        #[cfg(feature = "cache")]
        if let Some(dir) = &engine.cache_dir {
            let cached = cache::cached_name(dir, filename);
            if cache::is_valid(path, &cached) {
                match cache::load(&cached) {
                    Ok(prepared) => {
                        let imported = prepared.import(
                            &engine.syntax,
                            &mut self.tree,
                            top,
                            &mut self.next_trigger,
                        );
                        match imported {
                            Some((fragment, triggers)) => {
                                compile::check_names(&self.tree, &fragment, replacing)?;
                                tracing::debug!(path = %cached.display(), "loaded cached template");
                                return Ok((fragment, triggers, false));
                            }
                            None => {
                                tracing::debug!(path = %cached.display(), "cached template is inconsistent, compiling")
                            }
                        }
                    }
                    Err(err) => {
                        tracing::debug!(path = %cached.display(), error = %err, "failed to read cached template, compiling")
                    }
                }
            }
        }
        #[cfg(not(feature = "cache"))]
        let _ = filename;

        let source = fs::read_to_string(path).map_err(|err| Error::template_not_found(path, err))?;
        let (source, triggers) = compile::triggers(&engine.syntax, &source, &mut self.next_trigger);
        let fragment = compile::fragment(&engine.syntax, &mut self.tree, &source, top, replacing)?;
        Ok((fragment, triggers, true))
    }

    /// Loads an included file in place of its trigger placeholder and merges
    /// it into the surrounding block.
    fn pull(&mut self, trigger: Trigger, depth: usize) -> Result<()> {
        let parent = self.owner(&trigger.name)?;
        tracing::debug!(path = %trigger.path, "including template");
        let target = Target::Add {
            parent,
            placeholder: trigger.name.clone(),
        };
        let result = self.load(&trigger.path, &trigger.name, target, depth);
        if let Err(err) = &result {
            if err.kind() != ErrorKind::CacheWrite {
                return result;
            }
        }
        let id = self.tree.lookup(&trigger.name)?;
        let token = self
            .engine
            .syntax
            .placeholder(&child_placeholder_name(&trigger.name));
        self.tree.inline(id, &token);
        result
    }
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("engine", &self.engine)
            .field("current", &self.current_block())
            .finish_non_exhaustive()
    }
}
