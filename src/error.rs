use std::cmp::max;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::path::Path;

#[cfg(feature = "unicode")]
use unicode_width::UnicodeWidthStr;

use crate::types::span::Span;

/// An error that can occur during template compilation, rendering or
/// caching.
pub struct Error {
    kind: ErrorKind,
    msg: String,
    name: Option<String>,
    span: Option<(String, Span)>,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Two blocks share a name anywhere in the template.
    DuplicateBlock,
    /// The named block does not exist.
    BlockNotFound,
    /// A block with this name already exists.
    BlockExists,
    /// No block contains the placeholder.
    PlaceholderNotFound,
    /// More than one block contains the placeholder.
    PlaceholderDuplicate,
    /// An inline function call could not be parsed.
    CallbackSyntax,
    /// The option name is not recognized.
    UnknownOption,
    /// The callback cannot be registered under this name.
    InvalidCallback,
    /// The compiled template could not be written to the cache.
    CacheWrite,
    /// The template file could not be read.
    TemplateNotFound,
    /// The cache directory does not exist.
    BadCacheDir,
    /// Included templates are nested too deeply.
    MaxIncludeDepth,
    /// A variable value could not be converted.
    Serialize,
    /// Output could not be written.
    Io,
}

impl Error {
    fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            name: None,
            span: None,
            source: None,
        }
    }

    fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn with_source<E>(mut self, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(err));
        self
    }

    pub(crate) fn duplicate_block(name: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateBlock,
            format!("the name of a block must be unique within a template, block `{name}` found twice"),
        )
        .with_name(name)
    }

    pub(crate) fn block_not_found(name: &str) -> Self {
        Self::new(ErrorKind::BlockNotFound, format!("cannot find block `{name}`")).with_name(name)
    }

    pub(crate) fn block_exists(name: &str) -> Self {
        Self::new(ErrorKind::BlockExists, format!("block `{name}` already exists")).with_name(name)
    }

    pub(crate) fn placeholder_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::PlaceholderNotFound,
            format!("variable placeholder `{name}` not found"),
        )
        .with_name(name)
    }

    pub(crate) fn placeholder_duplicate(name: &str) -> Self {
        Self::new(
            ErrorKind::PlaceholderDuplicate,
            format!("placeholder `{name}` should be unique, found in multiple blocks"),
        )
        .with_name(name)
    }

    pub(crate) fn callback_syntax(msg: impl Into<String>, source: &str, span: impl Into<Span>) -> Self {
        let mut err = Self::new(ErrorKind::CallbackSyntax, msg);
        err.span = Some((source.to_owned(), span.into()));
        err
    }

    pub(crate) fn unknown_option(name: &str) -> Self {
        Self::new(ErrorKind::UnknownOption, format!("unknown option `{name}`")).with_name(name)
    }

    pub(crate) fn invalid_callback(name: &str) -> Self {
        Self::new(
            ErrorKind::InvalidCallback,
            format!("`{name}` is not a valid callback name"),
        )
        .with_name(name)
    }

    pub(crate) fn cache_write(path: &Path, err: io::Error) -> Self {
        Self::new(
            ErrorKind::CacheWrite,
            format!("cannot save template file `{}`", path.display()),
        )
        .with_name(path.display().to_string())
        .with_source(err)
    }

    pub(crate) fn template_not_found(path: &Path, err: io::Error) -> Self {
        Self::new(
            ErrorKind::TemplateNotFound,
            format!("cannot read the template file `{}`", path.display()),
        )
        .with_name(path.display().to_string())
        .with_source(err)
    }

    pub(crate) fn bad_cache_dir(path: &Path) -> Self {
        Self::new(
            ErrorKind::BadCacheDir,
            format!(
                "cannot set cache directory to `{}`, it does not exist",
                path.display()
            ),
        )
        .with_name(path.display().to_string())
    }

    pub(crate) fn max_include_depth(max: usize) -> Self {
        Self::new(
            ErrorKind::MaxIncludeDepth,
            format!("reached maximum include depth ({max})"),
        )
    }

    pub(crate) fn io(err: io::Error) -> Self {
        Self::new(ErrorKind::Io, "failed to write output").with_source(err)
    }

    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the offending block, placeholder, option, callback name or
    /// file path, if there is one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the byte range in the offending block content, if there is
    /// one.
    ///
    /// This is only set for [`ErrorKind::CallbackSyntax`] errors.
    pub fn span(&self) -> Option<std::ops::Range<usize>> {
        self.span.as_ref().map(|(_, span)| (*span).into())
    }
}

impl serde::ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: fmt::Display,
    {
        Self::new(ErrorKind::Serialize, msg.to_string())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|err| err.as_ref() as &(dyn StdError + 'static))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some((source, span)) => fmt_pretty(&self.msg, source, *span, f),
            None => {
                write!(f, "{}", self.msg)?;
                if let Some(err) = &self.source {
                    write!(f, ": {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.span {
            Some((source, span)) => {
                if f.alternate() {
                    fmt_pretty(&self.msg, source, *span, f)
                } else {
                    write!(f, "{} between bytes {} and {}", self.msg, span.m, span.n)
                }
            }
            None => write!(f, "{}", self.msg),
        }
    }
}

fn fmt_pretty(msg: &str, source: &str, span: Span, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let lines: Vec<_> = source.split_terminator('\n').collect();
    let (line, col) = to_line_col(&lines, span.m);
    let width = max(1, width(&source[span]));
    let code = lines
        .get(line)
        .or_else(|| lines.last())
        .copied()
        .unwrap_or_default();

    let num = (line + 1).to_string();
    let pad = width_of(&num);
    let pipe = "|";
    let underline = "^".repeat(width);

    write!(
        f,
        "\n \
        {0:pad$} {pipe}\n \
        {num:>} {pipe} {code}\n \
        {0:pad$} {pipe} {underline:>width$} {msg}\n",
        "",
        pad = pad,
        pipe = pipe,
        num = num,
        code = code,
        underline = underline,
        width = col + width,
        msg = msg
    )
}

fn to_line_col(lines: &[&str], offset: usize) -> (usize, usize) {
    let mut n = 0;
    for (i, line) in lines.iter().enumerate() {
        let len = line.len() + 1;
        if n + len > offset {
            return (i, width(&line[..offset - n]));
        }
        n += len;
    }
    (
        lines.len().saturating_sub(1),
        lines.last().map(|l| width(l)).unwrap_or(0),
    )
}

fn width_of(s: &str) -> usize {
    s.len()
}

#[cfg(feature = "unicode")]
fn width(s: &str) -> usize {
    s.width()
}

#[cfg(not(feature = "unicode"))]
fn width(s: &str) -> usize {
    s.chars().count()
}
