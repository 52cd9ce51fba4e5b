use std::borrow::Cow;

use crate::types::span::Span;

/// The template syntax configuration.
///
/// Use [`Syntax::default()`] to get the default syntax configuration and
/// [`Syntax::builder()`] to create a custom syntax configuration.
///
/// Block markup (`<!-- BEGIN name -->`, `<!-- END name -->`,
/// `<!-- COMMENT -->` and `<!-- INCLUDE path -->`) is fixed, only the
/// placeholder delimiters and the function call prefix are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syntax {
    pub(crate) open: String,
    pub(crate) close: String,
    pub(crate) function_prefix: String,
}

/// A builder for the syntax configuration.
///
/// This struct is typically created using [`Syntax::builder()`].
#[derive(Debug, Clone)]
pub struct SyntaxBuilder<'a> {
    placeholder: Option<(&'a str, &'a str)>,
    function_prefix: Option<&'a str>,
}

/// A placeholder found in content, e.g. `{name}` or `{name:fn}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// The span of the entire placeholder including delimiters.
    pub span: Span,
    /// The span of the variable name.
    pub name: Span,
    /// The span of the function name, if the placeholder is `{name:fn}`.
    pub func: Option<Span>,
}

impl Default for Syntax {
    /// Returns the default syntax configuration.
    ///
    /// This is equivalent to the following.
    /// ```
    /// use sigma::Syntax;
    ///
    /// let syntax = Syntax::builder()
    ///     .placeholder("{", "}")
    ///     .function_prefix("func_")
    ///     .build();
    /// assert_eq!(syntax, Syntax::default());
    /// ```
    #[inline]
    fn default() -> Self {
        Syntax::builder()
            .placeholder("{", "}")
            .function_prefix("func_")
            .build()
    }
}

impl Syntax {
    /// Create a new syntax builder.
    ///
    /// # Examples
    ///
    /// ```
    /// let syntax = sigma::Syntax::builder()
    ///     .placeholder("<%", "%>")
    ///     .function_prefix("call_")
    ///     .build();
    /// ```
    #[inline]
    pub fn builder<'a>() -> SyntaxBuilder<'a> {
        SyntaxBuilder::new()
    }

    /// Returns the placeholder token for the given name, e.g. `{name}`.
    pub(crate) fn placeholder(&self, name: &str) -> String {
        let mut s = String::with_capacity(self.open.len() + name.len() + self.close.len());
        s.push_str(&self.open);
        s.push_str(name);
        s.push_str(&self.close);
        s
    }

    /// Tries to match a placeholder starting exactly at byte `i`.
    ///
    /// When `with_func` is set then `{name:fn}` placeholders are also
    /// matched.
    pub(crate) fn match_at(&self, s: &str, i: usize, with_func: bool) -> Option<Match> {
        if !s[i..].starts_with(self.open.as_str()) {
            return None;
        }
        let j = i + self.open.len();
        let k = j + take_while(&s[j..], is_variable_char);
        if k == j {
            return None;
        }
        let name = Span::from(j..k);

        let mut end = k;
        let mut func = None;
        if with_func && s[k..].starts_with(':') {
            let f = k + 1;
            let g = f + function_name_len(&s[f..]);
            if g > f {
                func = Some(Span::from(f..g));
                end = g;
            }
        }

        if !s[end..].starts_with(self.close.as_str()) {
            return None;
        }
        let end = end + self.close.len();
        Some(Match {
            span: Span::from(i..end),
            name,
            func,
        })
    }

    /// Returns an iterator over all `{name}` and `{name:fn}` placeholders in
    /// the given content, in order of appearance.
    pub(crate) fn matches<'s>(&'s self, s: &'s str) -> impl Iterator<Item = Match> + 's {
        let mut i = 0;
        std::iter::from_fn(move || {
            while let Some(d) = s[i..].find(self.open.as_str()) {
                let at = i + d;
                match self.match_at(s, at, true) {
                    Some(m) => {
                        i = m.span.n;
                        return Some(m);
                    }
                    None => i = at + self.open.len(),
                }
            }
            i = s.len();
            None
        })
    }

    /// Replaces placeholders in a single pass.
    ///
    /// The closure is called with each placeholder name and returns the
    /// replacement, or `None` to leave the placeholder as is. Replacement
    /// text is never rescanned.
    pub(crate) fn replace<'s, F, V>(&self, s: &'s str, mut f: F) -> Cow<'s, str>
    where
        F: FnMut(&str) -> Option<V>,
        V: AsRef<str>,
    {
        let mut out = String::new();
        let mut last = 0;
        let mut i = 0;
        while let Some(d) = s[i..].find(self.open.as_str()) {
            let at = i + d;
            match self.match_at(s, at, false) {
                Some(m) => {
                    if let Some(value) = f(&s[m.name]) {
                        out.push_str(&s[last..at]);
                        out.push_str(value.as_ref());
                        last = m.span.n;
                    }
                    i = m.span.n;
                }
                None => i = at + self.open.len(),
            }
        }
        if last == 0 {
            return Cow::Borrowed(s);
        }
        out.push_str(&s[last..]);
        Cow::Owned(out)
    }

    /// Removes every placeholder left in the content, allowing whitespace
    /// around the name, e.g. `{ name }`.
    pub(crate) fn strip(&self, s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        let mut i = 0;
        while let Some(d) = s[i..].find(self.open.as_str()) {
            let at = i + d;
            let j = at + self.open.len();
            let k = j + take_while(&s[j..], char::is_whitespace);
            let l = k + take_while(&s[k..], is_variable_char);
            let m = l + take_while(&s[l..], char::is_whitespace);
            if l > k && s[m..].starts_with(self.close.as_str()) {
                out.push_str(&s[last..at]);
                last = m + self.close.len();
                i = last;
            } else {
                i = j;
            }
        }
        out.push_str(&s[last..]);
        out
    }

    /// The marker that protects opening delimiters in substituted data.
    pub(crate) fn preserved(&self) -> String {
        self.placeholder("%preserved%")
    }
}

impl<'a> SyntaxBuilder<'a> {
    /// Creates a new syntax builder.
    #[inline]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            placeholder: None,
            function_prefix: None,
        }
    }

    /// Set the placeholder delimiters.
    ///
    /// If not set then `{` and `}` are used.
    ///
    /// # Panics
    ///
    /// If either of the strings are empty.
    #[inline]
    pub fn placeholder(&mut self, open: &'a str, close: &'a str) -> &mut Self {
        assert!(!open.is_empty() && !close.is_empty());
        self.placeholder = Some((open, close));
        self
    }

    /// Set the prefix that marks an inline function call, e.g. `func_` in
    /// `func_upper('text')`.
    ///
    /// If not set then `func_` is used.
    ///
    /// # Panics
    ///
    /// If the prefix is empty.
    #[inline]
    pub fn function_prefix(&mut self, prefix: &'a str) -> &mut Self {
        assert!(!prefix.is_empty());
        self.function_prefix = Some(prefix);
        self
    }

    /// Builds the syntax configuration.
    pub fn build(&self) -> Syntax {
        let (open, close) = self.placeholder.unwrap_or(("{", "}"));
        Syntax {
            open: open.into(),
            close: close.into(),
            function_prefix: self.function_prefix.unwrap_or("func_").into(),
        }
    }
}

/// Returns the length in bytes of the longest prefix matching the predicate.
pub(crate) fn take_while<P>(s: &str, pred: P) -> usize
where
    P: Fn(char) -> bool,
{
    s.char_indices()
        .find(|&(_, c)| !pred(c))
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Returns the length of the function name at the start of `s`, or zero.
pub(crate) fn function_name_len(s: &str) -> usize {
    match s.chars().next() {
        Some(c) if is_function_start(c) => take_while(s, is_function_char),
        _ => 0,
    }
}

pub(crate) fn is_block_char(c: char) -> bool {
    matches!(c, '0'..='9' | 'A'..='Z' | 'a'..='z' | '_' | '-')
}

pub(crate) fn is_variable_char(c: char) -> bool {
    matches!(c, '0'..='9' | 'A'..='Z' | 'a'..='z' | '_' | '-' | '.')
}

pub(crate) fn is_function_start(c: char) -> bool {
    matches!(c, 'A'..='Z' | 'a'..='z' | '_')
}

pub(crate) fn is_function_char(c: char) -> bool {
    matches!(c, '0'..='9' | 'A'..='Z' | 'a'..='z' | '_')
}

/// Whether the name is a valid function name, e.g. for registering
/// callbacks.
pub(crate) fn is_function_name(name: &str) -> bool {
    !name.is_empty() && function_name_len(name) == name.len()
}
