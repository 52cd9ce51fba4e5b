#[cfg(feature = "builtins")]
pub mod builtins;

pub type CallbackFn = dyn Fn(&[String]) -> String + Send + Sync + 'static;

/// A registered callback.
pub struct Registered {
    pub func: Box<CallbackFn>,
    /// Whether arguments are passed through without substituting variables.
    pub preserve_args: bool,
}

pub fn new<F, R, A>(f: F, preserve_args: bool) -> Registered
where
    F: Callback<R, A> + Send + Sync + 'static,
    R: Into<String>,
{
    let func = Box::new(move |args: &[String]| -> String { f.call(args).into() });
    Registered {
        func,
        preserve_args,
    }
}

/// Invokes a callback.
///
/// When nothing is registered the first argument is returned unchanged.
pub fn call(cb: Option<&Registered>, args: Vec<String>) -> String {
    match cb {
        Some(cb) => (cb.func)(&args),
        None => args.into_iter().next().unwrap_or_default(),
    }
}

/// Represents any callback function.
///
/// This trait is used by the
/// [`Engine::add_callback`][crate::Engine::add_callback] method to abstract
/// over functions and closures of different arity. A callback receives the
/// call arguments as string slices and returns anything that converts into a
/// [`String`].
///
/// [`Callback`] is implemented for the following function types.
///
/// - `Fn() -> R`
/// - `Fn(&str) -> R`
/// - `Fn(&str, &str) -> R`
/// - `Fn(&str, &str, &str) -> R`
/// - `Fn(&[String]) -> R`, receiving all arguments
///
/// Missing arguments are passed as empty strings and extra arguments are
/// ignored.
///
/// ## Examples
///
/// Consider the following template.
///
/// ```text
/// func_link('https://example.com', {title})
/// ```
///
/// We could implement the `link` callback like this:
///
/// ```rust
/// let mut engine = sigma::Engine::new();
/// engine.add_callback("link", link)?;
///
/// fn link(href: &str, text: &str) -> String {
///     format!("<a href=\"{href}\">{text}</a>")
/// }
/// # Ok::<(), sigma::Error>(())
/// ```
pub trait Callback<R, A> {
    #[doc(hidden)]
    fn call(&self, args: &[String]) -> R;
}

/// Marker types used to select a [`Callback`] implementation.
#[doc(hidden)]
pub mod marker {
    pub enum Arg {}
    pub enum Args {}
}

use marker::{Arg, Args};

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(String::as_str).unwrap_or("")
}

impl<Func, R> Callback<R, ()> for Func
where
    Func: Fn() -> R,
{
    #[doc(hidden)]
    fn call(&self, _args: &[String]) -> R {
        self()
    }
}

impl<Func, R> Callback<R, (Arg,)> for Func
where
    Func: Fn(&str) -> R,
{
    #[doc(hidden)]
    fn call(&self, args: &[String]) -> R {
        self(arg(args, 0))
    }
}

impl<Func, R> Callback<R, (Arg, Arg)> for Func
where
    Func: Fn(&str, &str) -> R,
{
    #[doc(hidden)]
    fn call(&self, args: &[String]) -> R {
        self(arg(args, 0), arg(args, 1))
    }
}

impl<Func, R> Callback<R, (Arg, Arg, Arg)> for Func
where
    Func: Fn(&str, &str, &str) -> R,
{
    #[doc(hidden)]
    fn call(&self, args: &[String]) -> R {
        self(arg(args, 0), arg(args, 1), arg(args, 2))
    }
}

impl<Func, R> Callback<R, Args> for Func
where
    Func: Fn(&[String]) -> R,
{
    #[doc(hidden)]
    fn call(&self, args: &[String]) -> R {
        self(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn callback_arities() {
        let zero = new(|| "z", false);
        let one = new(|a: &str| a.to_uppercase(), false);
        let two = new(|a: &str, b: &str| format!("{a}+{b}"), false);
        let three = new(|a: &str, b: &str, c: &str| format!("{a}{b}{c}"), false);
        let all = new(|args: &[String]| args.join("|"), false);

        assert_eq!(call(Some(&zero), strings(&["x"])), "z");
        assert_eq!(call(Some(&one), strings(&["x", "y"])), "X");
        assert_eq!(call(Some(&two), strings(&["x"])), "x+");
        assert_eq!(call(Some(&three), strings(&["a", "b", "c", "d"])), "abc");
        assert_eq!(call(Some(&all), strings(&["a", "b", "c"])), "a|b|c");
    }

    #[test]
    fn callback_unregistered_echoes_first_argument() {
        assert_eq!(call(None, strings(&["a", "b"])), "a");
        assert_eq!(call(None, Vec::new()), "");
    }
}
