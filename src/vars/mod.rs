//! The variable store.
//!
//! Local variables are consumed by the first block that substitutes them in
//! a render pass. Global variables are never consumed.

mod ser;

use std::collections::HashMap;

use serde::Serialize;

use crate::Result;

#[derive(Debug, Default, Clone)]
pub struct Variables {
    locals: HashMap<String, String>,
    globals: HashMap<String, String>,
}

impl Variables {
    /// Sets a local variable, flattening nested values into dotted names.
    pub fn set<T>(&mut self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        ser::flatten(Some(name), value, &mut self.locals)
    }

    /// Sets each entry of a map, struct or sequence as a local variable.
    pub fn set_all<T>(&mut self, values: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        ser::flatten(None, values, &mut self.locals)
    }

    pub fn set_global<T>(&mut self, name: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        ser::flatten(Some(name), value, &mut self.globals)
    }

    pub fn set_all_global<T>(&mut self, values: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        ser::flatten(None, values, &mut self.globals)
    }

    /// Removes and returns a local variable.
    pub fn take(&mut self, name: &str) -> Option<String> {
        self.locals.remove(name)
    }

    pub fn global(&self, name: &str) -> Option<&str> {
        self.globals.get(name).map(String::as_str)
    }

    #[cfg(test)]
    pub fn local(&self, name: &str) -> Option<&str> {
        self.locals.get(name).map(String::as_str)
    }

    /// Drops all local variables, globals are kept.
    pub fn clear(&mut self) {
        self.locals.clear();
    }
}
