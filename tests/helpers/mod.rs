#![allow(dead_code)]

mod files;
mod writer;

pub use self::files::Files;
pub use self::writer::Writer;
