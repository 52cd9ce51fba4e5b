use std::io;

/// A writer that collects output and can be made to fail after a number of
/// writes.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
    count: usize,
    max: Option<usize>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            max: Some(0),
            ..Self::default()
        }
    }

    #[track_caller]
    pub fn into_string(self) -> String {
        String::from_utf8(self.buf).unwrap()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.count += 1;
        if self.max.map_or(false, |max| self.count > max) {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
