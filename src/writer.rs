use std::{fmt, io};

use crate::{
    error::HashlateResult,
    value::{Value, format_double, format_float},
};

/// Output sink of a render.
///
/// Numbers have their own entry points so byte oriented sinks can format them
/// without an intermediate `String`.
///
/// Floating point values are printed in the shortest form that reads back to
/// the same number, with a trailing `.0` on whole values. Scientific notation
/// is only used below `1e-5` and from `1e16` up, and then in lower case: `#(1.5e10)`
/// prints `15000000000.0` and `#(1e20)` prints `1e20`, where a host `toString()`
/// would give `1.5E10` and `1.0E20`.
pub trait Writer {
    fn write_str(&mut self, s: &str) -> HashlateResult<()>;

    fn write_int(&mut self, value: i32) -> HashlateResult<()> {
        self.write_str(itoa::Buffer::new().format(value))
    }

    fn write_long(&mut self, value: i64) -> HashlateResult<()> {
        self.write_str(itoa::Buffer::new().format(value))
    }

    fn write_float(&mut self, value: f32) -> HashlateResult<()> {
        if value.is_finite() {
            self.write_str(ryu::Buffer::new().format_finite(value))
        } else {
            self.write_str(&format_float(value))
        }
    }

    fn write_double(&mut self, value: f64) -> HashlateResult<()> {
        if value.is_finite() {
            self.write_str(ryu::Buffer::new().format_finite(value))
        } else {
            self.write_str(&format_double(value))
        }
    }

    /// Writes a value the way `#(expr)` prints it. Null prints nothing.
    fn write_value(&mut self, value: &Value) -> HashlateResult<()> {
        match value {
            Value::Null => Ok(()),
            Value::Str(s) => self.write_str(s),
            Value::Int(i) => self.write_int(*i),
            Value::Long(l) => self.write_long(*l),
            Value::Float(f) => self.write_float(*f),
            Value::Double(d) => self.write_double(*d),
            Value::Bool(b) => self.write_str(if *b { "true" } else { "false" }),
            Value::List(_)
            | Value::Map(_)
            | Value::Range(_)
            | Value::Iter(_)
            | Value::Status(_)
            | Value::Object(_) => self.write_str(&value.to_string()),
        }
    }

    fn flush(&mut self) -> HashlateResult<()> {
        Ok(())
    }
}

/// Buffers UTF-8 output in front of an [`io::Write`].
pub struct ByteWriter<W: io::Write> {
    out: W,
    buf: Vec<u8>,
    capacity: usize,
}

impl<W: io::Write> ByteWriter<W> {
    pub fn new(out: W, capacity: usize) -> Self {
        let capacity = capacity.max(64);
        Self {
            out,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn into_inner(mut self) -> HashlateResult<W> {
        self.flush_buf()?;
        Ok(self.out)
    }

    fn flush_buf(&mut self) -> HashlateResult<()> {
        if !self.buf.is_empty() {
            self.out.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: io::Write> Writer for ByteWriter<W> {
    fn write_str(&mut self, s: &str) -> HashlateResult<()> {
        if self.buf.len().saturating_add(s.len()) > self.capacity {
            self.flush_buf()?;
            if s.len() >= self.capacity {
                self.out.write_all(s.as_bytes())?;
                return Ok(());
            }
        }
        self.buf.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn flush(&mut self) -> HashlateResult<()> {
        self.flush_buf()?;
        self.out.flush()?;
        Ok(())
    }
}

/// Writes into any [`fmt::Write`], most commonly a `String`.
pub struct CharWriter<W: fmt::Write> {
    out: W,
}

impl<W: fmt::Write> CharWriter<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: fmt::Write> Writer for CharWriter<W> {
    fn write_str(&mut self, s: &str) -> HashlateResult<()> {
        self.out.write_str(s)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_char_writer_formats_values() {
        let mut writer = CharWriter::new(String::new());
        for value in [
            Value::Int(-7),
            Value::Long(9_000_000_000),
            Value::Double(1.0),
            Value::Float(0.5),
            Value::Null,
            Value::Bool(false),
            Value::Double(f64::INFINITY),
            Value::list([1, 2]),
        ] {
            writer.write_value(&value).unwrap();
            writer.write_str("|").unwrap();
        }
        assert_eq!(
            writer.into_inner(),
            "-7|9000000000|1.0|0.5||false|Infinity|[1, 2]|"
        );
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_large_doubles_print_in_plain_notation() {
        let mut writer = CharWriter::new(String::new());
        for value in [1.5e10, 1e20, 0.000_1] {
            writer.write_double(value).unwrap();
            writer.write_str("|").unwrap();
        }
        assert_eq!(writer.into_inner(), "15000000000.0|1e20|0.0001|");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_byte_writer_buffers_and_flushes() {
        let mut writer = ByteWriter::new(Vec::new(), 64);
        writer.write_str("héllo ").unwrap();
        writer.write_int(42).unwrap();
        let long = "x".repeat(100);
        writer.write_str(&long).unwrap();
        writer.write_str("!").unwrap();
        let bytes = writer.into_inner().unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            format!("héllo 42{long}!")
        );
    }
}
