use std::io::{Read, Write};

use bufstream::BufStream;
use log::trace;

use crate::errors::DictError;

pub const DICT_EOL: &str = "\r\n";

// Wire limit is 1024 bytes per line including the CRLF.
const MAX_LINE: usize = 1024;
const MAX_PAYLOAD: usize = 1022;
const MAX_DOTTED_PAYLOAD: usize = 1021;

/// Framed DICT-protocol I/O. Handlers are written against this trait so the
/// `T` debug command can run them against a `NullConnection`.
pub trait Conn {
    fn read_line(&mut self) -> Result<String, DictError>;
    fn write_line(&mut self, line: &str, split: bool) -> Result<(), DictError>;
    fn write_text_end(&mut self) -> Result<(), DictError>;

    fn write_status(&mut self, code: u16, message: &str) -> Result<(), DictError> {
        let line = format!("{:03} {}", code, message);
        self.write_line(&line, false)
    }

    fn write_text(&mut self, lines: &[&str]) -> Result<(), DictError> {
        for line in lines {
            self.write_line(line, true)?;
        }
        self.write_text_end()
    }
}

pub struct Connection<S: Read + Write> {
    stream: BufStream<S>,
}

fn split_line(line: &str) -> Vec<String> {
    if line.is_empty() {
        return vec![String::new()];
    }
    let mut chunks = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let dotted = rest.starts_with('.');
        let budget = if dotted { MAX_DOTTED_PAYLOAD } else { MAX_PAYLOAD };
        let mut end = 0;
        for (i, ch) in rest.char_indices() {
            if i + ch.len_utf8() > budget {
                break;
            }
            end = i + ch.len_utf8();
        }
        let (chunk, tail) = rest.split_at(end);
        let mut wire = String::with_capacity(chunk.len() + 1);
        if dotted {
            wire.push('.');
        }
        wire.push_str(chunk);
        chunks.push(wire);
        rest = tail;
    }
    chunks
}

fn trunc_line(line: &str) -> String {
    split_line(line).into_iter().next().unwrap_or_default()
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S) -> Connection<S> {
        Connection {
            stream: BufStream::new(stream),
        }
    }

    fn write_raw(&mut self, line: &str) -> Result<(), DictError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(DICT_EOL.as_bytes())?;
        self.stream.flush()?;
        trace!("server: {}", line);
        Ok(())
    }
}

impl<S: Read + Write> Conn for Connection<S> {
    /// Reads one command line, stripping the trailing CRLF. A bare LF does
    /// not terminate the line.
    fn read_line(&mut self) -> Result<String, DictError> {
        let mut buf = Vec::with_capacity(128);
        let mut byte = [0u8; 1];
        while buf.len() < MAX_LINE {
            let n = self.stream.read(&mut byte)?;
            if n == 0 {
                return Err(DictError::Eof);
            }
            buf.push(byte[0]);
            if byte[0] == b'\n' && buf.len() >= 2 && buf[buf.len() - 2] == b'\r' {
                buf.truncate(buf.len() - 2);
                let line = String::from_utf8(buf)?;
                trace!("client: {}", line);
                return Ok(line);
            }
        }
        Err(DictError::LineTooLong)
    }

    /// Writes one line followed by CRLF. A leading '.' is doubled. Lines over
    /// the wire maximum are split into consecutive lines when `split` is
    /// true, truncated otherwise.
    fn write_line(&mut self, line: &str, split: bool) -> Result<(), DictError> {
        if split {
            for chunk in split_line(line) {
                self.write_raw(&chunk)?;
            }
            Ok(())
        } else {
            self.write_raw(&trunc_line(line))
        }
    }

    fn write_text_end(&mut self) -> Result<(), DictError> {
        self.write_raw(".")
    }
}

/// Sink connection used when timing commands; output is discarded and there
/// is nothing to read.
pub struct NullConnection;

impl Conn for NullConnection {
    fn read_line(&mut self) -> Result<String, DictError> {
        Err(DictError::Eof)
    }

    fn write_line(&mut self, _line: &str, _split: bool) -> Result<(), DictError> {
        Ok(())
    }

    fn write_text_end(&mut self) -> Result<(), DictError> {
        Ok(())
    }
}
