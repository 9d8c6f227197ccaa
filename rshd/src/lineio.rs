//! Unbuffered line input.
//!
//! Session input is shared with whatever a pipeline's first stage reads, so
//! lines are pulled one byte at a time and nothing past the newline is ever
//! consumed.

use std::io::{self, Read};
use std::os::unix::io::RawFd;

/// Longest accepted line, excluding the terminator.
pub const MAX_LINE: usize = 8192;

/// `Read` straight from a raw descriptor, with no userspace buffer.
#[derive(Debug, Clone, Copy)]
pub struct FdReader(RawFd);

impl FdReader {
    pub fn new(fd: RawFd) -> Self {
        FdReader(fd)
    }

    pub fn stdin() -> Self {
        FdReader(libc::STDIN_FILENO)
    }
}

impl Read for FdReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        nix::unistd::read(self.0, buf).map_err(io::Error::from)
    }
}

/// Read one line, dropping `\r` and stopping at `\n`.
///
/// Returns `Ok(None)` when the stream ends before any byte was read. A line
/// longer than `limit` is consumed up to its newline and reported as
/// `InvalidData`.
pub fn read_line<R: Read + ?Sized>(reader: &mut R, limit: usize) -> io::Result<Option<String>> {
    let mut buf: Vec<u8> = Vec::new();
    let mut seen_any = false;
    let mut overflow = false;
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
        seen_any = true;
        match byte[0] {
            b'\n' => break,
            b'\r' => {}
            b if buf.len() < limit => buf.push(b),
            _ => overflow = true,
        }
    }
    if !seen_any {
        return Ok(None);
    }
    if overflow {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}
