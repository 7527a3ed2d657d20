//! Linux-specific extensions to std types
use std::{fs::File, io, io::Write};

use rustix::{
    fd::AsFd,
    io::{pread, pwrite, Errno},
};

use crate::{
    error::PowercapError,
    util::{parse_u64_auto, MAX_U64_SIZE},
};

pub type Result<T, E = PowercapError> = std::result::Result<T, E>;

/// Internal implementation details
mod imp {
    use super::*;

    pub trait FileExtSeal: AsFd {}

    impl FileExtSeal for File {}
}

/// Impl for [`FileExt::read_string`] and co.
///
/// Reads at most `size - 1` bytes from offset `0`.
fn read_impl<Fd: AsFd>(fd: Fd, buf: &mut [u8]) -> io::Result<usize> {
    let max = buf.len() - 1;
    loop {
        match pread(fd.as_fd(), &mut buf[..max], 0) {
            Ok(n) => return Ok(n),
            Err(Errno::INTR) => continue,
            // Some kernel attributes report ENODATA instead of a value.
            Err(Errno::NODATA) => return Ok(0),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Strip a single trailing newline, and anything after a NUL.
fn trim_line(buf: &[u8]) -> &[u8] {
    let buf = match buf.iter().position(|&b| b == 0) {
        Some(nul) => &buf[..nul],
        None => buf,
    };
    buf.strip_suffix(b"\n").unwrap_or(buf)
}

/// Extends [`File`] with the positioned I/O used for sysfs attributes.
///
/// Every operation works at offset `0`, so a long-lived descriptor always
/// sees the value the kernel currently reports, never a stale stream
/// position.
///
/// This trait is sealed
pub trait FileExt: imp::FileExtSeal {
    /// Read an unsigned integer.
    ///
    /// The value is parsed like `strtoull(3)` with base `0`, so decimal, `0x`
    /// hex and `0` octal are all accepted.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::EmptyOrMalformed`] if nothing was read, or no digits
    ///   could be parsed.
    /// - [`PowercapError::Io`] if the read itself does.
    fn read_u64(&self) -> Result<u64> {
        let mut buf = [0u8; MAX_U64_SIZE];
        let n = read_impl(self.as_fd(), &mut buf)?;
        if n == 0 {
            return Err(PowercapError::EmptyOrMalformed("empty read".into()));
        }
        let text = String::from_utf8_lossy(trim_line(&buf[..n]));
        parse_u64_auto(&text)
            .ok_or_else(|| PowercapError::EmptyOrMalformed(format!("`{}` is not a u64", text)))
    }

    /// Write an unsigned integer, as decimal ASCII.
    ///
    /// # Implementation
    ///
    /// A fixed, NUL padded, [`MAX_U64_SIZE`] byte buffer is written at
    /// offset `0`, so shorter values fully overwrite longer ones.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::Io`] if the write does, or nothing was written.
    fn write_u64(&self, val: u64) -> Result<()> {
        let mut buf = [0u8; MAX_U64_SIZE];
        write!(&mut buf[..], "{}", val)?;
        let written = loop {
            match pwrite(self.as_fd(), &buf, 0) {
                Ok(n) => break n,
                Err(Errno::INTR) => continue,
                Err(e) => return Err(io::Error::from(e).into()),
            }
        };
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "no bytes written").into());
        }
        Ok(())
    }

    /// Read a string of at most `size - 1` bytes, without the trailing
    /// newline.
    ///
    /// # Errors
    ///
    /// - [`PowercapError::InvalidArgument`] if `size` is zero.
    /// - [`PowercapError::EmptyOrMalformed`] if nothing was read.
    /// - [`PowercapError::Io`] if the read does.
    fn read_string(&self, size: usize) -> Result<String> {
        if size == 0 {
            return Err(PowercapError::InvalidArgument(
                crate::error::text::NAME_SIZE.into(),
            ));
        }
        let mut buf = vec![0u8; size];
        let n = read_impl(self.as_fd(), &mut buf)?;
        if n == 0 {
            return Err(PowercapError::EmptyOrMalformed("empty read".into()));
        }
        Ok(String::from_utf8_lossy(trim_line(&buf[..n])).into_owned())
    }
}

impl FileExt for File {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs::{self, OpenOptions};
    use tempfile::TempDir;

    fn file(dir: &TempDir, contents: &str) -> Result<File> {
        let path = dir.path().join("attr");
        fs::write(&path, contents)?;
        Ok(OpenOptions::new().read(true).write(true).open(path)?)
    }

    #[test]
    fn read_u64() -> Result<()> {
        let dir = TempDir::new()?;
        let f = file(&dir, "262143328850\n")?;
        assert_eq!(f.read_u64()?, 262143328850);
        // Positioned, reading twice gives the same answer.
        assert_eq!(f.read_u64()?, 262143328850);
        Ok(())
    }

    #[test]
    fn read_u64_empty() -> Result<()> {
        let dir = TempDir::new()?;
        let f = file(&dir, "")?;
        assert!(matches!(
            f.read_u64(),
            Err(PowercapError::EmptyOrMalformed(_))
        ));
        let f = file(&dir, "long_term\n")?;
        assert!(matches!(
            f.read_u64(),
            Err(PowercapError::EmptyOrMalformed(_))
        ));
        Ok(())
    }

    #[test]
    fn write_then_read() -> Result<()> {
        let dir = TempDir::new()?;
        let f = file(&dir, "1000000000\n")?;
        f.write_u64(15)?;
        assert_eq!(f.read_u64()?, 15);
        f.write_u64(u64::MAX)?;
        assert_eq!(f.read_u64()?, u64::MAX);
        Ok(())
    }

    #[test]
    fn write_read_only() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("attr");
        fs::write(&path, "1\n")?;
        let f = File::open(path)?;
        assert!(matches!(f.write_u64(0), Err(PowercapError::Io(_))));
        Ok(())
    }

    #[test]
    fn read_string() -> Result<()> {
        let dir = TempDir::new()?;
        let f = file(&dir, "package-0\n")?;
        assert_eq!(f.read_string(64)?, "package-0");
        // Truncated to size - 1
        assert_eq!(f.read_string(4)?, "pac");
        // Only one newline is removed
        let f = file(&dir, "core\n\n")?;
        assert_eq!(f.read_string(64)?, "core\n");
        assert!(matches!(
            f.read_string(0),
            Err(PowercapError::InvalidArgument(_))
        ));
        let f = file(&dir, "")?;
        assert!(matches!(
            f.read_string(64),
            Err(PowercapError::EmptyOrMalformed(_))
        ));
        Ok(())
    }
}
