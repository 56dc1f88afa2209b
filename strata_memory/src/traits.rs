use std::{fmt, ops::Deref};

use same_file::Handle;

use crate::DataSourceError;

/// Trait for random access to the bytes of a file or buffer.
///
/// Offsets are absolute byte positions from the start of the source.
pub trait DataSource: fmt::Debug {
    /// A name for the source, used in logs and tool output.
    fn name(&self) -> &str;

    /// The total size of the source in bytes.
    fn size(&self) -> u64;

    /// Read bytes starting at `offset` into `buf`.
    ///
    /// Returns the number of bytes read, which is less than `buf.len()` when the read
    /// crosses the end of the source.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DataSourceError>;

    /// A handle identifying the underlying file, if the source is backed by one.
    ///
    /// Two sources with equal handles refer to the same file.
    fn file_handle(&self) -> Option<&Handle> {
        None
    }

    /// Read bytes at `offset`, zero filling anything that could not be read.
    ///
    /// Read errors are logged and treated as a short read. Returns the number of bytes
    /// that actually came from the source.
    fn read_zero_filled(&self, offset: u64, buf: &mut [u8]) -> usize {
        let read = match self.read(offset, buf) {
            Ok(read) => read.min(buf.len()),
            Err(error) => {
                log::warn!("{}: read at {} failed: {}", self.name(), offset, error);
                0
            }
        };
        buf[read..].fill(0);
        read
    }
}

impl<R, S> DataSource for R
where
    R: Deref<Target = S> + fmt::Debug,
    S: DataSource + ?Sized + 'static,
{
    fn name(&self) -> &str {
        self.deref().name()
    }

    fn size(&self) -> u64 {
        self.deref().size()
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        self.deref().read(offset, buf)
    }

    fn file_handle(&self) -> Option<&Handle> {
        self.deref().file_handle()
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use super::*;
    use crate::BufferSource;

    #[test]
    fn test_sources_behind_pointers() {
        let boxed: Box<dyn DataSource> = Box::new(BufferSource::new("boxed", vec![1, 2, 3]));
        assert_eq!(boxed.name(), "boxed");
        assert!(boxed.file_handle().is_none());

        let shared = Rc::new(BufferSource::new("shared", vec![4, 5]));
        let mut buf = [0; 3];
        assert_eq!(shared.read_zero_filled(0, &mut buf), 2);
        assert_eq!(buf, [4, 5, 0]);
        assert_eq!(DataSource::size(&shared), 2);
    }
}
