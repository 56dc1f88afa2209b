use crate::{DataSource, DataSourceError};

/// An in-memory data source.
#[derive(Debug, Clone, Default)]
pub struct BufferSource {
    name: String,
    data: Vec<u8>,
}

impl BufferSource {
    /// Create a source over the given bytes.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// The underlying bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl DataSource for BufferSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        let start = match usize::try_from(offset) {
            Ok(start) if start < self.data.len() => start,
            _ => return Ok(0),
        };
        let end = self.data.len().min(start.saturating_add(buf.len()));
        let len = end - start;
        buf[..len].copy_from_slice(&self.data[start..end]);
        Ok(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_short_read_zero_fills() {
        let source = BufferSource::new("buf", vec![1, 2, 3, 4]);
        let mut buf = [0xaa; 4];
        assert_eq!(source.read_zero_filled(2, &mut buf), 2);
        assert_eq!(buf, [3, 4, 0, 0]);

        let mut buf = [0xaa; 2];
        assert_eq!(source.read_zero_filled(10, &mut buf), 0);
        assert_eq!(buf, [0, 0]);
        assert_eq!(source.size(), 4);
    }
}
