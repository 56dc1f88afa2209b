use std::{
    fmt,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use same_file::Handle;

use crate::{DataSource, DataSourceError};

/// A data source reading directly from a file on disk.
///
/// The file size is captured when the file is opened.
pub struct FileSource {
    name: String,
    path: PathBuf,
    handle: Handle,
    size: u64,
}

impl FileSource {
    /// Open the file at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let path = path.as_ref();
        let open_error = |error| DataSourceError::OpenError {
            path: path.to_owned(),
            error: Arc::new(error),
        };
        let handle = Handle::from_path(path).map_err(open_error)?;
        let size = handle.as_file().metadata().map_err(open_error)?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        log::debug!("opened {} ({} bytes)", path.display(), size);
        Ok(Self {
            name,
            path: path.to_owned(),
            handle,
            size,
        })
    }

    /// The path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        if offset >= self.size {
            return Ok(0);
        }
        let mut file = self.handle.as_file();
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            let read = file.read(&mut buf[total..])?;
            if read == 0 {
                break;
            }
            total += read;
        }
        Ok(total)
    }

    fn file_handle(&self) -> Option<&Handle> {
        Some(&self.handle)
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
