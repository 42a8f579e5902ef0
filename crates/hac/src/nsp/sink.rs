use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Snafu, Debug)]
pub enum SinkError {
    #[snafu(display("Failed to create the output file {}", path.display()))]
    Create { path: PathBuf, source: std::io::Error },
    #[snafu(display("Failed to write to the output file"))]
    Write { source: std::io::Error },
    #[snafu(display("Failed to seek the output file"))]
    Seek { source: std::io::Error },
    #[snafu(display("Failed to finalize the output file"))]
    Finalize { source: std::io::Error },
    #[snafu(display("Failed to remove the aborted output file {}", path.display()))]
    Remove { path: PathBuf, source: std::io::Error },
}

/// Random-access write destination for a produced NSP. The builder relies on `seek`
/// being able to rewrite the header region after streaming the rest of the file.
pub trait Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;
    fn seek(&mut self, offset: u64) -> Result<(), SinkError>;
    fn finalize(self) -> Result<(), SinkError>;
    fn abort(self) -> Result<(), SinkError>;
}

pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).context(CreateSnafu { path: path.clone() })?;
        Ok(Self { file, path })
    }
}

impl Sink for FileSink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        self.file.write_all(bytes).context(WriteSnafu)
    }

    fn seek(&mut self, offset: u64) -> Result<(), SinkError> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ()).context(SeekSnafu)
    }

    fn finalize(self) -> Result<(), SinkError> {
        self.file.sync_all().context(FinalizeSnafu)
    }

    fn abort(self) -> Result<(), SinkError> {
        drop(self.file);
        std::fs::remove_file(&self.path).context(RemoveSnafu { path: self.path })
    }
}
