//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// File writer, gzip-compressed for `.gz` paths.
///
/// Call `finish` when done, dropping the writer discards errors on the final write.
pub enum MaybeGzWriter {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl MaybeGzWriter {
    /// Flush all data and write the gzip trailer where applicable.
    pub fn finish(self) -> Result<(), anyhow::Error> {
        match self {
            MaybeGzWriter::Plain(mut writer) => writer.flush()?,
            MaybeGzWriter::Gz(encoder) => encoder.finish()?.flush()?,
        }
        Ok(())
    }
}

impl Write for MaybeGzWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            MaybeGzWriter::Plain(writer) => writer.write(buf),
            MaybeGzWriter::Gz(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            MaybeGzWriter::Plain(writer) => writer.flush(),
            MaybeGzWriter::Gz(encoder) => encoder.flush(),
        }
    }
}

/// Transparently open a file with gzip encoder.
pub fn open_write_maybe_gz<P>(path: P) -> Result<MaybeGzWriter, anyhow::Error>
where
    P: AsRef<Path>,
{
    if path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz")) {
        tracing::trace!("Opening {:?} as gzip for writing", path.as_ref());
        let file = File::create(path)?;
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        Ok(MaybeGzWriter::Gz(encoder))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path.as_ref());
        let file = File::create(path)?;
        Ok(MaybeGzWriter::Plain(BufWriter::new(file)))
    }
}

/// Read a whole file into a string, decompressing gzip transparently.
pub fn read_to_string_maybe_gz<P>(path: P) -> Result<String, anyhow::Error>
where
    P: AsRef<Path>,
{
    let mut reader = open_read_maybe_gz(path.as_ref())
        .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path.as_ref(), e))?;
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    #[rstest::rstest]
    #[case("filter.json")]
    #[case("filter.json.gz")]
    fn write_then_read_maybe_gz(#[case] filename: &str) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join(filename);

        let mut f = super::open_write_maybe_gz(&path)?;
        f.write_all(b"{\"genes\": [\"TP53\"]}\n")?;
        f.finish()?;

        pretty_assertions::assert_eq!(
            super::read_to_string_maybe_gz(&path)?,
            "{\"genes\": [\"TP53\"]}\n"
        );

        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[rstest::rstest]
    #[case::plain(false)]
    #[case::gzip(true)]
    fn finish_reports_write_errors(#[case] gzip: bool) -> Result<(), anyhow::Error> {
        let file = std::fs::OpenOptions::new().write(true).open("/dev/full")?;
        let mut f = if gzip {
            super::MaybeGzWriter::Gz(flate2::write::GzEncoder::new(
                std::io::BufWriter::new(file),
                flate2::Compression::default(),
            ))
        } else {
            super::MaybeGzWriter::Plain(std::io::BufWriter::new(file))
        };
        f.write_all(b"base__uid\n1\n")?;

        assert!(f.finish().is_err());

        Ok(())
    }
}
