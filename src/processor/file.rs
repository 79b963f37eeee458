//! PCM WAV file sink.

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{ProcessContext, Processor};
use crate::element::MusicInfo;
use crate::ProcessError;

// WAV file format constants
// See: http://soundfile.sapp.org/doc/WaveFormat/

/// Byte offset of the file size field in WAV header (RIFF chunk size).
const WAV_FILE_SIZE_OFFSET: u64 = 4;

/// Byte offset of the data chunk size field in WAV header.
const WAV_DATA_SIZE_OFFSET: u64 = 40;

/// Size of the WAV header in bytes (RIFF + fmt + data chunk headers).
const WAV_HEADER_SIZE: u32 = 44;

/// Size of the fmt chunk data (16 bytes for PCM).
const WAV_FMT_CHUNK_SIZE: u32 = 16;

/// Audio format code for PCM (uncompressed).
const WAV_FORMAT_PCM: u16 = 1;

/// A sink that writes raw PCM to a WAV file.
///
/// The file is created on the first non-empty chunk, using the element's
/// music info at that moment for the header, and finalized (sizes patched)
/// when the worker closes the processor.
///
/// # Example
///
/// ```no_run
/// use audio_pipeline::{Element, WavSink};
///
/// let recorder = Element::new(WavSink::new("recording.wav"));
/// ```
pub struct WavSink {
    name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl WavSink {
    /// Creates a sink writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            name: format!("wav:{}", path.as_ref().display()),
            path: path.as_ref().to_path_buf(),
            writer: None,
            bytes_written: 0,
        }
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes a complete WAV header with the given parameters.
    fn write_header(
        writer: &mut BufWriter<File>,
        info: &MusicInfo,
        layout: FrameLayout,
        data_size: u32,
    ) -> std::io::Result<()> {
        // RIFF container header
        writer.write_all(b"RIFF")?;
        writer.write_all(&riff_size(data_size).to_le_bytes())?;
        writer.write_all(b"WAVE")?;

        // fmt subchunk
        writer.write_all(b"fmt ")?;
        writer.write_all(&WAV_FMT_CHUNK_SIZE.to_le_bytes())?;
        writer.write_all(&WAV_FORMAT_PCM.to_le_bytes())?;
        writer.write_all(&info.channels.to_le_bytes())?;
        writer.write_all(&info.sample_rate.to_le_bytes())?;

        writer.write_all(&layout.byte_rate.to_le_bytes())?;
        writer.write_all(&layout.block_align.to_le_bytes())?;
        writer.write_all(&info.bits.to_le_bytes())?;

        // data subchunk header
        writer.write_all(b"data")?;
        writer.write_all(&data_size.to_le_bytes())?;

        Ok(())
    }

    /// Patches the size fields once the data length is known.
    fn update_header(writer: &mut BufWriter<File>, data_size: u32) -> std::io::Result<()> {
        writer.seek(SeekFrom::Start(WAV_FILE_SIZE_OFFSET))?;
        writer.write_all(&riff_size(data_size).to_le_bytes())?;

        writer.seek(SeekFrom::Start(WAV_DATA_SIZE_OFFSET))?;
        writer.write_all(&data_size.to_le_bytes())?;

        writer.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn open_file(&self, info: &MusicInfo) -> Result<BufWriter<File>, ProcessError> {
        let layout = FrameLayout::of(info)
            .ok_or_else(|| ProcessError::failed(format!("format {info} does not fit a wav header")))?;

        let file = File::create(&self.path).map_err(|e| ProcessError::file(&self.path, e))?;
        let mut writer = BufWriter::new(file);

        // Placeholder sizes, patched on close
        Self::write_header(&mut writer, info, layout, 0)
            .map_err(|e| ProcessError::file(&self.path, e))?;
        Ok(writer)
    }
}

/// Derived `fmt` chunk fields.
#[derive(Clone, Copy)]
struct FrameLayout {
    block_align: u16,
    byte_rate: u32,
}

impl FrameLayout {
    /// Returns `None` if a field overflows its header width.
    fn of(info: &MusicInfo) -> Option<Self> {
        let block_align = info.channels.checked_mul(info.bits / 8)?;
        let byte_rate = info.sample_rate.checked_mul(u32::from(block_align))?;
        Some(Self {
            block_align,
            byte_rate,
        })
    }
}

/// RIFF chunk size for `data_size` bytes of samples.
fn riff_size(data_size: u32) -> u32 {
    (WAV_HEADER_SIZE - 8).saturating_add(data_size)
}

impl Processor for WavSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        // File is created on first write when the format is known
        self.writer = None;
        self.bytes_written = 0;
        Ok(())
    }

    fn process(
        &mut self,
        input: &[u8],
        _output: &mut Vec<u8>,
        ctx: &ProcessContext,
    ) -> Result<(), ProcessError> {
        if input.is_empty() {
            return Ok(());
        }

        tracing::trace!(sink = %self.name, bytes = input.len(), "writing chunk");

        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => {
                let info = ctx.info();
                tracing::debug!(path = %self.path.display(), %info, "creating wav file");
                self.open_file(&info)?
            }
        };
        let writer = self.writer.insert(writer);

        writer
            .write_all(input)
            .map_err(|e| ProcessError::file(&self.path, e))?;
        self.bytes_written += input.len() as u64;
        Ok(())
    }

    fn close(&mut self, _ctx: &ProcessContext) -> Result<(), ProcessError> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let data_size = u32::try_from(self.bytes_written).unwrap_or(u32::MAX);
        Self::update_header(&mut writer, data_size)
            .map_err(|e| ProcessError::file(&self.path, e))?;
        writer
            .flush()
            .map_err(|e| ProcessError::file(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), bytes = self.bytes_written, "wav file finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Element, Passthrough};
    use tempfile::tempdir;

    fn context(info: MusicInfo) -> ProcessContext {
        let element = Element::new(Passthrough);
        element.set_info(info);
        element.process_context()
    }

    #[test]
    fn test_wav_sink_creates_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wav");
        let ctx = context(MusicInfo::new(44_100, 16, 2));

        let mut sink = WavSink::new(&path);
        sink.open(&ctx).unwrap();
        sink.process(&[1, 2, 3, 4], &mut Vec::new(), &ctx).unwrap();
        sink.close(&ctx).unwrap();

        let data = std::fs::read(&path).unwrap();
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[8..12], b"WAVE");
        assert_eq!(&data[12..16], b"fmt ");
        assert_eq!(&data[44..], &[1, 2, 3, 4]);

        let channels = u16::from_le_bytes([data[22], data[23]]);
        assert_eq!(channels, 2);
        let sample_rate = u32::from_le_bytes([data[24], data[25], data[26], data[27]]);
        assert_eq!(sample_rate, 44_100);
        let byte_rate = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        assert_eq!(byte_rate, 44_100 * 4);
        let block_align = u16::from_le_bytes([data[32], data[33]]);
        assert_eq!(block_align, 4);
    }

    #[test]
    fn test_wav_sink_sizes_patched_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sizes.wav");
        let ctx = context(MusicInfo::new(48_000, 16, 1));

        let mut sink = WavSink::new(&path);
        sink.open(&ctx).unwrap();
        for _ in 0..3 {
            sink.process(&[0; 4], &mut Vec::new(), &ctx).unwrap();
        }
        sink.close(&ctx).unwrap();

        let data = std::fs::read(&path).unwrap();
        let data_size = u32::from_le_bytes([data[40], data[41], data[42], data[43]]);
        assert_eq!(data_size, 12);
        let file_size = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        assert_eq!(file_size, WAV_HEADER_SIZE - 8 + 12);
    }

    #[test]
    fn test_wav_sink_no_file_without_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let ctx = context(MusicInfo::default());

        let mut sink = WavSink::new(&path);
        sink.open(&ctx).unwrap();
        sink.close(&ctx).unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_wav_sink_invalid_path_error() {
        let ctx = context(MusicInfo::default());
        let mut sink = WavSink::new("/nonexistent/directory/test.wav");

        let result = sink.process(&[1, 2], &mut Vec::new(), &ctx);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("nonexistent"));
    }

    #[test]
    fn test_wav_sink_rejects_oversized_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.wav");
        let ctx = context(MusicInfo::new(u32::MAX, 16, 2));

        let mut sink = WavSink::new(&path);
        sink.open(&ctx).unwrap();
        let err = sink.process(&[1, 2, 3, 4], &mut Vec::new(), &ctx).unwrap_err();
        assert!(err.to_string().contains("wav header"));
        assert!(!path.exists());

        let ctx = context(MusicInfo::new(48_000, 32, u16::MAX));
        assert!(sink.process(&[1, 2], &mut Vec::new(), &ctx).is_err());
    }

    #[test]
    fn test_riff_size_saturates() {
        assert_eq!(riff_size(12), WAV_HEADER_SIZE - 8 + 12);
        assert_eq!(riff_size(u32::MAX), u32::MAX);
    }

    #[test]
    fn test_wav_sink_name() {
        let sink = WavSink::new("/path/to/audio.wav");
        assert_eq!(sink.name(), "wav:/path/to/audio.wav");
        assert_eq!(sink.path(), Path::new("/path/to/audio.wav"));
    }
}
