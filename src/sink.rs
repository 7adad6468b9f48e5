//! Output Sinks
//!
//! Destinations for finished subtitle entries. The transcriber writes every
//! entry to one sink; `MultiSink` fans it out to several.

use crate::accumulator::FinishedEntry;
use crate::config::OutputEncoding;
use crate::srt::render_entry;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub trait SubtitleSink {
    fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()>;
}

/// Writes SRT blocks to any `Write`, flushing after each block so an
/// interrupted run still leaves a valid file behind.
pub struct SrtWriter<W: Write> {
    writer: W,
    encoding: OutputEncoding,
    started: bool,
}

impl<W: Write> SrtWriter<W> {
    pub fn new(writer: W, encoding: OutputEncoding) -> Self {
        SrtWriter {
            writer,
            encoding,
            started: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl SrtWriter<BufWriter<File>> {
    /// Creates (or truncates) the SRT file at `path`.
    pub fn create(path: &Path, encoding: OutputEncoding) -> Result<Self> {
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() {
                fs::create_dir_all(parent_dir)
                    .context("Failed to create subtitle parent directory")?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Failed to create subtitle file {:?}", path))?;
        Ok(SrtWriter::new(BufWriter::new(file), encoding))
    }
}

impl<W: Write> SubtitleSink for SrtWriter<W> {
    fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
        if !self.started {
            if self.encoding == OutputEncoding::Utf8Bom {
                self.writer.write_all(UTF8_BOM)?;
            }
            self.started = true;
        }
        self.writer
            .write_all(render_entry(entry).as_bytes())
            .context("Failed to write subtitle entry")?;
        self.writer.flush().context("Failed to flush subtitle output")?;
        Ok(())
    }
}

/// Mirrors entries to the terminal without breaking the progress bar.
pub struct ConsoleSink {
    bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new(bar: ProgressBar) -> Self {
        ConsoleSink { bar }
    }
}

impl SubtitleSink for ConsoleSink {
    fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
        let block = render_entry(entry);
        if self.bar.is_hidden() {
            print!("{}", block);
        } else {
            self.bar.println(block.trim_end());
        }
        Ok(())
    }
}

/// Writes every entry to each inner sink, in order.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn SubtitleSink + Send>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl SubtitleSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl SubtitleSink for MultiSink {
    fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
        for sink in &mut self.sinks {
            sink.write_entry(entry)?;
        }
        Ok(())
    }
}

/// Keeps entries in memory.
impl SubtitleSink for Vec<FinishedEntry> {
    fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
        self.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn entry(index: usize, text: &str) -> FinishedEntry {
        FinishedEntry {
            index,
            start_ms: (index as f64 - 1.0) * 1000.0,
            end_ms: index as f64 * 1000.0,
            text: text.to_string(),
        }
    }

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<FinishedEntry>>>);

    impl SubtitleSink for Shared {
        fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    #[test]
    fn writes_srt_blocks() {
        let mut writer = SrtWriter::new(Vec::new(), OutputEncoding::Utf8);
        writer.write_entry(&entry(1, "一")).unwrap();
        writer.write_entry(&entry(2, "二")).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "1\n00:00:00,000 --> 00:00:01,000\n一\n\n2\n00:00:01,000 --> 00:00:02,000\n二\n\n"
        );
    }

    #[test]
    fn bom_written_once() {
        let mut writer = SrtWriter::new(Vec::new(), OutputEncoding::Utf8Bom);
        writer.write_entry(&entry(1, "a")).unwrap();
        writer.write_entry(&entry(2, "b")).unwrap();
        let bytes = writer.into_inner();
        assert!(bytes.starts_with(UTF8_BOM));
        assert_eq!(bytes.windows(3).filter(|w| *w == UTF8_BOM).count(), 1);
    }

    #[test]
    fn file_is_readable_after_each_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.srt");
        let mut writer = SrtWriter::create(&path, OutputEncoding::Utf8).unwrap();
        writer.write_entry(&entry(1, "你好")).unwrap();

        // Still open, but already flushed.
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "1\n00:00:00,000 --> 00:00:01,000\n你好\n\n");
    }

    #[test]
    fn multi_sink_fans_out() {
        let first = Shared::default();
        let second = Shared::default();
        let mut sink = MultiSink::new().with(first.clone()).with(second.clone());
        sink.write_entry(&entry(1, "a")).unwrap();
        sink.write_entry(&entry(2, "b")).unwrap();

        assert_eq!(first.0.lock().unwrap().len(), 2);
        assert_eq!(*first.0.lock().unwrap(), *second.0.lock().unwrap());
    }

    #[test]
    fn console_sink_accepts_entries() {
        let mut sink = ConsoleSink::new(ProgressBar::hidden());
        sink.write_entry(&entry(1, "a")).unwrap();
    }
}
