//! Transcription Worker
//!
//! Runs OCR on a dedicated thread so the decoding loop never waits for
//! Tesseract. Changes arrive through a bounded FIFO channel; when OCR falls
//! behind, the channel fills up and the producer blocks.

use crate::accumulator::LineAccumulator;
use crate::change_detector::SubtitleMaterial;
use crate::ocr::{Corrections, OcrEngine};
use crate::sink::SubtitleSink;
use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, info, warn};
use std::thread::{self, JoinHandle};

enum Job {
    Material(SubtitleMaterial),
    EndOfStream { timestamp_ms: f64 },
}

/// What the worker did during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptionStats {
    pub events: u64,
    pub blank_events: u64,
    pub ocr_calls: u64,
    pub ocr_failures: u64,
    pub entries_written: u64,
}

/// Consumer side: owns the OCR engine, the accumulator and the sink.
pub struct TranscriptionWorker<E: OcrEngine> {
    engine: E,
    corrections: Corrections,
    accumulator: LineAccumulator,
    sink: Box<dyn SubtitleSink + Send>,
    flush_trailing_line: bool,
    stats: TranscriptionStats,
}

impl<E: OcrEngine> TranscriptionWorker<E> {
    pub fn new(
        engine: E,
        corrections: Corrections,
        sink: Box<dyn SubtitleSink + Send>,
        flush_trailing_line: bool,
    ) -> Self {
        TranscriptionWorker {
            engine,
            corrections,
            accumulator: LineAccumulator::new(),
            sink,
            flush_trailing_line,
            stats: TranscriptionStats::default(),
        }
    }

    /// Turns one change event into a decoded line.
    fn decode(&mut self, material: SubtitleMaterial) -> (String, f64) {
        match material {
            SubtitleMaterial::Blank { timestamp_ms } => {
                self.stats.blank_events += 1;
                (String::new(), timestamp_ms)
            }
            SubtitleMaterial::Candidate { image, timestamp_ms } => {
                self.stats.ocr_calls += 1;
                let line = match self.engine.recognize(&image) {
                    Ok(raw) => self.corrections.apply(&raw),
                    Err(e) => {
                        self.stats.ocr_failures += 1;
                        warn!(
                            "OCR failed for frame at {:.0} ms: {:#}. Treating as blank.",
                            timestamp_ms, e
                        );
                        String::new()
                    }
                };
                (line, timestamp_ms)
            }
        }
    }

    /// Handles a single event in arrival order.
    pub fn handle(&mut self, material: SubtitleMaterial) -> Result<()> {
        self.stats.events += 1;
        let (line, timestamp_ms) = self.decode(material);
        debug!("Decoded {:?} at {:.0} ms", line, timestamp_ms);

        if let Some(entry) = self.accumulator.push(line, timestamp_ms) {
            self.sink.write_entry(&entry)?;
            self.stats.entries_written += 1;
        }
        Ok(())
    }

    /// Deals with the line still open when the input ends.
    pub fn finish(&mut self, timestamp_ms: f64) -> Result<()> {
        if !self.flush_trailing_line {
            if !self.accumulator.candidate().text.is_empty() {
                info!("Dropping trailing line {:?}.", self.accumulator.candidate().text);
            }
            return Ok(());
        }
        if let Some(entry) = self.accumulator.finish(timestamp_ms) {
            self.sink.write_entry(&entry)?;
            self.stats.entries_written += 1;
        }
        Ok(())
    }

    pub fn stats(&self) -> TranscriptionStats {
        self.stats
    }

    fn run(mut self, jobs: Receiver<Job>) -> Result<TranscriptionStats> {
        // Blocks while the queue is empty; ends when the producer hangs up.
        for job in jobs {
            match job {
                Job::Material(material) => self.handle(material)?,
                Job::EndOfStream { timestamp_ms } => {
                    self.finish(timestamp_ms)?;
                    break;
                }
            }
        }
        Ok(self.stats)
    }
}

/// Producer side of a running worker thread.
pub struct TranscriberHandle {
    sender: Sender<Job>,
    thread: JoinHandle<Result<TranscriptionStats>>,
}

impl TranscriberHandle {
    /// Starts `worker` on its own thread behind a queue of `capacity` events.
    pub fn spawn<E>(worker: TranscriptionWorker<E>, capacity: usize) -> Result<Self>
    where
        E: OcrEngine + Send + 'static,
    {
        let (sender, receiver) = bounded(capacity.max(1));
        let thread = thread::Builder::new()
            .name("transcriber".to_string())
            .spawn(move || worker.run(receiver))
            .context("Failed to spawn transcription thread")?;
        Ok(TranscriberHandle { sender, thread })
    }

    /// Queues an event, blocking while the queue is full. Fails only if the
    /// worker has stopped.
    pub fn submit(&self, material: SubtitleMaterial) -> Result<()> {
        self.sender
            .send(Job::Material(material))
            .map_err(|_| anyhow!("Transcription worker stopped unexpectedly"))
    }

    /// Signals end of input, waits for the queue to drain and returns the
    /// worker's statistics or its error.
    pub fn finish(self, timestamp_ms: f64) -> Result<TranscriptionStats> {
        // A dead worker has dropped its receiver; its own error is reported
        // by the join below.
        let _ = self.sender.send(Job::EndOfStream { timestamp_ms });
        drop(self.sender);
        self.thread
            .join()
            .map_err(|_| anyhow!("Transcription thread panicked"))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::accumulator::FinishedEntry;
    use image::{GrayImage, Luma};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Returns scripted lines and records the pixel tag of every image seen.
    pub(crate) struct ScriptedOcr {
        pub lines: Vec<Result<String, String>>,
        pub seen: Arc<Mutex<Vec<u8>>>,
        pub delay: Vec<Duration>,
    }

    impl OcrEngine for ScriptedOcr {
        fn recognize(&mut self, image: &GrayImage) -> Result<String> {
            let mut seen = self.seen.lock().unwrap();
            let call = seen.len();
            seen.push(image.get_pixel(0, 0).0[0]);
            drop(seen);
            if let Some(delay) = self.delay.get(call) {
                thread::sleep(*delay);
            }
            match self.lines.get(call) {
                Some(Ok(line)) => Ok(line.clone()),
                Some(Err(e)) => Err(anyhow!(e.clone())),
                None => Ok(String::new()),
            }
        }
    }

    #[derive(Clone, Default)]
    pub(crate) struct SharedSink(pub Arc<Mutex<Vec<FinishedEntry>>>);

    impl SubtitleSink for SharedSink {
        fn write_entry(&mut self, entry: &FinishedEntry) -> Result<()> {
            self.0.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }

    struct FailingSink;

    impl SubtitleSink for FailingSink {
        fn write_entry(&mut self, _entry: &FinishedEntry) -> Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    fn candidate(tag: u8, timestamp_ms: f64) -> SubtitleMaterial {
        SubtitleMaterial::Candidate {
            image: GrayImage::from_pixel(2, 2, Luma([tag])),
            timestamp_ms,
        }
    }

    fn ocr(lines: &[&str]) -> ScriptedOcr {
        ScriptedOcr {
            lines: lines.iter().map(|l| Ok(l.to_string())).collect(),
            seen: Arc::default(),
            delay: Vec::new(),
        }
    }

    #[test]
    fn blank_events_skip_ocr() {
        let engine = ocr(&[]);
        let seen = engine.seen.clone();
        let sink = Box::new(Vec::<FinishedEntry>::new());
        let mut worker = TranscriptionWorker::new(engine, Corrections::default(), sink, true);
        worker.handle(SubtitleMaterial::Blank { timestamp_ms: 0.0 }).unwrap();
        worker.handle(SubtitleMaterial::Blank { timestamp_ms: 40.0 }).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(worker.stats().blank_events, 2);
        assert_eq!(worker.stats().ocr_calls, 0);
    }

    #[test]
    fn corrections_apply_before_comparison() {
        let sink = SharedSink::default();
        let corrections = Corrections::new(crate::config::OcrSettings::default().corrections);
        let mut worker = TranscriptionWorker::new(
            ocr(&["-个 \n", "一个"]),
            corrections,
            Box::new(sink.clone()),
            true,
        );
        worker.handle(candidate(1, 0.0)).unwrap();
        // Same text once cleaned: the line continues.
        worker.handle(candidate(2, 40.0)).unwrap();
        worker.handle(SubtitleMaterial::Blank { timestamp_ms: 80.0 }).unwrap();

        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "一个");
        assert_eq!((entries[0].start_ms, entries[0].end_ms), (0.0, 80.0));
    }

    #[test]
    fn ocr_failure_counts_as_blank() {
        let sink = SharedSink::default();
        let engine = ScriptedOcr {
            lines: vec![
                Ok("第一".to_string()),
                Err("tesseract crashed".to_string()),
                Ok("第二".to_string()),
            ],
            seen: Arc::default(),
            delay: Vec::new(),
        };
        let mut worker =
            TranscriptionWorker::new(engine, Corrections::default(), Box::new(sink.clone()), true);
        worker.handle(candidate(1, 0.0)).unwrap();
        worker.handle(candidate(2, 1000.0)).unwrap();
        worker.handle(candidate(3, 1500.0)).unwrap();
        worker.finish(2000.0).unwrap();

        let entries = sink.0.lock().unwrap();
        let summary: Vec<_> = entries
            .iter()
            .map(|e| (e.index, e.start_ms, e.end_ms, e.text.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![(1, 0.0, 1000.0, "第一"), (2, 1500.0, 2000.0, "第二")]
        );
        assert_eq!(worker.stats().ocr_failures, 1);
    }

    #[test]
    fn trailing_line_can_be_dropped() {
        let sink = SharedSink::default();
        let mut worker = TranscriptionWorker::new(
            ocr(&["最后"]),
            Corrections::default(),
            Box::new(sink.clone()),
            false,
        );
        worker.handle(candidate(1, 0.0)).unwrap();
        worker.finish(500.0).unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(worker.stats().entries_written, 0);
    }

    #[test]
    fn thread_processes_in_fifo_order_despite_latency() {
        let sink = SharedSink::default();
        let engine = ScriptedOcr {
            lines: vec![Ok("一".into()), Ok("二".into()), Ok("三".into())],
            seen: Arc::default(),
            delay: vec![
                Duration::from_millis(30),
                Duration::from_millis(0),
                Duration::from_millis(10),
            ],
        };
        let seen = engine.seen.clone();
        let worker =
            TranscriptionWorker::new(engine, Corrections::default(), Box::new(sink.clone()), true);

        let handle = TranscriberHandle::spawn(worker, 1).unwrap();
        handle.submit(candidate(1, 0.0)).unwrap();
        handle.submit(candidate(2, 100.0)).unwrap();
        handle.submit(candidate(3, 200.0)).unwrap();
        let stats = handle.finish(300.0).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        let texts: Vec<_> = sink.0.lock().unwrap().iter().map(|e| e.text.clone()).collect();
        assert_eq!(texts, vec!["一", "二", "三"]);
        assert_eq!(stats.ocr_calls, 3);
        assert_eq!(stats.entries_written, 3);
    }

    #[test]
    fn sink_error_surfaces_on_finish() {
        let worker =
            TranscriptionWorker::new(ocr(&["字"]), Corrections::default(), Box::new(FailingSink), true);
        let handle = TranscriberHandle::spawn(worker, 4).unwrap();
        handle.submit(candidate(1, 0.0)).unwrap();
        let err = handle.finish(100.0).unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }
}
