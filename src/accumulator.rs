//! Line Accumulator
//!
//! Merges consecutive decoded lines into timed subtitle entries. A line stays
//! open until a different line (possibly the empty one) replaces it.

/// A completed subtitle, ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedEntry {
    /// 1-based position in the output.
    pub index: usize,
    pub start_ms: f64,
    pub end_ms: f64,
    pub text: String,
}

/// The line currently on screen and when it appeared.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateLine {
    pub text: String,
    pub start_ms: f64,
}

#[derive(Debug)]
pub struct LineAccumulator {
    candidate: CandidateLine,
    next_index: usize,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAccumulator {
    pub fn new() -> Self {
        LineAccumulator {
            candidate: CandidateLine {
                text: String::new(),
                start_ms: 0.0,
            },
            next_index: 1,
        }
    }

    pub fn candidate(&self) -> &CandidateLine {
        &self.candidate
    }

    /// Number of entries produced so far.
    pub fn entries_emitted(&self) -> usize {
        self.next_index - 1
    }

    /// Feeds the line decoded at `timestamp_ms`. Returns the entry closed by
    /// it, if any.
    pub fn push(&mut self, line: String, timestamp_ms: f64) -> Option<FinishedEntry> {
        if line == self.candidate.text {
            return None;
        }

        let replaced = std::mem::replace(
            &mut self.candidate,
            CandidateLine {
                text: line,
                start_ms: timestamp_ms,
            },
        );
        self.close(replaced, timestamp_ms)
    }

    /// Closes the open line at end of stream.
    pub fn finish(&mut self, timestamp_ms: f64) -> Option<FinishedEntry> {
        let open = std::mem::replace(
            &mut self.candidate,
            CandidateLine {
                text: String::new(),
                start_ms: timestamp_ms,
            },
        );
        self.close(open, timestamp_ms)
    }

    fn close(&mut self, line: CandidateLine, end_ms: f64) -> Option<FinishedEntry> {
        if line.text.is_empty() {
            return None;
        }
        let entry = FinishedEntry {
            index: self.next_index,
            start_ms: line.start_ms,
            end_ms,
            text: line.text,
        };
        self.next_index += 1;
        Some(entry)
    }
}
