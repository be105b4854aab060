//! Task construction: id allocation and validated cut parameters.

use std::path::Path;
use std::sync::Arc;

use crate::config::FfmpegConfig;
use crate::cut::VideoCutTask;
use crate::error::EngineError;
use crate::idgen::IdGen;

/// Validated clip time range in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    from_secs: u64,
    to_secs: u64,
}

impl TimeRange {
    pub fn new(from_secs: u64, to_secs: u64) -> Result<Self, EngineError> {
        if from_secs >= to_secs {
            return Err(EngineError::InvalidTimeRange { from_secs, to_secs });
        }
        Ok(Self { from_secs, to_secs })
    }

    /// Range from a strict `HH:MM:SS` pair, as accepted from the UI.
    pub fn parse(from: &str, to: &str) -> Result<Self, EngineError> {
        Self::new(parse_time(from)?, parse_time(to)?)
    }

    pub fn from_secs(&self) -> u64 {
        self.from_secs
    }

    pub fn to_secs(&self) -> u64 {
        self.to_secs
    }

    pub fn duration_secs(&self) -> u64 {
        self.to_secs - self.from_secs
    }
}

/// Parse a strict two-digit `HH:MM:SS` offset into seconds.
pub fn parse_time(time: &str) -> Result<u64, EngineError> {
    let malformed = || EngineError::TimeFormat(time.to_string());

    if time.len() != 8 || !time.is_ascii() {
        return Err(malformed());
    }
    let (hours, rest) = time.split_at(2);
    let rest = rest.strip_prefix(':').ok_or_else(malformed)?;
    let (minutes, rest) = rest.split_at(2);
    let seconds = rest.strip_prefix(':').ok_or_else(malformed)?;

    let field = |field: &str| -> Result<u64, EngineError> {
        if !field.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        field.parse().map_err(|_| malformed())
    };

    Ok(field(hours)? * 3600 + field(minutes)? * 60 + field(seconds)?)
}

/// Builds tasks with service-assigned ids.
pub struct TaskFactory {
    id_gen: Arc<IdGen>,
    ffmpeg: FfmpegConfig,
}

impl TaskFactory {
    pub fn new(id_gen: Arc<IdGen>, ffmpeg: FfmpegConfig) -> Self {
        Self { id_gen, ffmpeg }
    }

    /// A clip-cut task for `source` over `range`. The source file itself is
    /// validated when the task runs; a missing file surfaces as the task's
    /// error state.
    pub fn cut(&self, source: &Path, range: TimeRange) -> Result<VideoCutTask, EngineError> {
        let id = self.id_gen.next_id()?;
        Ok(VideoCutTask::new(
            id,
            source.to_path_buf(),
            range,
            &self.ffmpeg,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_offsets() {
        assert_eq!(parse_time("00:00:10"), Ok(10));
        assert_eq!(parse_time("00:02:05"), Ok(125));
        assert_eq!(parse_time("01:02:03"), Ok(3723));
    }

    #[test]
    fn rejects_malformed_offsets() {
        for input in ["", "1:02:03", "01:02", "01-02-03", "aa:bb:cc", "+1:02:3", "01:02:03 "] {
            assert_eq!(
                parse_time(input),
                Err(EngineError::TimeFormat(input.to_string())),
                "{input:?} must be rejected"
            );
        }
    }

    #[test]
    fn range_must_move_forward() {
        assert!(TimeRange::new(10, 20).is_ok());
        assert_eq!(
            TimeRange::new(20, 20),
            Err(EngineError::InvalidTimeRange {
                from_secs: 20,
                to_secs: 20
            })
        );
        assert!(TimeRange::new(21, 20).is_err());
    }

    #[test]
    fn parsed_range_carries_duration() {
        let range = TimeRange::parse("00:00:10", "00:00:20").expect("range should parse");
        assert_eq!(range.from_secs(), 10);
        assert_eq!(range.to_secs(), 20);
        assert_eq!(range.duration_secs(), 10);
    }

    #[test]
    fn factory_assigns_increasing_ids() {
        use crate::task::Task;

        let factory = TaskFactory::new(Arc::new(IdGen::new(0)), FfmpegConfig::default());
        let range = TimeRange::new(0, 5).expect("range should be valid");
        let first = factory
            .cut(Path::new("/media/a.mp4"), range)
            .expect("task should be built");
        let second = factory
            .cut(Path::new("/media/b.mp4"), range)
            .expect("task should be built");
        assert!(second.id() > first.id());
    }
}
