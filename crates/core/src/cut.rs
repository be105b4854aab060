//! Video clip extraction backed by the external ffmpeg tool.
//!
//! The cut is a stream-copy over the requested range, so ffmpeg is expected
//! to be fast and I/O bound. Progress is read from the machine-readable
//! `-progress pipe:1` stream and reported as a percentage of the requested
//! duration.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::FfmpegConfig;
use crate::runtime::command_for;
use crate::task::{StateSink, Task};
use crate::tasks::TimeRange;

/// How many suffixes to probe for a free clip file name before giving up.
const CLIP_NAME_ATTEMPTS: u32 = 100;
/// Stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 32;

/// Cuts `[from, to)` out of a source file into a sibling clip file.
pub struct VideoCutTask {
    id: u64,
    name: String,
    source: PathBuf,
    range: TimeRange,
    ffmpeg_binary: String,
    cancel: CancellationToken,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl VideoCutTask {
    pub fn new(id: u64, source: PathBuf, range: TimeRange, ffmpeg: &FfmpegConfig) -> Self {
        let file_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());

        Self {
            id,
            name: format!("Cut {file_name}"),
            source,
            range,
            ffmpeg_binary: ffmpeg.binary.clone(),
            cancel: CancellationToken::new(),
            stderr_tail: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Most recent stderr lines of the external process. Safe to read while
    /// the process is still running.
    pub fn stderr_tail(&self) -> Vec<String> {
        match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// First free `stem-N.ext` sibling of `source`, probing N upwards.
    fn clip_destination(source: &Path) -> Result<PathBuf> {
        let stem = source
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = source
            .extension()
            .map(|extension| extension.to_string_lossy().into_owned());
        let parent = source.parent().unwrap_or_else(|| Path::new("."));

        for attempt in 1..=CLIP_NAME_ATTEMPTS {
            let file_name = match &extension {
                Some(extension) => format!("{stem}-{attempt}.{extension}"),
                None => format!("{stem}-{attempt}"),
            };
            let candidate = parent.join(file_name);
            if !candidate.exists() {
                return Ok(candidate);
            }
        }

        bail!(
            "no free clip file name next to {} after {CLIP_NAME_ATTEMPTS} attempts",
            source.display()
        )
    }

    fn build_args(source: &Path, destination: &Path, range: &TimeRange) -> Vec<String> {
        vec![
            "-nostdin".into(),
            "-y".into(),
            "-ss".into(),
            range.from_secs().to_string(),
            "-i".into(),
            source.to_string_lossy().into_owned(),
            "-t".into(),
            range.duration_secs().to_string(),
            "-c:v".into(),
            "copy".into(),
            "-c:a".into(),
            "copy".into(),
            "-progress".into(),
            "pipe:1".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "error".into(),
            destination.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Task for VideoCutTask {
    fn id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, sink: &dyn StateSink) -> Result<()> {
        if !self.source.exists() {
            bail!("source file not found: {}", self.source.display());
        }
        let destination = Self::clip_destination(&self.source)?;
        let args = Self::build_args(&self.source, &destination, &self.range);

        debug!(
            task_id = self.id,
            cmd = %format!("{} {}", self.ffmpeg_binary, args.join(" ")),
            "launching ffmpeg"
        );

        let mut child = TokioCommand::from(command_for(&self.ffmpeg_binary))
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to launch ffmpeg — is it installed?")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to open ffmpeg stderr"))?;

        let tail = Arc::clone(&self.stderr_tail);
        let stderr_drain = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                debug!(target: "ffmpeg_stderr", "{}", line);
                push_tail_line(&tail, line);
            }
        });

        let duration_secs = self.range.duration_secs();
        let mut progress_lines = BufReader::new(stdout).lines();
        let status = loop {
            tokio::select! {
                line = progress_lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(elapsed_us) = parse_out_time_us(&line) {
                            sink.progress(percent_of(elapsed_us, duration_secs));
                        }
                    }
                    // Stdout closed: the process is exiting.
                    Ok(None) => break child.wait().await.context("failed to wait for ffmpeg")?,
                    Err(err) => {
                        debug!(task_id = self.id, "ffmpeg stdout read error: {err}");
                        break child.wait().await.context("failed to wait for ffmpeg")?;
                    }
                },
                _ = self.cancel.cancelled() => {
                    child.start_kill().context("failed to kill ffmpeg")?;
                    let _ = child.wait().await;
                    let _ = stderr_drain.await;
                    info!(task_id = self.id, "cut canceled, ffmpeg killed");
                    sink.cancel();
                    return Ok(());
                }
            }
        };
        let _ = stderr_drain.await;

        if !status.success() {
            if self.cancel.is_cancelled() {
                sink.cancel();
                return Ok(());
            }
            bail!(
                "ffmpeg exited with {status}: {}",
                self.stderr_tail().join(" | ")
            );
        }

        info!(
            task_id = self.id,
            destination = %destination.display(),
            "clip written"
        );
        Ok(())
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

fn push_tail_line(tail: &Mutex<VecDeque<String>>, line: String) {
    let mut tail = match tail.lock() {
        Ok(tail) => tail,
        Err(poisoned) => poisoned.into_inner(),
    };
    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Parse one `-progress pipe:1` line into elapsed microseconds. ffmpeg
/// emits `out_time_us=` and the misnamed `out_time_ms=` (which also carries
/// microseconds); both are accepted, everything else is ignored.
fn parse_out_time_us(line: &str) -> Option<u64> {
    let value = line
        .strip_prefix("out_time_us=")
        .or_else(|| line.strip_prefix("out_time_ms="))?;
    value.trim().parse().ok()
}

fn percent_of(elapsed_us: u64, duration_secs: u64) -> u8 {
    let duration_us = duration_secs.saturating_mul(1_000_000).max(1);
    (elapsed_us.saturating_mul(100) / duration_us).min(100) as u8
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn range() -> TimeRange {
        TimeRange::new(10, 20).expect("range should be valid")
    }

    #[test]
    fn destination_probes_first_free_suffix() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let source = dir.path().join("movie.mp4");
        fs::write(&source, b"x").expect("source should be written");

        let first = VideoCutTask::clip_destination(&source).expect("destination should resolve");
        assert_eq!(first, dir.path().join("movie-1.mp4"));

        fs::write(dir.path().join("movie-1.mp4"), b"x").expect("clip should be written");
        fs::write(dir.path().join("movie-2.mp4"), b"x").expect("clip should be written");

        let third = VideoCutTask::clip_destination(&source).expect("destination should resolve");
        assert_eq!(third, dir.path().join("movie-3.mp4"));
    }

    #[test]
    fn destination_fails_when_name_space_is_exhausted() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let source = dir.path().join("movie.mp4");
        fs::write(&source, b"x").expect("source should be written");
        for attempt in 1..=CLIP_NAME_ATTEMPTS {
            fs::write(dir.path().join(format!("movie-{attempt}.mp4")), b"x")
                .expect("clip should be written");
        }

        let err = VideoCutTask::clip_destination(&source).expect_err("probing must give up");
        assert!(err.to_string().contains("no free clip file name"));
    }

    #[test]
    fn args_cut_with_stream_copy_and_progress_stream() {
        let source = Path::new("/media/movie.mp4");
        let destination = Path::new("/media/movie-1.mp4");
        let args = VideoCutTask::build_args(source, destination, &range());

        let joined = args.join(" ");
        assert!(joined.contains("-ss 10 -i /media/movie.mp4 -t 10"));
        assert!(joined.contains("-c:v copy -c:a copy"));
        assert!(joined.contains("-progress pipe:1"));
        assert_eq!(args.last().map(String::as_str), Some("/media/movie-1.mp4"));
    }

    #[test]
    fn progress_lines_parse_both_microsecond_keys() {
        assert_eq!(parse_out_time_us("out_time_us=5000000"), Some(5_000_000));
        assert_eq!(parse_out_time_us("out_time_ms=5000000"), Some(5_000_000));
        assert_eq!(parse_out_time_us("out_time=00:00:05.000000"), None);
        assert_eq!(parse_out_time_us("out_time_us=N/A"), None);
        assert_eq!(parse_out_time_us("frame=120"), None);
        assert_eq!(parse_out_time_us(""), None);
    }

    #[test]
    fn percent_is_fraction_of_requested_duration() {
        assert_eq!(percent_of(0, 10), 0);
        assert_eq!(percent_of(5_000_000, 10), 50);
        assert_eq!(percent_of(10_000_000, 10), 100);
        assert_eq!(percent_of(25_000_000, 10), 100, "overshoot must clamp");
    }

    #[test]
    fn cancel_is_idempotent() {
        let task = VideoCutTask::new(
            1,
            PathBuf::from("/media/movie.mp4"),
            range(),
            &FfmpegConfig::default(),
        );
        task.cancel();
        task.cancel();
        assert!(task.cancel.is_cancelled());
    }

    #[test]
    fn name_is_derived_from_the_file_name() {
        let task = VideoCutTask::new(
            1,
            PathBuf::from("/media/shows/clip.mp4"),
            range(),
            &FfmpegConfig::default(),
        );
        assert_eq!(task.name(), "Cut clip.mp4");
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let tail = Mutex::new(VecDeque::new());
        for n in 0..(STDERR_TAIL_LINES + 8) {
            push_tail_line(&tail, format!("line {n}"));
        }
        let tail = tail.into_inner().expect("tail should be intact");
        assert_eq!(tail.len(), STDERR_TAIL_LINES);
        assert_eq!(tail.front().map(String::as_str), Some("line 8"));
    }
}
