//! Video encoders
//!
//! The recorder talks to encoders through [`EncoderFactory`] and
//! [`VideoEncoder`]. The default implementation pipes raw RGB frames into an
//! FFmpeg child process.

use crate::frame::Frame;
use crate::recorder::state::EncoderSettings;
use crate::utils::error::{PipelineError, PipelineResult};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;

/// Collected stderr of an encoder process
type StderrLog = Option<thread::JoinHandle<String>>;

/// An open encoder session writing one output file
pub trait VideoEncoder: Send {
    /// Encode one frame. The frame already has the session resolution.
    fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()>;

    /// Write the container trailer and release the output file.
    ///
    /// Resources are released even when an error is returned.
    fn finish(self: Box<Self>) -> PipelineResult<()>;
}

/// Opens encoder sessions
pub trait EncoderFactory: Send + Sync {
    fn open(&self, settings: &EncoderSettings) -> PipelineResult<Box<dyn VideoEncoder>>;
}

/// Spawns one FFmpeg process per recording
#[derive(Debug, Clone)]
pub struct FfmpegEncoderFactory {
    program: PathBuf,
}

impl FfmpegEncoderFactory {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
        }
    }

    /// Use a specific FFmpeg binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Check that FFmpeg runs and lists the encoder we need
    fn check_encoder(&self, encoder: &str) -> PipelineResult<()> {
        let output = Command::new(&self.program)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                PipelineError::EncoderInit(format!(
                    "FFmpeg not found ({}). Please install FFmpeg and add it to PATH.",
                    e
                ))
            })?;

        let listing = String::from_utf8_lossy(&output.stdout);
        if !encoder_listed(&listing, encoder) {
            return Err(PipelineError::EncoderInit(format!(
                "Codec '{}' is not supported by this FFmpeg build",
                encoder
            )));
        }
        Ok(())
    }

    /// Start the encoder process. Its stderr is drained on a thread so a
    /// chatty FFmpeg cannot block on a full pipe.
    fn spawn(&self, settings: &EncoderSettings) -> PipelineResult<(Child, ChildStdin, StderrLog)> {
        let mut process = Command::new(&self.program)
            .args(ffmpeg_args(settings))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::EncoderInit(format!("Failed to start FFmpeg: {}", e)))?;

        let stderr_log = process.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut log = String::new();
                let _ = stderr.read_to_string(&mut log);
                log
            })
        });

        match process.stdin.take() {
            Some(stdin) => Ok((process, stdin, stderr_log)),
            None => {
                let _ = process.kill();
                let _ = process.wait();
                Err(PipelineError::EncoderInit(
                    "FFmpeg stdin was not captured".to_string(),
                ))
            }
        }
    }
}

impl Default for FfmpegEncoderFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether `ffmpeg -encoders` output contains the named encoder
fn encoder_listed(listing: &str, encoder: &str) -> bool {
    listing.lines().any(|line| {
        let mut columns = line.split_whitespace();
        // " V....D mpeg4    MPEG-4 part 2"
        matches!((columns.next(), columns.next()), (Some(flags), Some(name)) if flags.len() == 6 && name == encoder)
    })
}

/// Build the FFmpeg command line for a recording
fn ffmpeg_args(settings: &EncoderSettings) -> Vec<String> {
    let output = settings.path.to_string_lossy().to_string();
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-nostats".into(),
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pixel_format".into(),
        settings.input_format.ffmpeg_name().into(),
        "-video_size".into(),
        settings.resolution.to_string(),
        "-framerate".into(),
        settings.frame_rate.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        settings.codec.ffmpeg_encoder().into(),
        "-b:v".into(),
        settings.bitrate.to_string(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output,
    ]
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(&self, settings: &EncoderSettings) -> PipelineResult<Box<dyn VideoEncoder>> {
        if settings.resolution.width == 0 || settings.resolution.height == 0 {
            return Err(PipelineError::EncoderInit(format!(
                "Cannot record at {}",
                settings.resolution
            )));
        }

        if let Some(parent) = settings.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::EncoderInit(format!("Cannot create {:?}: {}", parent, e))
            })?;
        }

        // Fail early on an unwritable destination; FFmpeg overwrites it with -y
        File::create(&settings.path).map_err(|e| {
            PipelineError::EncoderInit(format!("Cannot create {:?}: {}", settings.path, e))
        })?;

        let started = self
            .check_encoder(settings.codec.ffmpeg_encoder())
            .and_then(|()| self.spawn(settings));
        let (process, stdin, stderr_log) = match started {
            Ok(started) => started,
            Err(e) => {
                let _ = std::fs::remove_file(&settings.path);
                return Err(e);
            }
        };

        tracing::info!(
            "Started FFmpeg encoder: {} @ {}fps, {} bps, output: {:?}",
            settings.resolution,
            settings.frame_rate,
            settings.bitrate,
            settings.path
        );

        Ok(Box::new(FfmpegEncoder {
            process,
            stdin: Some(stdin),
            stderr_log,
            path: settings.path.clone(),
            frame_len: settings.frame_len(),
        }))
    }
}

/// FFmpeg child process fed through stdin
struct FfmpegEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    stderr_log: StderrLog,
    path: PathBuf,
    frame_len: usize,
}

impl VideoEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &Frame) -> PipelineResult<()> {
        if frame.data().len() != self.frame_len {
            return Err(PipelineError::Encode(format!(
                "frame is {} bytes, encoder expects {}",
                frame.data().len(),
                self.frame_len
            )));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| PipelineError::Encode("encoder input already closed".to_string()))?;
        stdin
            .write_all(frame.data())
            .map_err(|e| PipelineError::Encode(format!("Failed to write to FFmpeg: {}", e)))
    }

    fn finish(self: Box<Self>) -> PipelineResult<()> {
        let FfmpegEncoder {
            mut process,
            stdin,
            stderr_log,
            path,
            ..
        } = *self;

        // EOF on stdin makes FFmpeg flush and write the trailer
        drop(stdin);

        let status = process
            .wait()
            .map_err(|e| PipelineError::Encode(format!("Failed to wait for FFmpeg: {}", e)))?;
        let stderr = stderr_log
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();

        if !status.success() {
            tracing::warn!("FFmpeg exited with status {}: {}", status, stderr.trim());
            return Err(PipelineError::Encode(format!(
                "FFmpeg exited with status {} while finalizing {:?}",
                status, path
            )));
        }

        tracing::info!("FFmpeg finished: {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{PixelFormat, Resolution};
    use crate::recorder::state::VideoCodec;

    #[test]
    fn test_encoder_listed() {
        let listing = "Encoders:\n V..... = Video\n ------\n V....D mpeg4                MPEG-4 part 2\n V....D mjpeg                MJPEG (Motion JPEG)\n";
        assert!(encoder_listed(listing, "mpeg4"));
        assert!(encoder_listed(listing, "mjpeg"));
        assert!(!encoder_listed(listing, "libx264"));
        assert!(!encoder_listed(listing, "MPEG-4"));
    }

    #[test]
    fn test_ffmpeg_args() {
        let settings = EncoderSettings::new(
            "/tmp/recording_20240101_120000_001.avi",
            Resolution::new(931, 445),
            25,
            1_000_000,
            VideoCodec::Mpeg4,
        );
        let args = ffmpeg_args(&settings).join(" ");
        assert!(args.contains("-pixel_format rgb24"));
        assert!(args.contains("-video_size 930x444"));
        assert!(args.contains("-framerate 25"));
        assert!(args.contains("-c:v mpeg4"));
        assert!(args.contains("-b:v 1000000"));
        assert!(args.ends_with("/tmp/recording_20240101_120000_001.avi"));
    }

    #[test]
    fn test_open_rejects_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let settings = EncoderSettings::new(
            blocker.join("out.avi"),
            Resolution::new(64, 48),
            25,
            1_000_000,
            VideoCodec::Mpeg4,
        );
        let result = FfmpegEncoderFactory::new().open(&settings);
        assert!(matches!(result, Err(PipelineError::EncoderInit(_))));
    }

    #[test]
    fn test_open_reports_missing_ffmpeg() {
        let dir = tempfile::tempdir().unwrap();
        let settings = EncoderSettings::new(
            dir.path().join("out.avi"),
            Resolution::new(64, 48),
            25,
            1_000_000,
            VideoCodec::Mpeg4,
        );
        let factory = FfmpegEncoderFactory::with_program(dir.path().join("no-such-ffmpeg"));
        let result = factory.open(&settings);
        assert!(matches!(result, Err(PipelineError::EncoderInit(_))));
        // The placeholder output is cleaned up
        assert!(!dir.path().join("out.avi").exists());
    }

    /// Shell script standing in for FFmpeg. `on_listing` runs after the
    /// encoder listing is printed, `otherwise` for an encode invocation.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &std::path::Path, on_listing: &str, otherwise: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        let script = format!(
            "#!/bin/sh\ncase \"$*\" in\n  *-encoders*) printf ' V....D mpeg4                MPEG-4 part 2\\n'; {}; exit 0;;\nesac\n{}\n",
            on_listing, otherwise
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_spawn_removes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        // Lists the encoder, then deletes itself so the encoder process cannot start
        let program = fake_ffmpeg(dir.path(), "rm -f -- \"$0\"", "exit 1");
        let output = dir.path().join("recordings").join("out.avi");
        let settings =
            EncoderSettings::new(&output, Resolution::new(64, 48), 25, 1_000_000, VideoCodec::Mpeg4);

        let result = FfmpegEncoderFactory::with_program(program).open(&settings);

        match result {
            Err(PipelineError::EncoderInit(message)) => {
                assert!(message.contains("Failed to start FFmpeg"), "{message}")
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("encoder opened without a program"),
        }
        assert!(!output.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_noisy_stderr_does_not_block_writes() {
        let dir = tempfile::tempdir().unwrap();
        // Fills well past a pipe buffer on stderr before reading any input
        let program = fake_ffmpeg(
            dir.path(),
            "true",
            "head -c 262144 /dev/zero >&2\ncat > /dev/null",
        );
        let settings = EncoderSettings::new(
            dir.path().join("out.avi"),
            Resolution::new(64, 48),
            25,
            1_000_000,
            VideoCodec::Mpeg4,
        );

        let mut encoder = FfmpegEncoderFactory::with_program(program).open(&settings).unwrap();
        for sequence in 0..30 {
            let frame =
                Frame::new(64, 48, PixelFormat::Rgb24, vec![0u8; 64 * 48 * 3], sequence).unwrap();
            encoder.write_frame(&frame).unwrap();
        }
        encoder.finish().unwrap();
    }
}
