use super::recorder::{AudioDevice, CaptureStream, RecorderError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// How long a freshly spawned recorder gets to fail on a missing or locked device.
const STARTUP_GRACE: Duration = Duration::from_millis(400);

const READ_CHUNK: usize = 4096;

/// Captures the default microphone by running `ffmpeg` and reading the
/// encoded stream from its stdout.
pub struct FfmpegDevice {
    program: String,
    input_format: String,
    input_device: String,
    encoders: OnceCell<String>,
}

impl FfmpegDevice {
    pub fn new(
        program: impl Into<String>,
        input_format: impl Into<String>,
        input_device: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            input_format: input_format.into(),
            input_device: input_device.into(),
            encoders: OnceCell::new(),
        }
    }

    /// Encoder name and muxer arguments for a container type.
    fn codec_args(mime_type: &str) -> Option<(&'static str, &'static [&'static str])> {
        match mime_type {
            "audio/ogg" => Some(("libopus", &["-f", "ogg"][..])),
            "audio/webm" => Some(("libopus", &["-f", "webm"][..])),
            "audio/mp4" => Some(("aac", &["-f", "mp4", "-movflags", "frag_keyframe+empty_moov"][..])),
            "audio/aac" => Some(("aac", &["-f", "adts"][..])),
            _ => None,
        }
    }

    async fn encoders(&self) -> &str {
        self.encoders
            .get_or_init(|| async {
                match Command::new(&self.program)
                    .args(["-hide_banner", "-encoders"])
                    .stdin(Stdio::null())
                    .stderr(Stdio::null())
                    .output()
                    .await
                {
                    Ok(output) => String::from_utf8_lossy(&output.stdout).into_owned(),
                    Err(e) => {
                        debug!("could not list {} encoders: {}", self.program, e);
                        String::new()
                    }
                }
            })
            .await
    }

    fn capture_args(&self, encoder: &str, muxer: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            self.input_format.as_str(),
            "-i",
            self.input_device.as_str(),
            "-ac",
            "1",
            "-c:a",
            encoder,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.extend(muxer.iter().map(|s| s.to_string()));
        args.push("pipe:1".to_string());
        args
    }
}

/// Whether `encoder` appears in the name column of `ffmpeg -encoders` output.
fn lists_encoder(listing: &str, encoder: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == encoder)
}

fn find_program(program: &str) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{program}.exe"));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

/// Maps recorder stderr after an early exit onto a user-facing error.
fn classify_failure(stderr: &str) -> RecorderError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("permission denied") || lower.contains("not authorized") {
        RecorderError::PermissionDenied
    } else if lower.contains("no such file or directory")
        || lower.contains("no such device")
        || lower.contains("cannot open audio device")
        || lower.contains("device or resource busy")
        || lower.contains("no default audio device")
    {
        RecorderError::NoDevice
    } else {
        RecorderError::Device(stderr.trim().to_string())
    }
}

#[async_trait]
impl AudioDevice for FfmpegDevice {
    fn recorder_available(&self) -> bool {
        find_program(&self.program).is_some()
    }

    async fn is_type_supported(&self, mime_type: &str) -> bool {
        match Self::codec_args(mime_type) {
            Some((encoder, _)) => lists_encoder(self.encoders().await, encoder),
            None => false,
        }
    }

    async fn open(&self, mime_type: &str) -> Result<Box<dyn CaptureStream>, RecorderError> {
        let (encoder, muxer) =
            Self::codec_args(mime_type).ok_or(RecorderError::NoSupportedFormat)?;
        let args = self.capture_args(encoder, muxer);
        debug!("{} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => RecorderError::Unsupported,
                std::io::ErrorKind::PermissionDenied => RecorderError::PermissionDenied,
                _ => RecorderError::Device(e.to_string()),
            })?;

        if let Ok(status) = tokio::time::timeout(STARTUP_GRACE, child.wait()).await {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            warn!("recorder exited during startup ({:?}): {}", status, stderr.trim());
            return Err(classify_failure(&stderr));
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RecorderError::Device("recorder stdout unavailable".to_string()))?;
        let stdin = child.stdin.take();
        Ok(Box::new(FfmpegStream {
            child,
            stdout,
            stdin,
            released: false,
        }))
    }
}

struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stdin: Option<ChildStdin>,
    released: bool,
}

#[async_trait]
impl CaptureStream for FfmpegStream {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; READ_CHUNK];
        match self.stdout.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(e) => {
                warn!("recorder read failed: {}", e);
                None
            }
        }
    }

    async fn finish(&mut self) {
        // ffmpeg finalises the container and exits on `q`.
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("recorder stdin closed early: {}", e);
            }
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.child.start_kill() {
            debug!("recorder already gone: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
Encoders:
 V..... = Video
 ------
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus
 A....D pcm_s16le            PCM signed 16-bit little-endian
";

    #[test]
    fn test_lists_encoder() {
        assert!(lists_encoder(LISTING, "libopus"));
        assert!(lists_encoder(LISTING, "aac"));
        assert!(!lists_encoder(LISTING, "opus"));
        assert!(!lists_encoder(LISTING, "libvorbis"));
    }

    #[test]
    fn test_codec_args_cover_preferred_types() {
        for mime in crate::audio::recorder::PREFERRED_MIME_TYPES {
            assert!(FfmpegDevice::codec_args(mime).is_some(), "{mime}");
        }
        assert!(FfmpegDevice::codec_args("audio/wav").is_none());
    }

    #[test]
    fn test_capture_args() {
        let device = FfmpegDevice::new("ffmpeg", "pulse", "default");
        let (encoder, muxer) = FfmpegDevice::codec_args("audio/ogg").unwrap();
        let args = device.capture_args(encoder, muxer);
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-f", "pulse", "-i", "default", "-ac",
                "1", "-c:a", "libopus", "-f", "ogg", "pipe:1"
            ]
        );
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("[alsa] cannot open audio device default (Permission denied)"),
            RecorderError::PermissionDenied
        );
        assert_eq!(
            classify_failure("default: No such file or directory"),
            RecorderError::NoDevice
        );
        assert!(matches!(
            classify_failure("Unknown input format: 'nope'"),
            RecorderError::Device(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let device = FfmpegDevice::new("/definitely/not/here/ffmpeg", "pulse", "default");
        assert!(!device.recorder_available());
        assert!(!device.is_type_supported("audio/ogg").await);
    }
}
