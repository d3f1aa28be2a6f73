use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    process::Output,
    time::Duration,
};
use tracing::{debug, info, warn};

/// Slow, optional media analysis used when sidecar data is missing.
///
/// Every failure (tool absent, launch error, timeout, unparseable output)
/// is reported as `None` and never raised.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn duration(&self, path: &Path) -> Option<f64>;
    async fn has_audio(&self, path: &Path) -> Option<bool>;
}

/// Probe that never knows anything, used when probing is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProbe;

#[async_trait]
impl Probe for NullProbe {
    async fn duration(&self, _path: &Path) -> Option<f64> {
        None
    }

    async fn has_audio(&self, _path: &Path) -> Option<bool> {
        None
    }
}

/// Probe returning canned answers, for tests and offline runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedProbe {
    pub duration: Option<f64>,
    pub has_audio: Option<bool>,
}

#[async_trait]
impl Probe for FixedProbe {
    async fn duration(&self, _path: &Path) -> Option<f64> {
        self.duration
    }

    async fn has_audio(&self, _path: &Path) -> Option<bool> {
        self.has_audio
    }
}

const LOCAL_CANDIDATES: &[&str] = &["./ffprobe.exe", "./ffprobe"];

pub struct FfprobeProbe {
    configured: Option<PathBuf>,
    timeout: Duration,
    audio_timeout: Duration,
    executable: OnceCell<Option<PathBuf>>,
}

impl FfprobeProbe {
    pub fn new(configured: Option<PathBuf>, timeout: Duration, audio_timeout: Duration) -> Self {
        Self {
            configured,
            timeout,
            audio_timeout,
            executable: OnceCell::new(),
        }
    }

    pub fn from_config(config: &crate::ProbeConfig) -> Self {
        Self::new(
            config.executable.clone(),
            Duration::from_secs(config.timeout_seconds),
            Duration::from_secs(config.audio_timeout_seconds),
        )
    }

    /// Resolved once; a missing tool stays missing for the life of this probe.
    fn executable(&self) -> Option<&Path> {
        self.executable
            .get_or_init(|| {
                let found = locate_ffprobe(self.configured.as_deref());
                match &found {
                    Some(path) => info!("Using ffprobe at {:?}", path),
                    None => warn!("ffprobe not found, duration and audio probing disabled"),
                }
                found
            })
            .as_deref()
    }

    async fn run<I, S>(&self, path: &Path, args: I, timeout: Duration) -> Option<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let executable = self.executable()?;

        let child = tokio::process::Command::new(executable)
            .args(args)
            .arg(path)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) if output.status.success() => Some(output),
            Ok(Ok(output)) => {
                debug!(
                    "ffprobe exited with {} for {:?}: {}",
                    output.status,
                    path,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Ok(Err(e)) => {
                warn!("Failed to launch ffprobe for {:?}: {}", path, e);
                None
            }
            Err(_) => {
                warn!("ffprobe timed out after {:?} for {:?}", timeout, path);
                None
            }
        }
    }
}

fn locate_ffprobe(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("Configured ffprobe {:?} does not exist", path);
        return None;
    }

    which::which("ffprobe")
        .or_else(|_| which::which("ffprobe.exe"))
        .ok()
        .or_else(|| {
            LOCAL_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file())
        })
}

#[async_trait]
impl Probe for FfprobeProbe {
    async fn duration(&self, path: &Path) -> Option<f64> {
        if let Some(output) = self
            .run(
                path,
                ["-v", "error", "-show_entries", "format=duration", "-of", "json"],
                self.timeout,
            )
            .await
            && let Some(seconds) = parse_format_duration(&output.stdout)
        {
            return Some(seconds);
        }

        let output = self
            .run(
                path,
                [
                    "-v",
                    "error",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=duration",
                    "-of",
                    "json",
                ],
                self.timeout,
            )
            .await?;
        parse_stream_duration(&output.stdout)
    }

    async fn has_audio(&self, path: &Path) -> Option<bool> {
        let output = self
            .run(
                path,
                [
                    "-v",
                    "error",
                    "-select_streams",
                    "a",
                    "-show_entries",
                    "stream=codec_type",
                    "-of",
                    "csv=p=0",
                ],
                self.audio_timeout,
            )
            .await?;
        Some(parse_audio_streams(&output.stdout))
    }
}

fn positive_seconds(value: Option<&Value>) -> Option<f64> {
    let seconds = match value? {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (seconds > 0.0 && seconds.is_finite()).then_some(seconds)
}

fn parse_format_duration(stdout: &[u8]) -> Option<f64> {
    let json: Value = serde_json::from_slice(stdout).ok()?;
    positive_seconds(json.get("format")?.get("duration"))
}

fn parse_stream_duration(stdout: &[u8]) -> Option<f64> {
    let json: Value = serde_json::from_slice(stdout).ok()?;
    positive_seconds(json.get("streams")?.get(0)?.get("duration"))
}

fn parse_audio_streams(stdout: &[u8]) -> bool {
    String::from_utf8_lossy(stdout)
        .lines()
        .any(|line| !line.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format_duration() {
        assert_eq!(
            parse_format_duration(br#"{"format": {"duration": "12.500000"}}"#),
            Some(12.5)
        );
        assert_eq!(parse_format_duration(br#"{"format": {}}"#), None);
        assert_eq!(
            parse_format_duration(br#"{"format": {"duration": "N/A"}}"#),
            None
        );
        assert_eq!(parse_format_duration(b"garbage"), None);
    }

    #[test]
    fn test_parse_stream_duration() {
        assert_eq!(
            parse_stream_duration(br#"{"streams": [{"duration": "3.25"}]}"#),
            Some(3.25)
        );
        assert_eq!(parse_stream_duration(br#"{"streams": []}"#), None);
    }

    #[test]
    fn test_parse_audio_streams() {
        assert!(parse_audio_streams(b"audio\n"));
        assert!(parse_audio_streams(b"audio\naudio\n"));
        assert!(!parse_audio_streams(b""));
        assert!(!parse_audio_streams(b"\n  \n"));
    }

    #[tokio::test]
    async fn test_missing_configured_executable_is_unknown() {
        let probe = FfprobeProbe::new(
            Some(PathBuf::from("/nonexistent/bin/ffprobe")),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let target = Path::new("clip.mp4");
        assert_eq!(probe.duration(target).await, None);
        assert_eq!(probe.has_audio(target).await, None);
        assert!(probe.executable().is_none());
    }

    #[cfg(unix)]
    fn fake_ffprobe(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("ffprobe");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duration_falls_back_to_first_video_stream() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = fake_ffprobe(
            temp_dir.path(),
            r#"case "$*" in
  *format=duration*) exit 1 ;;
  *v:0*) echo '{"streams":[{"duration":"4.5"}]}' ;;
  *"-select_streams a "*) echo audio ;;
esac"#,
        );
        let probe = FfprobeProbe::new(Some(script), Duration::from_secs(5), Duration::from_secs(5));

        let target = temp_dir.path().join("clip.mp4");
        assert_eq!(probe.duration(&target).await, Some(4.5));
        assert_eq!(probe.has_audio(&target).await, Some(true));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_executable_is_unknown() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = fake_ffprobe(temp_dir.path(), "echo broken >&2\nexit 1");
        let probe = FfprobeProbe::new(Some(script), Duration::from_secs(5), Duration::from_secs(5));

        let target = temp_dir.path().join("clip.mp4");
        assert_eq!(probe.duration(&target).await, None);
        assert_eq!(probe.has_audio(&target).await, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_executable_times_out_as_unknown() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let script = fake_ffprobe(temp_dir.path(), "exec sleep 5");
        let probe = FfprobeProbe::new(Some(script), Duration::from_secs(1), Duration::from_secs(1));

        let target = temp_dir.path().join("clip.mp4");
        let started = std::time::Instant::now();
        assert_eq!(probe.duration(&target).await, None);
        assert_eq!(probe.has_audio(&target).await, None);
        // Two duration queries plus one audio query, each cut off at one second.
        assert!(started.elapsed() < Duration::from_millis(4500));
    }

    #[tokio::test]
    async fn test_fixed_probe_answers() {
        let probe = FixedProbe {
            duration: Some(42.0),
            has_audio: Some(true),
        };
        assert_eq!(probe.duration(Path::new("x")).await, Some(42.0));
        assert_eq!(probe.has_audio(Path::new("x")).await, Some(true));
        assert_eq!(NullProbe.duration(Path::new("x")).await, None);
    }
}
