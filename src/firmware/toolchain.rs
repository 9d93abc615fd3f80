//! External build tool supervision.
//!
//! The tool is opaque: its exit code, its output lines and the project
//! metadata it reports are the only contract.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

use super::models::BoardType;
use crate::errors::BuildError;

/// Lines of tool output kept for the failure message.
const OUTPUT_TAIL_LINES: usize = 20;

/// One flashable binary and where it goes in flash.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub offset: u64,
    pub path: PathBuf,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Compile the project for `board`. Every output line is sent to `log`.
    async fn build(
        &self,
        project_dir: &Path,
        board: BoardType,
        git_rev: &str,
        log: mpsc::UnboundedSender<String>,
    ) -> Result<(), BuildError>;

    /// Flash layout of the compiled firmware, application image last.
    async fn partitions(&self, project_dir: &Path, board: BoardType)
    -> Result<Vec<Partition>, BuildError>;
}

/// PlatformIO CLI driver.
#[derive(Debug, Clone)]
pub struct PlatformIo {
    program: String,
    prefix_args: Vec<String>,
}

impl PlatformIo {
    /// `command` is split on whitespace: `"platformio"`, `"pio"` or
    /// `"python3 -m platformio"` all work.
    pub fn new(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_else(|| "platformio".to_string());
        Self {
            program,
            prefix_args: parts.collect(),
        }
    }

    fn command(&self, project_dir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .current_dir(project_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for PlatformIo {
    fn default() -> Self {
        Self::new("platformio")
    }
}

fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    })
}

#[async_trait]
impl Toolchain for PlatformIo {
    async fn build(
        &self,
        project_dir: &Path,
        board: BoardType,
        git_rev: &str,
        log: mpsc::UnboundedSender<String>,
    ) -> Result<(), BuildError> {
        let mut cmd = self.command(project_dir);
        cmd.args(["run", "-e", board.as_str()])
            .env("GIT_REV", git_rev)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .map_err(|e| BuildError::io(PathBuf::from(&self.program), e))?;

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, line_tx.clone());
        }
        drop(line_tx);

        let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
        while let Some(line) = line_rx.recv().await {
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line.clone());
            // Receiver gone just means nobody is listening.
            let _ = log.send(line);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| BuildError::io(project_dir, e))?;
        if status.success() {
            Ok(())
        } else {
            Err(BuildError::BuildToolFailed {
                code: status.code(),
                output: Vec::from(tail).join("\n"),
            })
        }
    }

    async fn partitions(
        &self,
        project_dir: &Path,
        board: BoardType,
    ) -> Result<Vec<Partition>, BuildError> {
        let mut cmd = self.command(project_dir);
        cmd.args(["project", "metadata", "--json-output", "-e", board.as_str()]);
        let output = cmd
            .output()
            .await
            .map_err(|e| BuildError::io(PathBuf::from(&self.program), e))?;
        if !output.status.success() {
            return Err(BuildError::MetadataFailed(format!(
                "exit code {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_partitions(&String::from_utf8_lossy(&output.stdout), project_dir, board)
    }
}

// ── Metadata parsing ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Offset {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct FlashImage {
    offset: Offset,
    path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataExtra {
    #[serde(default)]
    flash_images: Vec<FlashImage>,
    #[serde(default)]
    application_offset: Option<Offset>,
}

#[derive(Debug, Deserialize)]
struct EnvMetadata {
    #[serde(default)]
    extra: MetadataExtra,
}

/// Parse a flash offset: `0x`-prefixed hex or decimal.
pub fn parse_offset(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn offset_value(offset: &Offset) -> Result<u64, BuildError> {
    match offset {
        Offset::Number(n) => Ok(*n),
        Offset::Text(s) => {
            parse_offset(s).ok_or_else(|| BuildError::MetadataFailed(format!("bad offset {:?}", s)))
        }
    }
}

/// Turn `project metadata --json-output` output into the partition list:
/// extra flash images in order, then the application binary.
pub fn parse_partitions(
    stdout: &str,
    project_dir: &Path,
    board: BoardType,
) -> Result<Vec<Partition>, BuildError> {
    // The tool may print banner lines before the JSON document.
    let json = stdout
        .find('{')
        .map(|start| &stdout[start..])
        .ok_or_else(|| BuildError::MetadataFailed("no JSON in metadata output".to_string()))?;
    let mut envs: std::collections::HashMap<String, EnvMetadata> = serde_json::from_str(json)
        .map_err(|e| BuildError::MetadataFailed(format!("invalid metadata JSON: {}", e)))?;
    let env = envs.remove(board.as_str()).ok_or_else(|| {
        BuildError::MetadataFailed(format!("no metadata for environment {}", board))
    })?;

    let mut partitions = env
        .extra
        .flash_images
        .iter()
        .map(|image| {
            Ok(Partition {
                offset: offset_value(&image.offset)?,
                path: project_dir.join(&image.path),
            })
        })
        .collect::<Result<Vec<_>, BuildError>>()?;

    let app_offset = match &env.extra.application_offset {
        Some(offset) => offset_value(offset)?,
        None => 0,
    };
    partitions.push(Partition {
        offset: app_offset,
        path: project_dir
            .join(".pio")
            .join("build")
            .join(board.as_str())
            .join("firmware.bin"),
    });
    Ok(partitions)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a shell script standing in for the build tool and return a
    /// driver that runs it.
    pub fn fake_platformio(dir: &Path, script: &str) -> PlatformIo {
        let path = dir.join("fake-pio.sh");
        std::fs::write(&path, script).unwrap();
        PlatformIo::new(&format!("sh {}", path.display()))
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0x1000"), Some(4096));
        assert_eq!(parse_offset("0X10000"), Some(65536));
        assert_eq!(parse_offset("65536"), Some(65536));
        assert_eq!(parse_offset(" 0x8000 "), Some(0x8000));
        assert_eq!(parse_offset("nope"), None);
    }

    #[test]
    fn test_parse_partitions_esp32() {
        let stdout = r#"{"BOARD_WROOM32": {"extra": {
            "flash_images": [
                {"offset": "0x1000", "path": "/root/.platformio/bootloader.bin"},
                {"offset": "0x8000", "path": ".pio/build/BOARD_WROOM32/partitions.bin"}
            ],
            "application_offset": "0x10000"
        }}}"#;
        let dir = Path::new("/tmp/project");
        let parts = parse_partitions(stdout, dir, BoardType::BoardWroom32).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].offset, 0x1000);
        assert_eq!(parts[0].path, PathBuf::from("/root/.platformio/bootloader.bin"));
        assert_eq!(
            parts[1].path,
            PathBuf::from("/tmp/project/.pio/build/BOARD_WROOM32/partitions.bin")
        );
        assert_eq!(parts[2].offset, 0x10000);
        assert_eq!(
            parts[2].path,
            PathBuf::from("/tmp/project/.pio/build/BOARD_WROOM32/firmware.bin")
        );
    }

    #[test]
    fn test_parse_partitions_esp8266_defaults_offset() {
        let stdout = "Processing...\n{\"BOARD_ESP01\": {\"extra\": {}}}";
        let parts = parse_partitions(stdout, Path::new("/p"), BoardType::BoardEsp01).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].offset, 0);
    }

    #[test]
    fn test_parse_partitions_errors() {
        let dir = Path::new("/p");
        assert!(matches!(
            parse_partitions("", dir, BoardType::BoardEsp01),
            Err(BuildError::MetadataFailed(_))
        ));
        assert!(matches!(
            parse_partitions("{\"OTHER\": {}}", dir, BoardType::BoardEsp01),
            Err(BuildError::MetadataFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_build_streams_output_and_passes_git_rev() {
        let tmp = tempfile::tempdir().unwrap();
        let pio = fake_platformio(
            tmp.path(),
            "echo \"building $3 at $GIT_REV\"\necho warning >&2\nexit 0\n",
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        pio.build(tmp.path(), BoardType::BoardWroom32, "abc123", tx)
            .await
            .unwrap();
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.contains(&"building BOARD_WROOM32 at abc123".to_string()));
        assert!(lines.contains(&"warning".to_string()));
    }

    #[tokio::test]
    async fn test_build_failure_carries_exit_code_and_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let pio = fake_platformio(tmp.path(), "echo 'fatal error: Wire.h' >&2\nexit 2\n");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = pio
            .build(tmp.path(), BoardType::BoardEsp01, "v1", tx)
            .await
            .unwrap_err();
        match err {
            BuildError::BuildToolFailed { code, output } => {
                assert_eq!(code, Some(2));
                assert!(output.contains("fatal error: Wire.h"));
            }
            other => panic!("expected BuildToolFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let pio = PlatformIo::new("/definitely/not/a/platformio");
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = pio
            .build(tmp.path(), BoardType::BoardEsp01, "v1", tx)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Io { .. }));
    }

    #[tokio::test]
    async fn test_partitions_from_tool() {
        let tmp = tempfile::tempdir().unwrap();
        let pio = fake_platformio(
            tmp.path(),
            "printf '{\"%s\": {\"extra\": {\"flash_images\": [], \"application_offset\": \"0x0\"}}}' \"$5\"\n",
        );
        let parts = pio
            .partitions(tmp.path(), BoardType::BoardWemosd1mini)
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].path.ends_with(".pio/build/BOARD_WEMOSD1MINI/firmware.bin"));
    }
}
