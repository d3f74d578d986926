//! External scanner programs (clamscan, spamc or any JSON-speaking tool).

use crate::components::{Detector, DetectorOutput};
use crate::context::EmailContext;
use crate::error::DetectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputProtocol {
    /// EmailContext JSON on stdin, DetectorOutput JSON on stdout
    Json,
    /// Raw message on stdin; exit 0 clean, 1 infected
    Clamscan,
    /// Raw message on stdin; `score/threshold` on stdout
    Spamc,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub protocol: OutputProtocol,
}

impl CommandConfig {
    pub fn clamscan() -> Self {
        Self {
            program: "clamscan".to_string(),
            args: vec!["--no-summary".to_string(), "-".to_string()],
            protocol: OutputProtocol::Clamscan,
        }
    }

    pub fn spamc() -> Self {
        Self {
            program: "spamc".to_string(),
            args: vec!["-c".to_string()],
            protocol: OutputProtocol::Spamc,
        }
    }
}

pub struct CommandDetector {
    program: PathBuf,
    args: Vec<String>,
    protocol: OutputProtocol,
}

impl CommandDetector {
    /// Fails with `Unavailable` when the program cannot be found.
    pub fn new(config: &CommandConfig) -> Result<Self, DetectorError> {
        let program = resolve_program(&config.program).ok_or_else(|| {
            DetectorError::Unavailable(format!("{} not found", config.program))
        })?;

        Ok(Self {
            program,
            args: config.args.clone(),
            protocol: config.protocol,
        })
    }

    fn stdin_payload(&self, email: &EmailContext) -> Result<Vec<u8>, DetectorError> {
        match self.protocol {
            OutputProtocol::Json => serde_json::to_vec(email)
                .map_err(|e| DetectorError::Execution(format!("cannot encode email: {e}"))),
            OutputProtocol::Clamscan | OutputProtocol::Spamc => Ok(message_bytes(email)),
        }
    }

    async fn run(&self, payload: Vec<u8>) -> Result<std::process::Output, DetectorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Dropping stdin closes the pipe so the scanner sees EOF
        }

        Ok(child.wait_with_output().await?)
    }
}

#[async_trait]
impl Detector for CommandDetector {
    async fn evaluate(&self, email: &EmailContext) -> Result<DetectorOutput, DetectorError> {
        let payload = self.stdin_payload(email)?;
        let output = self.run(payload).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let code = output.status.code();

        match self.protocol {
            OutputProtocol::Json => {
                if !output.status.success() {
                    return Err(DetectorError::Execution(format!(
                        "{} exited with {}: {}",
                        self.program.display(),
                        output.status,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                serde_json::from_str(&stdout).map_err(|e| DetectorError::Output(e.to_string()))
            }
            OutputProtocol::Clamscan => parse_clamscan(code, &stdout),
            OutputProtocol::Spamc => parse_spamc(&stdout),
        }
    }

    fn describe(&self) -> String {
        format!("{} ({:?})", self.program.display(), self.protocol)
    }
}

/// Raw content when present, otherwise a minimal message rebuilt from fields.
fn message_bytes(email: &EmailContext) -> Vec<u8> {
    if !email.raw_content.is_empty() {
        return email.raw_content.clone().into_bytes();
    }

    let mut message = String::new();
    for (name, value) in &email.headers {
        message.push_str(&format!("{name}: {value}\r\n"));
    }
    if email.header("From").is_none() && !email.sender.is_empty() {
        message.push_str(&format!("From: {}\r\n", email.sender));
    }
    if email.header("Subject").is_none() {
        message.push_str(&format!("Subject: {}\r\n", email.subject));
    }
    message.push_str("\r\n");
    message.push_str(&email.body);
    message.into_bytes()
}

fn parse_clamscan(code: Option<i32>, stdout: &str) -> Result<DetectorOutput, DetectorError> {
    match code {
        Some(0) => Ok(DetectorOutput::clean(0.5).with_finding("scan_result", "clean")),
        Some(1) => {
            let threat = stdout
                .lines()
                .find_map(|line| line.trim().strip_suffix(" FOUND"))
                .and_then(|line| line.rsplit(':').next())
                .map(|name| name.trim().to_string())
                .unwrap_or_else(|| "Unknown".to_string());

            Ok(DetectorOutput::detected(1.0, 0.99)
                .with_finding("scan_result", "infected")
                .with_finding("threat_name", threat.clone())
                .with_category("malware")
                .with_indicators(vec![format!("Malware detected: {threat}")]))
        }
        other => Err(DetectorError::Execution(format!(
            "clamscan failed with exit code {:?}",
            other
        ))),
    }
}

fn parse_spamc(stdout: &str) -> Result<DetectorOutput, DetectorError> {
    let line = stdout.lines().next().unwrap_or("").trim();
    let (score, threshold) = line
        .split_once('/')
        .and_then(|(s, t)| Some((s.trim().parse::<f64>().ok()?, t.trim().parse::<f64>().ok()?)))
        .ok_or_else(|| DetectorError::Output(format!("unexpected spamc output: {line:?}")))?;

    let normalized = (score / 10.0).clamp(0.0, 1.0);
    let mut output = DetectorOutput {
        detected: score >= threshold,
        score: normalized,
        confidence: 0.8,
        ..Default::default()
    }
    .with_finding("spam_score", score)
    .with_finding("threshold", threshold);

    if output.detected {
        output = output
            .with_category("spam")
            .with_indicators(vec![format!("SpamAssassin score {score:.1}/{threshold:.1}")]);
    }
    Ok(output)
}

/// Absolute or relative paths are checked directly; bare names are looked
/// up on `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }

    let path = Path::new(program);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
