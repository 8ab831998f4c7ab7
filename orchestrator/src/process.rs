use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use common::error::AppError;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::command::{build_argv, check_model_allowed, sanitize_prompt, GenerationRequest};
use crate::concurrency::ConcurrencyPool;
use crate::config::OrchestratorConfig;

/// `idle -> spawning -> streaming -> completed | cancelled | failed`. Terminal states are
/// reached exactly once per generation; the concurrency lease is dropped alongside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    Spawning,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// One line of the child's structured stdout stream. The CLI emits one JSON object per line
/// when invoked with `--stream`.
#[derive(Debug, serde::Deserialize)]
struct StreamEvent {
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug)]
enum StreamItem {
    Delta(String),
    Error(AppError),
}

fn io_err(err: std::io::Error) -> AppError {
    AppError::GenerationIo(err.to_string())
}

/// Bridges an external generative CLI, spawned as a child process with a closed flag grammar.
pub struct Orchestrator {
    config: OrchestratorConfig,
    binary_path: PathBuf,
    pool: Arc<ConcurrencyPool>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Self, AppError> {
        let binary_path = which::which(&config.binary).map_err(|err| {
            AppError::GenerationSpawn(format!(
                "binary '{}' not found on PATH: {err}",
                config.binary
            ))
        })?;
        Ok(Self::with_binary_path(config, binary_path))
    }

    /// Constructs an orchestrator pointed at an explicit binary, bypassing PATH resolution.
    /// Used by tests that exec a stub script directly.
    pub fn with_binary_path(config: OrchestratorConfig, binary_path: PathBuf) -> Self {
        let pool = ConcurrencyPool::new(config.global_concurrency, config.user_concurrency);
        Self {
            config,
            binary_path,
            pool,
        }
    }

    /// Starts a streaming generation. The child is spawned and its stdin closed before this
    /// returns; the caller drains `GenerationStream` for deltas.
    pub async fn stream(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationStream, AppError> {
        check_model_allowed(&request.model, &self.config.model_allowlist)?;
        let prompt = sanitize_prompt(&request.prompt)?;

        let lease = self.pool.checkout(&request.user_id).await;

        let argv = build_argv(&self.binary_path, &request, true);
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            AppError::GenerationSpawn(format!("failed to spawn '{}': {err}", self.config.binary))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::GenerationSpawn("child has no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::GenerationSpawn("child has no stdout handle".into()))?;

        stdin.write_all(prompt.as_bytes()).await.map_err(io_err)?;
        drop(stdin);

        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(GenerationState::Spawning));
        let state_task = Arc::clone(&state);
        let idle_timeout = self.config.idle_timeout;
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let _lease = lease;
            let mut reader = BufReader::new(stdout).lines();
            *state_task.lock().await = GenerationState::Streaming;
            let mut outcome = GenerationState::Streaming;

            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => {
                        let _ = child.start_kill();
                        outcome = GenerationState::Cancelled;
                        let _ = tx.send(StreamItem::Error(AppError::Cancelled)).await;
                        break;
                    }
                    line = timeout(idle_timeout, reader.next_line()) => {
                        match line {
                            Ok(Ok(Some(raw_line))) => {
                                if raw_line.trim().is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<StreamEvent>(&raw_line) {
                                    Ok(event) => {
                                        if let Some(message) = event.error {
                                            warn!(error = %message, "generation stream reported an error event");
                                            outcome = GenerationState::Failed;
                                            let _ = tx.send(StreamItem::Error(AppError::GenerationFormat(message))).await;
                                            break;
                                        }
                                        if let Some(text) = event.delta {
                                            if tx.send(StreamItem::Delta(text)).await.is_err() {
                                                let _ = child.start_kill();
                                                outcome = GenerationState::Cancelled;
                                                break;
                                            }
                                        }
                                        if event.done {
                                            outcome = GenerationState::Completed;
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        outcome = GenerationState::Failed;
                                        let _ = tx
                                            .send(StreamItem::Error(AppError::GenerationFormat(format!(
                                                "malformed stream event: {err}"
                                            ))))
                                            .await;
                                        break;
                                    }
                                }
                            }
                            Ok(Ok(None)) => {
                                outcome = GenerationState::Completed;
                                break;
                            }
                            Ok(Err(err)) => {
                                outcome = GenerationState::Failed;
                                let _ = tx.send(StreamItem::Error(io_err(err))).await;
                                break;
                            }
                            Err(_elapsed) => {
                                let _ = child.start_kill();
                                outcome = GenerationState::Failed;
                                let _ = tx.send(StreamItem::Error(AppError::GenerationTimeout)).await;
                                break;
                            }
                        }
                    }
                }
            }

            match outcome {
                GenerationState::Completed => match child.wait().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        outcome = GenerationState::Failed;
                        let _ = tx
                            .send(StreamItem::Error(AppError::GenerationExit(status.code().unwrap_or(-1))))
                            .await;
                    }
                    Err(err) => {
                        outcome = GenerationState::Failed;
                        let _ = tx.send(StreamItem::Error(io_err(err))).await;
                    }
                },
                GenerationState::Cancelled => {
                    let _ = child.wait().await;
                }
                _ => {}
            }

            *state_task.lock().await = outcome;
        });

        Ok(GenerationStream { rx, state, cancel })
    }

    /// Runs a generation in structured-output mode: collects the full stream, strips an
    /// optional Markdown code fence, and parses the result as `T`.
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<T, AppError> {
        let stream = self.stream(request, cancel).await?;
        let collected = stream.collect().await?;
        let stripped = strip_markdown_fence(&collected);
        serde_json::from_str(stripped)
            .map_err(|err| AppError::GenerationFormat(format!("structured output failed to parse: {err}")))
    }
}

/// Strips a single leading/trailing Markdown code fence (with an optional language tag) if
/// present; otherwise returns the trimmed input unchanged.
pub fn strip_markdown_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_lang = body.split_once('\n').map_or(body, |(_, rest)| rest);
    after_lang.strip_suffix("```").unwrap_or(after_lang).trim()
}

/// An in-flight generation. Dropping it cancels the underlying child (idempotently, via the
/// shared `CancellationToken`) if still running.
pub struct GenerationStream {
    rx: mpsc::Receiver<StreamItem>,
    state: Arc<Mutex<GenerationState>>,
    cancel: CancellationToken,
}

impl GenerationStream {
    pub async fn next_delta(&mut self) -> Option<Result<String, AppError>> {
        match self.rx.recv().await {
            Some(StreamItem::Delta(text)) => Some(Ok(text)),
            Some(StreamItem::Error(err)) => Some(Err(err)),
            None => None,
        }
    }

    pub async fn state(&self) -> GenerationState {
        *self.state.lock().await
    }

    /// Cancels the generation. Idempotent; safe to call more than once or after completion.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the stream into one string, used by structured-output mode.
    pub async fn collect(mut self) -> Result<String, AppError> {
        let mut buffer = String::new();
        while let Some(item) = self.next_delta().await {
            buffer.push_str(&item?);
        }
        Ok(buffer)
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::NamedTempFile;

    fn default_config() -> OrchestratorConfig {
        OrchestratorConfig {
            binary: "stub".into(),
            model_allowlist: vec!["default".into()],
            global_concurrency: 2,
            user_concurrency: 2,
            idle_timeout: std::time::Duration::from_secs(2),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            user_id: "user-1".into(),
            model: "default".into(),
            effort: crate::command::Effort::Low,
            verbosity: crate::command::Verbosity::Medium,
            prompt: "hello".into(),
        }
    }

    fn write_stub_script(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp script");
        file.write_all(body.as_bytes()).expect("write script");
        let mut perms = file.as_file().metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        file.as_file().set_permissions(perms).expect("chmod");
        file
    }

    #[tokio::test]
    async fn streams_deltas_in_order_and_completes() {
        let script = write_stub_script(
            "#!/bin/sh\n\
             cat >/dev/null\n\
             echo '{\"delta\":\"hel\"}'\n\
             echo '{\"delta\":\"lo\"}'\n\
             echo '{\"done\":true}'\n",
        );
        let orchestrator = Orchestrator::with_binary_path(default_config(), script.path().to_path_buf());
        let mut stream = orchestrator
            .stream(request(), CancellationToken::new())
            .await
            .expect("start stream");

        let mut text = String::new();
        while let Some(item) = stream.next_delta().await {
            text.push_str(&item.expect("delta"));
        }
        assert_eq!(text, "hello");
        assert_eq!(stream.state().await, GenerationState::Completed);
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_generation_exit_error() {
        let script = write_stub_script(
            "#!/bin/sh\n\
             cat >/dev/null\n\
             echo '{\"done\":true}'\n\
             exit 3\n",
        );
        let orchestrator = Orchestrator::with_binary_path(default_config(), script.path().to_path_buf());
        let mut stream = orchestrator
            .stream(request(), CancellationToken::new())
            .await
            .expect("start stream");

        let mut saw_exit_error = false;
        while let Some(item) = stream.next_delta().await {
            if let Err(AppError::GenerationExit(code)) = item {
                assert_eq!(code, 3);
                saw_exit_error = true;
            }
        }
        assert!(saw_exit_error);
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream_with_cancelled_error() {
        let script = write_stub_script(
            "#!/bin/sh\n\
             cat >/dev/null\n\
             sleep 5\n\
             echo '{\"done\":true}'\n",
        );
        let orchestrator = Orchestrator::with_binary_path(default_config(), script.path().to_path_buf());
        let cancel = CancellationToken::new();
        let mut stream = orchestrator
            .stream(request(), cancel.clone())
            .await
            .expect("start stream");

        cancel.cancel();
        let item = stream.next_delta().await.expect("some item");
        assert!(matches!(item, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn model_outside_allowlist_is_rejected_before_spawn() {
        let orchestrator = Orchestrator::with_binary_path(default_config(), PathBuf::from("/does/not/exist"));
        let mut bad_request = request();
        bad_request.model = "not-allowed".into();
        let result = orchestrator.stream(bad_request, CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn strip_markdown_fence_removes_language_tagged_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_markdown_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn strip_markdown_fence_passes_through_plain_json() {
        let raw = "  {\"a\":1}  ";
        assert_eq!(strip_markdown_fence(raw), "{\"a\":1}");
    }
}
