//! Declarative case kinds: container exec, host command, TCP exchange.

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::definition::{CommandCase, ExecCase, Subscriber, TcpCase};
use super::{substitute, CaseContext, CaseError, TestCase};
use crate::process::{run_process, ProcessOutput, ProcessSpec};

fn check_output(
    what: &str,
    output: &ProcessOutput,
    expect_exit: i32,
    expect_stdout: Option<&str>,
) -> Result<(), CaseError> {
    if output.exit_code != expect_exit {
        return Err(CaseError::assertion(format!(
            "`{what}` exited with {} (expected {expect_exit}): {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }
    if let Some(expected) = expect_stdout {
        if !output.stdout.contains(expected) {
            return Err(CaseError::assertion(format!(
                "`{what}` stdout does not contain {expected:?}: {:?}",
                output.stdout.trim()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// exec
// ---------------------------------------------------------------------------

/// Run a command inside the container under test.
pub struct ExecTestCase {
    id: String,
    spec: ExecCase,
}

impl ExecTestCase {
    pub fn new(id: impl Into<String>, spec: ExecCase) -> Self {
        Self { id: id.into(), spec }
    }
}

#[async_trait]
impl TestCase for ExecTestCase {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn run(&self, ctx: &CaseContext<'_>) -> Result<(), CaseError> {
        let output = ctx.runtime.exec(ctx.container, &self.spec.command).await?;
        check_output(
            &self.spec.command.join(" "),
            &output,
            self.spec.expect_exit,
            self.spec.expect_stdout.as_deref(),
        )
    }
}

// ---------------------------------------------------------------------------
// command
// ---------------------------------------------------------------------------

/// Run a host command that talks to the container under test.
pub struct CommandTestCase {
    id: String,
    spec: CommandCase,
}

impl CommandTestCase {
    pub fn new(id: impl Into<String>, spec: CommandCase) -> Self {
        Self { id: id.into(), spec }
    }

    fn process(&self, ctx: &CaseContext<'_>) -> Result<ProcessSpec, CaseError> {
        let words: Vec<String> = self
            .spec
            .command
            .iter()
            .map(|word| substitute(word, ctx.identity, &ctx.container.name, ctx.workload_dir))
            .collect();
        let (program, args) = words
            .split_first()
            .ok_or_else(|| CaseError::assertion("empty command"))?;

        let timeout = (self.spec.timeout_secs > 0).then(|| Duration::from_secs(self.spec.timeout_secs));
        Ok(ProcessSpec::new(program.clone())
            .args(args.iter().cloned())
            .env("DEBLOAT_IMAGE", ctx.identity.as_str())
            .env("DEBLOAT_CONTAINER", ctx.container.name.clone())
            .env("DEBLOAT_WORKLOAD_DIR", ctx.workload_dir.display().to_string())
            .timeout(timeout))
    }
}

#[async_trait]
impl TestCase for CommandTestCase {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn run(&self, ctx: &CaseContext<'_>) -> Result<(), CaseError> {
        let spec = self.process(ctx)?;
        let output = run_process(&spec).await?;
        check_output(
            &spec.display(),
            &output,
            self.spec.expect_exit,
            self.spec.expect_stdout.as_deref(),
        )
    }
}

// ---------------------------------------------------------------------------
// tcp
// ---------------------------------------------------------------------------

/// Ordered request/response exchanges against a service in the container,
/// optionally with a background subscriber on a second connection.
pub struct TcpTestCase {
    id: String,
    spec: TcpCase,
}

impl TcpTestCase {
    pub fn new(id: impl Into<String>, spec: TcpCase) -> Self {
        Self { id: id.into(), spec }
    }

    fn limit(&self) -> Duration {
        Duration::from_millis(self.spec.timeout_ms)
    }
}

/// Aborts the subscriber when the case returns early.
struct SubscriberTask(JoinHandle<Result<(), CaseError>>);

impl Drop for SubscriberTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl TestCase for TcpTestCase {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn run(&self, _ctx: &CaseContext<'_>) -> Result<(), CaseError> {
        let limit = self.limit();

        let subscriber = match &self.spec.subscriber {
            Some(sub) => {
                let (ready_tx, ready_rx) = oneshot::channel();
                let task = tokio::spawn(listen(self.spec.address.clone(), sub.clone(), limit, ready_tx));
                match ready_rx.await {
                    Ok(()) => Some(SubscriberTask(task)),
                    // Setup failed before the ack; surface the task's error.
                    Err(_) => return task.await.context("subscriber task panicked")?,
                }
            }
            None => None,
        };

        let mut stream = connect(&self.spec.address, limit).await?;
        let mut pending = Vec::new();
        for exchange in &self.spec.exchanges {
            if exchange.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(exchange.delay_ms)).await;
            }
            stream
                .write_all(exchange.send.as_bytes())
                .await
                .with_context(|| format!("write to {} failed", self.spec.address))?;
            if let Some(expected) = &exchange.expect {
                let received = read_until(&mut stream, &mut pending, expected, limit).await?;
                debug!(case = %self.id, received = %received.trim(), "exchange matched");
            }
        }

        if let Some(mut task) = subscriber {
            match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined.context("subscriber task panicked")??,
                Err(_) => {
                    return Err(CaseError::assertion(format!(
                        "subscriber did not finish within {}ms",
                        limit.as_millis()
                    )))
                }
            }
        }
        Ok(())
    }
}

async fn connect(address: &str, limit: Duration) -> Result<TcpStream, CaseError> {
    match tokio::time::timeout(limit, TcpStream::connect(address)).await {
        Ok(stream) => Ok(stream.with_context(|| format!("connect to {address} failed"))?),
        Err(_) => Err(anyhow::anyhow!("connect to {address} timed out after {}ms", limit.as_millis()).into()),
    }
}

async fn listen(
    address: String,
    sub: Subscriber,
    limit: Duration,
    ready: oneshot::Sender<()>,
) -> Result<(), CaseError> {
    let mut stream = connect(&address, limit).await?;
    let mut pending = Vec::new();
    stream
        .write_all(sub.send.as_bytes())
        .await
        .with_context(|| format!("subscriber write to {address} failed"))?;
    if let Some(ack) = &sub.ack {
        read_until(&mut stream, &mut pending, ack, limit).await?;
    }
    let _ = ready.send(());
    read_until(&mut stream, &mut pending, &sub.expect, limit).await?;
    Ok(())
}

/// Read from `stream` until `needle` appears, consuming through the match.
/// Bytes after the match stay in `pending` for the next expectation.
async fn read_until(
    stream: &mut TcpStream,
    pending: &mut Vec<u8>,
    needle: &str,
    limit: Duration,
) -> Result<String, CaseError> {
    let deadline = Instant::now() + limit;
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(at) = find(pending, needle.as_bytes()) {
            let consumed: Vec<u8> = pending.drain(..at + needle.len()).collect();
            return Ok(String::from_utf8_lossy(&consumed).into_owned());
        }
        let read = match tokio::time::timeout_at(deadline, stream.read(&mut chunk)).await {
            Ok(read) => read.context("read failed")?,
            Err(_) => {
                return Err(CaseError::assertion(format!(
                    "expected {needle:?} within {}ms, received {:?}",
                    limit.as_millis(),
                    String::from_utf8_lossy(pending)
                )))
            }
        };
        if read == 0 {
            return Err(CaseError::assertion(format!(
                "connection closed before {needle:?}, received {:?}",
                String::from_utf8_lossy(pending)
            )));
        }
        pending.extend_from_slice(&chunk[..read]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}
