//! Settling: wait for asynchronous external side effects to converge.
//!
//! The tool restarts the container daemon and loads images in the
//! background, and freshly started containers need time before they accept
//! connections. Instead of fixed sleeps, [`settle`] polls a
//! [`ReadinessProbe`] until it reports ready or the policy's timeout
//! elapses. Without a probe it falls back to a fixed delay.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

use crate::domain::{CollaboratorError, SettleConfig};
use crate::runtime::{ContainerHandle, ContainerRuntime};

/// Bounded polling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub timeout: Duration,
    pub interval: Duration,
    pub fallback_delay: Duration,
}

impl From<&SettleConfig> for ReadinessPolicy {
    fn from(config: &SettleConfig) -> Self {
        Self {
            timeout: config.timeout(),
            interval: config.poll_interval(),
            fallback_delay: config.fallback_delay(),
        }
    }
}

/// Something that can tell whether an external side effect has converged.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Name used in logs and timeout errors.
    fn target(&self) -> String;

    /// One probe attempt. Errors count as "not ready yet".
    async fn check(&self) -> bool;
}

/// Poll `probe` until ready, or sleep the fallback delay when there is none.
pub async fn settle(
    probe: Option<&dyn ReadinessProbe>,
    policy: &ReadinessPolicy,
) -> Result<(), CollaboratorError> {
    let Some(probe) = probe else {
        debug!(delay_ms = policy.fallback_delay.as_millis() as u64, "no readiness probe, sleeping");
        tokio::time::sleep(policy.fallback_delay).await;
        return Ok(());
    };

    let target = probe.target();
    let start = Instant::now();
    let deadline = start + policy.timeout;
    let timed_out = |target: String| CollaboratorError::ReadinessTimeout {
        target,
        timeout_ms: policy.timeout.as_millis() as u64,
    };

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        // The deadline bounds each attempt, not just the gaps between them.
        match timeout_at(deadline, probe.check()).await {
            Ok(true) => {
                info!(target = %target, attempts, elapsed_ms = start.elapsed().as_millis() as u64, "ready");
                return Ok(());
            }
            Ok(false) => {}
            Err(_) => return Err(timed_out(target)),
        }
        if Instant::now() + policy.interval > deadline {
            return Err(timed_out(target));
        }
        debug!(target = %target, attempts, "not ready yet");
        tokio::time::sleep(policy.interval).await;
    }
}

/// Ready once the runtime daemon answers.
pub struct DaemonProbe<'a> {
    pub runtime: &'a dyn ContainerRuntime,
}

#[async_trait]
impl<'a> ReadinessProbe for DaemonProbe<'a> {
    fn target(&self) -> String {
        "container runtime daemon".to_string()
    }

    async fn check(&self) -> bool {
        self.runtime.ping().await.is_ok()
    }
}

/// Ready once a TCP connection to `address` succeeds.
pub struct TcpProbe {
    pub address: String,
    pub connect_timeout: Duration,
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    fn target(&self) -> String {
        format!("tcp {}", self.address)
    }

    async fn check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        )
    }
}

/// Ready once a command exits 0 inside the container.
pub struct ExecProbe<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub handle: ContainerHandle,
    pub command: Vec<String>,
}

#[async_trait]
impl<'a> ReadinessProbe for ExecProbe<'a> {
    fn target(&self) -> String {
        format!("exec `{}` in {}", self.command.join(" "), self.handle.name)
    }

    async fn check(&self) -> bool {
        matches!(
            self.runtime.exec(&self.handle, &self.command).await,
            Ok(output) if output.success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    struct CountingProbe {
        ready_after: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ReadinessProbe for CountingProbe {
        fn target(&self) -> String {
            "counter".to_string()
        }

        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::Relaxed) + 1 >= self.ready_after
        }
    }

    fn policy(timeout_ms: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_millis(timeout_ms),
            interval: Duration::from_millis(10),
            fallback_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_settle_polls_until_ready() {
        let probe = CountingProbe {
            ready_after: 3,
            calls: AtomicU32::new(0),
        };
        settle(Some(&probe), &policy(5_000)).await.expect("ready");
        assert_eq!(probe.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_settle_times_out_deterministically() {
        let probe = CountingProbe {
            ready_after: u32::MAX,
            calls: AtomicU32::new(0),
        };
        let err = settle(Some(&probe), &policy(50)).await.unwrap_err();
        match err {
            CollaboratorError::ReadinessTimeout { target, timeout_ms } => {
                assert_eq!(target, "counter");
                assert_eq!(timeout_ms, 50);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(probe.calls.load(Ordering::Relaxed) >= 1);
    }

    struct HangingProbe;

    #[async_trait]
    impl ReadinessProbe for HangingProbe {
        fn target(&self) -> String {
            "hanging".to_string()
        }

        async fn check(&self) -> bool {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            true
        }
    }

    #[tokio::test]
    async fn test_settle_bounds_a_hanging_attempt() {
        let settled = tokio::time::timeout(
            Duration::from_secs(2),
            settle(Some(&HangingProbe), &policy(100)),
        )
        .await
        .expect("settle must return within its own timeout");
        match settled {
            Err(CollaboratorError::ReadinessTimeout { target, timeout_ms }) => {
                assert_eq!(target, "hanging");
                assert_eq!(timeout_ms, 100);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_without_probe_sleeps_fallback() {
        let start = tokio::time::Instant::now();
        settle(None, &policy(50)).await.expect("fallback");
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_policy_from_settle_config() {
        let policy = ReadinessPolicy::from(&SettleConfig::default());
        assert_eq!(policy.timeout, Duration::from_secs(60));
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.fallback_delay, Duration::from_millis(3_000));
    }

    #[tokio::test]
    async fn test_tcp_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        let probe = TcpProbe {
            address,
            connect_timeout: Duration::from_millis(500),
        };
        assert!(probe.check().await);

        drop(listener);
        assert!(!probe.check().await);
    }
}
