//! Live log following
//!
//! Runs an external follow process (`tail -F` by default) and forwards its
//! output lines over a bounded channel. Stopping is cooperative: the
//! producer task closes the pipe, waits out a grace period for the process
//! to exit, then kills it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum FollowError {
    #[error("failed to start follow command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("follow command has no stdout")]
    NoStdout,
}

#[derive(Debug, Clone)]
pub struct FollowConfig {
    /// Replay the existing file content before following
    pub from_start: bool,
    /// Time the follow process gets to exit before it is killed
    pub grace_period: Duration,
    /// Capacity of the line channel
    pub channel_capacity: usize,
    /// Program and arguments replacing the default `tail` invocation;
    /// the log path is appended as the last argument
    pub command: Option<Vec<String>>,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            from_start: false,
            grace_period: DEFAULT_GRACE_PERIOD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            command: None,
        }
    }
}

/// How the follow process finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowExit {
    /// Stopped on request
    Stopped,
    /// The process closed its output on its own
    Ended,
}

/// Follows one log file; each [`LogFollower::follow`] call starts a fresh process
pub struct LogFollower {
    path: PathBuf,
    config: FollowConfig,
}

impl LogFollower {
    pub fn new(path: impl Into<PathBuf>, config: FollowConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }

    fn command_line(&self) -> Vec<String> {
        let mut args = match &self.config.command {
            Some(command) => command.clone(),
            None if self.config.from_start => {
                vec!["tail".into(), "-F".into(), "-n".into(), "+1".into()]
            }
            None => vec!["tail".into(), "-F".into(), "-n".into(), "0".into()],
        };
        args.push(self.path.display().to_string());
        args
    }

    /// Start following and return a handle yielding raw lines
    pub fn follow(&self) -> Result<FollowHandle, FollowError> {
        let args = self.command_line();
        let (program, rest) = args.split_first().ok_or_else(|| FollowError::Spawn {
            program: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

        info!(command = %args.join(" "), "Starting log follower");

        let mut child = Command::new(program)
            .args(rest)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FollowError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(FollowError::NoStdout)?;
        let (line_tx, line_rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (stop_tx, stop_rx) = watch::channel(false);
        let grace_period = self.config.grace_period;

        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let exit = produce(&mut lines, &line_tx, stop_rx).await;
            drop(lines);
            terminate(child, grace_period).await;
            exit
        });

        Ok(FollowHandle {
            lines: line_rx,
            stop_tx,
            task: Some(task),
        })
    }
}

async fn produce<R>(
    lines: &mut tokio::io::Lines<R>,
    line_tx: &mpsc::Sender<String>,
    mut stop_rx: watch::Receiver<bool>,
) -> FollowExit
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => {
                debug!("Log follower received stop signal");
                return FollowExit::Stopped;
            }
            next = lines.next_line() => match next {
                Ok(Some(line)) => {
                    // Consumer blocks the producer while it flushes.
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => return FollowExit::Stopped,
                        sent = line_tx.send(line) => {
                            if sent.is_err() {
                                return FollowExit::Stopped;
                            }
                        }
                    }
                }
                Ok(None) => {
                    warn!("Follow process closed its output");
                    return FollowExit::Ended;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from follow process");
                    return FollowExit::Ended;
                }
            }
        }
    }
}

async fn terminate(mut child: Child, grace_period: Duration) {
    match timeout(grace_period, child.wait()).await {
        Ok(Ok(status)) => debug!(%status, "Follow process exited"),
        Ok(Err(e)) => warn!(error = %e, "Failed to wait for follow process"),
        Err(_) => {
            debug!("Follow process still running after grace period, killing");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill follow process");
            }
        }
    }
}

/// Live sequence of raw lines from a follow process
pub struct FollowHandle {
    lines: mpsc::Receiver<String>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<FollowExit>>,
}

impl FollowHandle {
    /// Next raw line, or `None` once the follow process has ended or been stopped
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Stop following and wait for the process to be reaped
    pub async fn stop(&mut self) -> FollowExit {
        let _ = self.stop_tx.send(true);
        self.lines.close();

        let Some(task) = self.task.take() else {
            return FollowExit::Stopped;
        };
        match task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "Log follower task failed");
                FollowExit::Stopped
            }
        }
    }
}

impl Drop for FollowHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Instant;

    fn log_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_sequence_ends_when_process_exits() {
        let file = log_file(&["one", "two"]);
        let follower = LogFollower::new(
            file.path(),
            FollowConfig {
                command: Some(vec!["cat".to_string()]),
                ..Default::default()
            },
        );

        let mut handle = follower.follow().unwrap();
        assert_eq!(handle.next_line().await.as_deref(), Some("one"));
        assert_eq!(handle.next_line().await.as_deref(), Some("two"));
        assert_eq!(handle.next_line().await, None);
        assert_eq!(handle.stop().await, FollowExit::Ended);
    }

    #[tokio::test]
    async fn test_follows_appended_lines_and_stops() {
        let mut file = log_file(&["existing"]);
        let follower = LogFollower::new(
            file.path(),
            FollowConfig {
                from_start: true,
                ..Default::default()
            },
        );

        let mut handle = follower.follow().unwrap();
        assert_eq!(handle.next_line().await.as_deref(), Some("existing"));

        writeln!(file, "appended").unwrap();
        file.flush().unwrap();
        let next = timeout(Duration::from_secs(10), handle.next_line())
            .await
            .unwrap();
        assert_eq!(next.as_deref(), Some("appended"));

        let started = Instant::now();
        assert_eq!(handle.stop().await, FollowExit::Stopped);
        assert!(started.elapsed() < DEFAULT_GRACE_PERIOD + Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_each_follow_starts_fresh() {
        let file = log_file(&["a"]);
        let follower = LogFollower::new(
            file.path(),
            FollowConfig {
                command: Some(vec!["cat".to_string()]),
                ..Default::default()
            },
        );

        for _ in 0..2 {
            let mut handle = follower.follow().unwrap();
            assert_eq!(handle.next_line().await.as_deref(), Some("a"));
            assert_eq!(handle.next_line().await, None);
        }
    }

    #[tokio::test]
    async fn test_stubborn_process_killed_after_grace_period() {
        let grace_period = Duration::from_millis(300);
        let follower = LogFollower::new(
            "/dev/null",
            FollowConfig {
                grace_period,
                command: Some(vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    "trap '' PIPE TERM; sleep 30".to_string(),
                ]),
                ..Default::default()
            },
        );

        let mut handle = follower.follow().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        assert_eq!(handle.stop().await, FollowExit::Stopped);
        let elapsed = started.elapsed();
        assert!(elapsed >= grace_period, "stopped after {elapsed:?}");
        assert!(elapsed < grace_period + Duration::from_secs(5), "stopped after {elapsed:?}");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let follower = LogFollower::new(
            "/dev/null",
            FollowConfig {
                command: Some(vec!["/nonexistent/follow-binary".to_string()]),
                ..Default::default()
            },
        );
        assert!(matches!(
            follower.follow(),
            Err(FollowError::Spawn { .. })
        ));
    }
}
