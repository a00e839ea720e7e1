use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};

use crate::core::traits::sandbox::{Sandbox, SandboxError, SandboxOutput};

// How long to wait for pipes to drain once the process group is gone.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Runs commands through `sh -c` as plain child processes. Each command gets
/// its own process group so a timeout kills everything it started.
///
/// This is process-level isolation only: no filesystem, network or memory
/// confinement beyond the host user's permissions.
#[derive(Clone, Debug)]
pub struct NativeSandbox {
    shell: PathBuf,
    output_limit: usize,
}

impl NativeSandbox {
    pub fn new<P: AsRef<Path>>(shell: P, output_limit: usize) -> Self {
        NativeSandbox {
            shell: shell.as_ref().into(),
            output_limit,
        }
    }
}

#[async_trait::async_trait]
impl Sandbox for NativeSandbox {
    #[tracing::instrument(skip(self))]
    async fn run(
        &self,
        command: &str,
        workdir: &Path,
        time_limit: Duration,
    ) -> Result<SandboxOutput, SandboxError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Spawn { msg: e.to_string() })?;
        // Declared after `child` so it drops first, while the leader still
        // holds the group id.
        let group = GroupGuard::new(child.id());

        let stdout = tokio::spawn(read_capped(child.stdout.take(), self.output_limit));
        let stderr = tokio::spawn(read_capped(child.stderr.take(), self.output_limit));

        let exited = timeout(time_limit, wait_exited(&mut child)).await;
        let killed = exited.is_err();
        if killed {
            tracing::debug!("Time limit of {:?} exceeded, killing", time_limit);
        }
        // The leader is not reaped yet, so this cannot reach a recycled group.
        group.kill();
        if killed {
            let _ = child.start_kill();
        }
        let status = child
            .wait()
            .await
            .map_err(|e| SandboxError::Wait { msg: e.to_string() })?;
        let duration = started.elapsed();

        let (stdout, stdout_truncated) = collect(stdout).await;
        let (stderr, stderr_truncated) = collect(stderr).await;

        let output = SandboxOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            signal: exit_signal(&status),
            killed,
            truncated: stdout_truncated || stderr_truncated,
            duration,
        };
        tracing::debug!(
            exit_code = ?output.exit_code,
            killed = output.killed,
            "Process finished in {:?}",
            duration
        );
        Ok(output)
    }
}

/// Kills the command's process group when the run is cancelled, e.g. when
/// the worker gives up on the attempt and aborts it.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn kill(mut self) {
        kill_group(self.pid.take());
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            tracing::debug!("Run cancelled, killing process group {}", pid);
            kill_group(Some(pid));
        }
    }
}

// The child leads its own group, so its pid is the group id.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Waits for the child to exit without reaping it (`WNOWAIT`), so its pid
/// stays reserved until `Child::wait` collects the status.
#[cfg(unix)]
async fn wait_exited(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let waited = tokio::task::spawn_blocking(move || {
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return;
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                tracing::warn!("waitid on {} failed: {}", pid, err);
                return;
            }
        }
    })
    .await;
    if let Err(e) = waited {
        tracing::error!("Exit watcher failed: {}", e);
    }
}

#[cfg(not(unix))]
async fn wait_exited(child: &mut Child) {
    let _ = child.wait().await;
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

/// Keeps the first `limit` bytes and discards the rest so the writer never
/// blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut truncated = false;
    let Some(mut reader) = reader else {
        return (captured, truncated);
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(captured.len());
                if n > room {
                    truncated = true;
                }
                captured.extend_from_slice(&chunk[..n.min(room)]);
            }
            Err(e) => {
                tracing::warn!("Failed to read process output: {}", e);
                break;
            }
        }
    }
    (captured, truncated)
}

async fn collect(mut handle: JoinHandle<(Vec<u8>, bool)>) -> (String, bool) {
    let drained = timeout(PIPE_DRAIN_GRACE, &mut handle).await;
    match drained {
        Ok(Ok((bytes, truncated))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Err(e)) => {
            tracing::error!("Output reader failed: {}", e);
            (String::new(), false)
        }
        Err(_) => {
            tracing::warn!("Output pipe still open after process exit, abandoning it");
            handle.abort();
            (String::new(), false)
        }
    }
}
