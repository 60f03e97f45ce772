//! Persistent subprocess management
//!
//! The pm3 client costs about a second of startup per invocation, so the
//! executor keeps one child running in interactive mode and writes commands
//! to its stdin. The client prints no standalone prompt after a command;
//! completion is detected by silence on stdout. When the persistent session
//! cannot be started or dies mid-command, the command is retried one-shot
//! with `-c`.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::LabError;
use crate::parser::{detect_output_error, PROMPT_RE, READY_RE};

/// How long to keep the subprocess alive after the last command
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// Default budget for a single command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// How long to wait for the ready banner at startup
const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Poll interval while waiting for the ready banner
const READY_POLL: Duration = Duration::from_millis(100);
/// Silence interval that ends a read-style command
const SILENCE_READ: Duration = Duration::from_millis(500);
/// Silence interval that ends a write-style command
const SILENCE_WRITE: Duration = Duration::from_millis(100);
/// Grace period for the child to exit after `quit`
const QUIT_GRACE: Duration = Duration::from_secs(3);
/// Serial-port release delay before a one-shot retry
const PORT_RELEASE_DELAY: Duration = Duration::from_millis(500);
/// Budget for the `hw version` liveness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Executor configuration
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Path or name of the pm3 binary
    pub binary_path: String,
    /// Serial port; auto-detected when empty
    pub port: Option<String>,
    /// Per-command budget when the caller supplies no deadline
    pub command_timeout: Duration,
    /// Idle teardown delay; `None` keeps the child forever
    pub idle_timeout: Option<Duration>,
    /// Whether to use the persistent session at all
    pub persistent: bool,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            binary_path: "pm3".to_string(),
            port: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            persistent: true,
        }
    }
}

/// A live persistent session
struct Session {
    stdin: ChildStdin,
    lines: mpsc::Receiver<String>,
    /// Set before an intentional kill or quit so the monitor stays quiet
    expected_exit: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
    kill: Option<oneshot::Sender<()>>,
}

impl Session {
    fn request_kill(&mut self) {
        self.expected_exit.store(true, Ordering::SeqCst);
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

/// The single process-wide lab-reader executor
pub struct LabExecutor {
    config: LabConfig,
    /// Detected or configured serial port, remembered across sessions
    port: Mutex<Option<String>>,
    /// Holds the session; locking it serializes commands
    inner: Mutex<Option<Session>>,
    /// True exactly while a command is mid-flight
    busy: AtomicBool,
    /// Invalidates superseded idle timers
    idle_generation: AtomicU64,
}

impl std::fmt::Debug for LabExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabExecutor")
            .field("binary_path", &self.config.binary_path)
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl LabExecutor {
    /// Create an executor; the child is not spawned until first use.
    pub fn new(config: LabConfig) -> Arc<Self> {
        let port = config.port.clone();
        Arc::new(Self {
            config,
            port: Mutex::new(port),
            inner: Mutex::new(None),
            busy: AtomicBool::new(false),
            idle_generation: AtomicU64::new(0),
        })
    }

    /// Whether the pm3 binary is installed and reachable
    pub fn is_available(&self) -> bool {
        let path = Path::new(&self.config.binary_path);
        if path.components().count() > 1 {
            return path.exists();
        }
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(&self.config.binary_path).exists())
            })
            .unwrap_or(false)
    }

    /// True exactly while a command is executing
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Whether the device is connected and responding. A busy executor is
    /// connected by definition; otherwise a live session counts, and as a
    /// last resort the device is probed with `hw version`.
    pub async fn is_connected(self: &Arc<Self>) -> bool {
        if self.is_busy() {
            return true;
        }
        if self.inner.lock().await.is_some() {
            return true;
        }
        self.execute_with_deadline("hw version", Some(PROBE_TIMEOUT))
            .await
            .is_ok()
    }

    /// Run a command with the read silence interval.
    pub async fn execute(self: &Arc<Self>, command: &str) -> Result<String, LabError> {
        self.run(command, SILENCE_READ, None).await
    }

    /// Run a command with the read silence interval and a caller deadline.
    pub async fn execute_with_deadline(
        self: &Arc<Self>,
        command: &str,
        deadline: Option<Duration>,
    ) -> Result<String, LabError> {
        self.run(command, SILENCE_READ, deadline).await
    }

    /// Run a fast-returning command (writes) with the short silence
    /// interval.
    pub async fn execute_fast(self: &Arc<Self>, command: &str) -> Result<String, LabError> {
        self.run(command, SILENCE_WRITE, None).await
    }

    /// Gracefully shut the subprocess down.
    pub async fn stop(&self) {
        let session = self.inner.lock().await.take();
        if let Some(session) = session {
            info!("stopping lab-reader subprocess");
            shutdown_session(session).await;
        }
    }

    async fn run(
        self: &Arc<Self>,
        command: &str,
        silence: Duration,
        deadline: Option<Duration>,
    ) -> Result<String, LabError> {
        let budget = deadline.unwrap_or(self.config.command_timeout);

        let mut inner = self.inner.lock().await;
        self.busy.store(true, Ordering::SeqCst);
        let result = self
            .run_locked(&mut inner, command, silence, budget)
            .await;
        self.busy.store(false, Ordering::SeqCst);
        drop(inner);

        self.rearm_idle_timer();
        result
    }

    async fn run_locked(
        self: &Arc<Self>,
        inner: &mut Option<Session>,
        command: &str,
        silence: Duration,
        budget: Duration,
    ) -> Result<String, LabError> {
        if !self.config.persistent {
            return self.execute_single_shot(command, budget, false).await;
        }

        if inner.is_none() {
            match self.start_session().await {
                Ok(session) => *inner = Some(session),
                Err(e) => {
                    debug!(error = %e, "persistent mode failed to start, falling back to one-shot");
                    return self.execute_single_shot(command, budget, false).await;
                }
            }
        }
        let session = inner.as_mut().expect("session just ensured");

        if let Err(e) = session.stdin.write_all(format!("{command}\n").as_bytes()).await {
            session.request_kill();
            *inner = None;
            debug!(error = %e, "failed to write to pm3 stdin, falling back to one-shot");
            return self.execute_single_shot(command, budget, true).await;
        }
        let _ = session.stdin.flush().await;

        match read_until_silent(&mut session.lines, budget, silence).await {
            Ok(output) => {
                if let Some(err) = detect_output_error(&output) {
                    return Err(err);
                }
                Ok(output)
            }
            Err(e) => {
                session.request_kill();
                *inner = None;
                debug!(error = %e, "failed to read pm3 output, falling back to one-shot");
                self.execute_single_shot(command, budget, true).await
            }
        }
    }

    async fn start_session(self: &Arc<Self>) -> Result<Session, LabError> {
        // Interactive mode needs an explicit port, unlike one-shot mode.
        let mut port_guard = self.port.lock().await;
        if port_guard.is_none() {
            *port_guard = detect_port();
        }
        let port = port_guard.clone();
        drop(port_guard);

        let mut cmd = Command::new(&self.config.binary_path);
        if let Some(port) = &port {
            cmd.args(["-p", port]);
        }
        cmd.stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LabError::BinaryNotFound
            } else {
                LabError::Spawn(e.to_string())
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LabError::Spawn("stdin pipe missing".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LabError::Spawn("stdout pipe missing".into()))?;

        // Single reader task; everyone else consumes the channel.
        let (line_tx, mut lines) = mpsc::channel::<String>(100);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let line = line.trim_end_matches(['\r', '\n']).to_string();
                if line_tx.send(line).await.is_err() {
                    return;
                }
            }
        });

        wait_for_ready(&mut lines).await?;

        let expected_exit = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited) = watch::channel(false);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let monitor_expected = Arc::clone(&expected_exit);
        tokio::spawn(async move {
            monitor_child(child, kill_rx, exited_tx, monitor_expected).await;
        });

        info!(
            binary = %self.config.binary_path,
            port = port.as_deref().unwrap_or("auto"),
            "lab-reader persistent subprocess started"
        );

        self.rearm_idle_timer();

        Ok(Session {
            stdin,
            lines,
            expected_exit,
            exited,
            kill: Some(kill_tx),
        })
    }

    async fn execute_single_shot(
        &self,
        command: &str,
        budget: Duration,
        after_kill: bool,
    ) -> Result<String, LabError> {
        if after_kill {
            // Let the serial port go before reopening it.
            sleep(PORT_RELEASE_DELAY).await;
        }

        let port = self.port.lock().await.clone();
        let mut cmd = Command::new(&self.config.binary_path);
        if let Some(port) = &port {
            cmd.args(["-p", port]);
        }
        cmd.args(["-c", command]);

        let output = timeout(budget, cmd.output())
            .await
            .map_err(|_| LabError::Timeout(command.to_string()))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LabError::BinaryNotFound
                } else {
                    LabError::Spawn(e.to_string())
                }
            })?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                stderr = "(no stderr output - port may be busy)".to_string();
            }
            return Err(LabError::Spawn(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if let Some(err) = detect_output_error(&stdout) {
            return Err(err);
        }
        Ok(stdout)
    }

    /// Re-arm the idle teardown. Each call supersedes earlier timers; the
    /// timer itself reschedules instead of killing while a command runs.
    fn rearm_idle_timer(self: &Arc<Self>) {
        let Some(idle) = self.config.idle_timeout else {
            return;
        };
        let generation = self.idle_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                sleep(idle).await;
                if this.idle_generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                // A held lock means a command is mid-flight.
                let Ok(mut inner) = this.inner.try_lock() else {
                    continue;
                };
                if let Some(session) = inner.take() {
                    info!("shutting down idle lab-reader subprocess");
                    shutdown_session(session).await;
                }
                return;
            }
        });
    }
}

/// Quit politely, then force-kill after the grace period.
async fn shutdown_session(mut session: Session) {
    session.expected_exit.store(true, Ordering::SeqCst);
    let mut stdin = session.stdin;
    let _ = stdin.write_all(b"quit\n").await;
    let _ = stdin.shutdown().await;
    drop(stdin);

    let mut exited = session.exited.clone();
    let clean_err = timeout(QUIT_GRACE, exited.wait_for(|done| *done)).await.is_err();
    if clean_err {
        if let Some(kill) = session.kill.take() {
            let _ = kill.send(());
        }
        let _ = timeout(Duration::from_secs(1), exited.wait_for(|done| *done)).await;
    }
}

/// Own the child until it exits; flag exits nobody asked for.
async fn monitor_child(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exited: watch::Sender<bool>,
    expected: Arc<AtomicBool>,
) {
    tokio::select! {
        status = child.wait() => {
            if !expected.load(Ordering::SeqCst) {
                warn!(status = ?status.ok(), "lab-reader subprocess exited unexpectedly");
            }
        }
        _ = kill => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
    let _ = exited.send(true);
}

/// Wait for the ready banner, polling the line channel until the startup
/// budget runs out.
async fn wait_for_ready(lines: &mut mpsc::Receiver<String>) -> Result<(), LabError> {
    let deadline = Instant::now() + STARTUP_TIMEOUT;
    loop {
        if Instant::now() >= deadline {
            return Err(LabError::Spawn("timeout waiting for pm3 to start".into()));
        }
        match timeout(READY_POLL, lines.recv()).await {
            Ok(Some(line)) => {
                if READY_RE.is_match(&line) {
                    return Ok(());
                }
                if line.to_lowercase().contains("error") {
                    return Err(LabError::Spawn(format!("pm3 error during startup: {line}")));
                }
            }
            Ok(None) => return Err(LabError::Spawn("pm3 closed its output during startup".into())),
            Err(_) => continue,
        }
    }
}

/// Drain lines until silence. A command is complete once output has been
/// seen and no new line arrives within the silence interval; the overall
/// budget bounds commands that never go quiet.
async fn read_until_silent(
    lines: &mut mpsc::Receiver<String>,
    budget: Duration,
    silence: Duration,
) -> Result<String, LabError> {
    let deadline = Instant::now() + budget;
    let mut output = String::new();
    let mut got_output = false;

    loop {
        if Instant::now() >= deadline {
            if got_output {
                return Ok(output.trim().to_string());
            }
            return Err(LabError::Timeout("no response".into()));
        }

        match timeout(silence, lines.recv()).await {
            Ok(Some(line)) => {
                if line.is_empty() || PROMPT_RE.is_match(&line) {
                    // Command echo and blank lines are not output.
                    continue;
                }
                got_output = true;
                output.push_str(&line);
                output.push('\n');
            }
            Ok(None) => return Err(LabError::Stream("line channel closed".into())),
            Err(_) => {
                if got_output {
                    return Ok(output.trim().to_string());
                }
                continue;
            }
        }
    }
}

/// Find a likely serial port for the device.
fn detect_port() -> Option<String> {
    #[cfg(target_os = "macos")]
    const PREFIXES: [&str; 1] = ["cu.usbmodem"];
    #[cfg(not(target_os = "macos"))]
    const PREFIXES: [&str; 2] = ["ttyACM", "ttyUSB"];

    let entries = std::fs::read_dir("/dev").ok()?;
    let mut candidates: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| PREFIXES.iter().any(|p| name.starts_with(p)))
        .map(|name| format!("/dev/{name}"))
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_of(lines: Vec<&str>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(100);
        for line in lines {
            tx.try_send(line.to_string()).unwrap();
        }
        // Keep the sender alive past the reads under test.
        std::mem::forget(tx);
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn silence_ends_a_command() {
        let mut rx = channel_of(vec![
            "[usb] pm3 --> hf 15 reader",
            "[+] UID....... E0 04 01 08 66 15 39 80",
            "[+] TYPE MATCH NXP; SLIX2",
        ]);
        let output = read_until_silent(&mut rx, Duration::from_secs(10), SILENCE_READ)
            .await
            .unwrap();
        assert!(output.contains("UID"));
        // The echo line is discarded.
        assert!(!output.contains("-->"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_output_within_budget_is_timeout() {
        let mut rx = channel_of(vec![]);
        let err = read_until_silent(&mut rx, Duration::from_secs(2), SILENCE_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Timeout(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_is_an_error() {
        let (tx, mut rx) = mpsc::channel::<String>(1);
        drop(tx);
        let err = read_until_silent(&mut rx, Duration::from_secs(2), SILENCE_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, LabError::Stream(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_with_partial_output_returns_it() {
        let (tx, mut rx) = mpsc::channel::<String>(100);
        tokio::spawn(async move {
            loop {
                if tx.send("[=] chatter".to_string()).await.is_err() {
                    return;
                }
                sleep(Duration::from_millis(50)).await;
            }
        });
        let output = read_until_silent(&mut rx, Duration::from_millis(300), SILENCE_READ)
            .await
            .unwrap();
        assert!(output.contains("chatter"));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_banner_detected() {
        let mut rx = channel_of(vec![
            "[=] Session log /root/.proxmark3/logs/x.log",
            "[=] Communicating with PM3 over USB",
        ]);
        wait_for_ready(&mut rx).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn startup_error_line_fails_fast() {
        let mut rx = channel_of(vec!["[!] ERROR: cannot open port"]);
        let err = wait_for_ready(&mut rx).await.unwrap_err();
        assert!(matches!(err, LabError::Spawn(_)));
    }

    #[test]
    fn default_config() {
        let cfg = LabConfig::default();
        assert_eq!(cfg.binary_path, "pm3");
        assert_eq!(cfg.command_timeout, DEFAULT_COMMAND_TIMEOUT);
        assert_eq!(cfg.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
        assert!(cfg.persistent);
    }

    #[test]
    fn executor_starts_idle() {
        let exec = LabExecutor::new(LabConfig::default());
        assert!(!exec.is_busy());
    }
}
