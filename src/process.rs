use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::ament::Env;
use crate::launch::{
    LaunchConfigurations, NodeAction, OutputMode, ParamValue, ParameterSource, resolve_parameters,
};

/// Returns the directory holding node log files and generated parameter files.
pub fn log_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("diffbot-launch")
        .join("logs")
}

/// Returns the log file path for a given process name and PID.
pub fn log_path_for_name_with_pid(name: &str, pid: u32) -> PathBuf {
    log_dir().join(format!("{}_{}.log", safe_name(name), pid))
}

fn safe_name(name: &str) -> String {
    name.replace('/', "_").trim_start_matches('_').to_string()
}

/// The argv of one node process, with inline parameters written to files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl NodeCommand {
    /// Renders `node` into a command line.
    ///
    /// Node arguments come first, then `--ros-args`, the node name remap and
    /// one `--params-file` per parameter source in declaration order. Inline
    /// sources are written under `params_dir` as `<file_stem>_<index>.yaml`.
    pub fn build(
        node: &NodeAction,
        configs: &LaunchConfigurations,
        exec_path: &Path,
        params_dir: &Path,
        file_stem: &str,
    ) -> Result<Self> {
        let mut args = node.arguments.clone();

        let parameters = resolve_parameters(node, configs)
            .with_context(|| format!("Failed to resolve parameters of {}", node.display_name()))?;

        if node.name.is_some() || !parameters.is_empty() {
            args.push("--ros-args".to_string());
            if let Some(name) = &node.name {
                args.push("-r".to_string());
                args.push(format!("__node:={name}"));
            }
            for (index, source) in parameters.iter().enumerate() {
                let path = match source {
                    ParameterSource::Inline(map) => {
                        let path = params_dir.join(format!("{file_stem}_{index}.yaml"));
                        write_params_file(&path, map)?;
                        path
                    }
                    ParameterSource::File(path) => path.clone(),
                };
                args.push("--params-file".to_string());
                args.push(path.display().to_string());
            }
        }

        Ok(Self {
            program: exec_path.to_path_buf(),
            args,
        })
    }
}

/// Writes a wildcard-node parameter file. JSON is valid YAML for the rcl parser.
fn write_params_file(path: &Path, params: &BTreeMap<String, ParamValue>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let document = serde_json::json!({ "/**": { "ros__parameters": params } });
    let text = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write parameter file {}", path.display()))
}

/// Result returned after successfully launching a node.
pub struct LaunchResult {
    /// OS process ID of the spawned process.
    pub pid: u32,
    /// Node name, or executable name for unnamed nodes.
    pub name: String,
    pub output: OutputMode,
    /// Filesystem path to the log file capturing stdout/stderr.
    pub log_path: PathBuf,
    /// Channel receiver that streams output lines in real time.
    pub output_rx: mpsc::Receiver<String>,
}

/// Manages spawning, tracking, and stopping node processes.
///
/// Generated parameter files live in a directory private to this launcher,
/// created on first use under `params_root` and removed by [`Launcher::stop_all`].
pub struct Launcher {
    processes: HashMap<u32, ManagedProcess>,
    launched: usize,
    params_root: PathBuf,
    params_dir: Option<tempfile::TempDir>,
}

struct ManagedProcess {
    name: String,
    /// Launch sequence number.
    seq: usize,
    child: Child,
}

impl Launcher {
    /// Creates a new launcher with no tracked processes.
    pub fn new() -> Self {
        Self::with_params_root(log_dir())
    }

    /// Creates a launcher whose per-run parameter directory is created under `root`.
    pub fn with_params_root(root: impl Into<PathBuf>) -> Self {
        Self {
            processes: HashMap::new(),
            launched: 0,
            params_root: root.into(),
            params_dir: None,
        }
    }

    /// The per-run parameter directory, once a node has been prepared.
    pub fn params_dir(&self) -> Option<&Path> {
        self.params_dir.as_ref().map(|d| d.path())
    }

    fn ensure_params_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.params_dir {
            return Ok(dir.path().to_path_buf());
        }
        std::fs::create_dir_all(&self.params_root)
            .with_context(|| format!("Failed to create {}", self.params_root.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("params_{}_", std::process::id()))
            .tempdir_in(&self.params_root)
            .context("Failed to create parameter directory")?;
        let path = dir.path().to_path_buf();
        self.params_dir = Some(dir);
        Ok(path)
    }

    /// Renders the command line for the next node, writing its parameter files.
    pub fn prepare(
        &mut self,
        node: &NodeAction,
        configs: &LaunchConfigurations,
        exec_path: &Path,
    ) -> Result<NodeCommand> {
        let params_dir = self.ensure_params_dir()?;
        self.launched += 1;
        let file_stem = format!("{}_{}", safe_name(node.display_name()), self.launched);
        NodeCommand::build(node, configs, exec_path, &params_dir, &file_stem)
    }

    /// Number of processes still tracked.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Spawns a node and begins piping its output to its log file and the returned channel.
    pub async fn launch_node(
        &mut self,
        node: &NodeAction,
        configs: &LaunchConfigurations,
        env: &Env,
    ) -> Result<LaunchResult> {
        let exec_path = env.executable_path(&node.package, &node.executable)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = exec_path
                .metadata()
                .context("Failed to read executable metadata")?
                .permissions();
            if perms.mode() & 0o111 == 0 {
                anyhow::bail!("File is not executable: {}", exec_path.display());
            }
        }

        tokio::fs::create_dir_all(log_dir())
            .await
            .context("Failed to create log directory")?;

        let name = node.display_name().to_string();
        let command = self.prepare(node, configs, &exec_path)?;

        tracing::debug!(node = %name, args = ?command.args, "Spawning {}", exec_path.display());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        cmd.env("PYTHONUNBUFFERED", "1");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        #[cfg(unix)]
        cmd.process_group(0);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", exec_path.display()))?;

        let pid = child.id().unwrap_or(0);
        let log_path = log_path_for_name_with_pid(&name, pid);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let rx = pipe_to_log_file(stdout, stderr, &log_path);

        tracing::info!(node = %name, pid, "Started {}/{}", node.package, node.executable);

        self.processes.insert(
            pid,
            ManagedProcess {
                name: name.clone(),
                seq: self.launched,
                child,
            },
        );

        Ok(LaunchResult {
            pid,
            name,
            output: node.output,
            log_path,
            output_rx: rx,
        })
    }

    /// Stops a tracked process by PID, sending SIGTERM then SIGKILL to its process group.
    pub async fn stop(&mut self, pid: u32) -> Result<()> {
        if let Some(mut process) = self.processes.remove(&pid) {
            #[cfg(unix)]
            {
                let pgid = format!("-{}", pid);
                let _ = Command::new("kill").args(["-TERM", &pgid]).output().await;

                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

                let _ = Command::new("kill").args(["-KILL", &pgid]).output().await;
            }
            #[cfg(not(unix))]
            {
                let _ = process.child.start_kill();
            }

            let _ = process.child.wait().await;
            tracing::info!(node = %process.name, pid, "Stopped");
        }
        Ok(())
    }

    /// Stops every tracked process, most recently launched first, then
    /// removes the parameter directory.
    pub async fn stop_all(&mut self) -> Result<()> {
        let mut running: Vec<(usize, u32)> =
            self.processes.iter().map(|(&pid, p)| (p.seq, pid)).collect();
        running.sort_unstable_by(|a, b| b.cmp(a));
        for (_, pid) in running {
            self.stop(pid).await?;
        }
        if let Some(dir) = self.params_dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
        Ok(())
    }

    /// Removes processes that have exited and returns their PIDs and names.
    pub fn cleanup_exited(&mut self) -> Vec<(u32, String)> {
        let mut exited = Vec::new();
        for (&id, process) in &mut self.processes {
            if let Ok(Some(status)) = process.child.try_wait() {
                if status.success() {
                    tracing::info!(node = %process.name, pid = id, "Process finished cleanly");
                } else {
                    tracing::error!(node = %process.name, pid = id, %status, "Process died");
                }
                exited.push((id, process.name.clone()));
            }
        }
        for (id, _) in &exited {
            self.processes.remove(id);
        }
        exited
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::new()
    }
}

fn pipe_to_log_file(
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    log_path: &Path,
) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(1000);

    if let Some(stdout) = stdout {
        tokio::spawn(forward_lines(stdout, log_path.to_path_buf(), tx.clone()));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(forward_lines(stderr, log_path.to_path_buf(), tx));
    }

    rx
}

async fn forward_lines<R>(stream: R, log_path: PathBuf, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    let mut log_file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
        .ok();

    let mut reader = BufReader::new(stream).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if let Some(ref mut f) = log_file {
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
            let _ = f.flush().await;
        }
        let _ = tx.send(line).await;
    }
}
