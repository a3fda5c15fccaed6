//! Supervision of the Node.js Baileys sidecar process.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
    },
    tracing::{debug, error, info, warn},
};

/// Directory name searched for when no explicit path is configured.
const SIDECAR_SUBDIR: &str = "sidecar/baileys";

#[derive(Debug, Clone)]
pub struct SidecarProcessConfig {
    /// Directory holding `package.json` and `dist/index.js`.
    pub sidecar_dir: PathBuf,
    /// Port the sidecar's WebSocket server listens on.
    pub port: u16,
}

pub struct SidecarProcess {
    child: Child,
    port: u16,
}

impl SidecarProcess {
    /// Launch `node dist/index.js` and forward its output to tracing.
    pub async fn spawn(config: &SidecarProcessConfig) -> Result<Self> {
        let dir = &config.sidecar_dir;
        if !dir.join("dist/index.js").exists() {
            bail!(
                "sidecar is not built at {}; run `npm install && npm run build` there first",
                dir.display()
            );
        }

        info!(path = %dir.display(), port = config.port, "starting sidecar process");
        let mut child = Command::new("node")
            .arg("dist/index.js")
            .current_dir(dir)
            .env("PAIRD_SIDECAR_PORT", config.port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn sidecar process")?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_stdout(stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "paird_sidecar", "{line}");
                }
            });
        }

        // Catch an immediate crash (missing node, bad build) here rather
        // than as a connect timeout later.
        tokio::time::sleep(Duration::from_millis(300)).await;
        if let Some(status) = child
            .try_wait()
            .context("failed to check sidecar process status")?
        {
            bail!("sidecar process exited immediately with {status}");
        }

        Ok(Self {
            child,
            port: config.port,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// SIGTERM, then kill if it has not exited within five seconds.
    pub async fn stop(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::{
                sys::signal::{Signal, kill},
                unistd::Pid,
            };
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }

        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(%status, "sidecar process exited"),
            Ok(Err(e)) => warn!(error = %e, "failed to wait for sidecar process"),
            Err(_) => {
                warn!("sidecar did not exit after SIGTERM, killing");
                let _ = self.child.kill().await;
            },
        }
    }
}

/// Relay pino JSON lines at their own level, anything else at info.
async fn forward_stdout(stdout: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let parsed = line
            .starts_with('{')
            .then(|| serde_json::from_str::<serde_json::Value>(&line).ok())
            .flatten();
        let Some(log) = parsed else {
            info!(target: "paird_sidecar", "{line}");
            continue;
        };
        let msg = log.get("msg").and_then(|v| v.as_str()).unwrap_or(&line);
        match log.get("level").and_then(|v| v.as_u64()).unwrap_or(30) {
            ..=20 => debug!(target: "paird_sidecar", "{msg}"),
            30 => info!(target: "paird_sidecar", "{msg}"),
            40 => warn!(target: "paird_sidecar", "{msg}"),
            _ => error!(target: "paird_sidecar", "{msg}"),
        }
    }
}

/// Locate the sidecar checkout.
///
/// Order: `explicit`, then `PAIRD_SIDECAR_DIR`, then `sidecar/baileys`
/// next to the executable, then under the working directory.
pub fn find_sidecar_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.join("package.json").exists() {
            return Ok(path.to_path_buf());
        }
        bail!("no package.json in sidecar directory {}", path.display());
    }

    if let Ok(dir) = std::env::var("PAIRD_SIDECAR_DIR") {
        let path = PathBuf::from(&dir);
        if path.join("package.json").exists() {
            return Ok(path);
        }
        warn!(path = %dir, "PAIRD_SIDECAR_DIR has no package.json, ignoring");
    }

    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe()
        && let Some(exe_dir) = exe.parent()
    {
        candidates.push(exe_dir.join("..").join(SIDECAR_SUBDIR));
        candidates.push(exe_dir.join("../..").join(SIDECAR_SUBDIR));
    }
    candidates.push(PathBuf::from(SIDECAR_SUBDIR));
    candidates.push(Path::new("..").join(SIDECAR_SUBDIR));

    candidates
        .into_iter()
        .find(|p| p.join("package.json").exists())
        .map(|p| p.canonicalize().unwrap_or(p))
        .with_context(|| {
            format!("sidecar not found; set PAIRD_SIDECAR_DIR or create {SIDECAR_SUBDIR}")
        })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[test]
    fn explicit_dir_requires_package_json() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_sidecar_dir(Some(dir.path())).is_err());

        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        assert_eq!(find_sidecar_dir(Some(dir.path())).unwrap(), dir.path());
    }

    #[tokio::test]
    async fn spawn_refuses_unbuilt_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let err = SidecarProcess::spawn(&SidecarProcessConfig {
            sidecar_dir: dir.path().to_path_buf(),
            port: 0,
        })
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("not built"));
    }
}
