/*!
 * Sandbox Service
 * Capability-gated façade over the executor: named limit profiles, strict
 * environment inheritance, and lifecycle events on the bus
 */

use super::profiles::ProfileTable;
use super::types::{ExecLimits, ExecRequest, ExecResult, SandboxResult};
use super::Sandbox;
use crate::capabilities::Capabilities;
use crate::events::{emit, EventBus};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Capability required to run anything through the service
pub const CAP_PROC_RUN: &str = "proc.run";

/// Allow-list deciding which ambient environment variables may be inherited
/// by sandboxed children. Default covers the POSIX basics plus the Windows
/// variables required for Winsock and cmd.exe, and the `ADAOS_`/`PYTHON`
/// prefixes. Matching is case-insensitive.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    names: HashSet<String>,
    prefixes: Vec<String>,
}

impl Default for EnvPolicy {
    fn default() -> Self {
        let names = [
            // POSIX basics
            "path", "home", "lang", "lc_all", "tmp", "temp", "tmpdir",
            // Windows system set
            "pathext", "systemroot", "windir", "comspec", "username", "userprofile", "appdata",
            "localappdata", "programfiles", "programfiles(x86)", "programdata", "public",
            "number_of_processors", "processor_architecture", "os",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        Self {
            names,
            prefixes: vec!["adaos_".to_string(), "python".to_string()],
        }
    }
}

impl EnvPolicy {
    pub fn allow_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into().to_lowercase());
        self
    }

    pub fn allow_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into().to_lowercase());
        self
    }

    pub fn allows(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.names.contains(&key) || self.prefixes.iter().any(|p| key.starts_with(p))
    }
}

/// One service-level execution request, builder-style
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub limits: Option<ExecLimits>,
    pub stdin: Option<Vec<u8>>,
    pub profile: Option<String>,
    pub inherit_env: bool,
    pub extra_env: Vec<(String, String)>,
}

impl SandboxRequest {
    pub fn new(cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            env: Vec::new(),
            limits: None,
            stdin: None,
            profile: None,
            inherit_env: false,
            extra_env: Vec::new(),
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_limits(mut self, limits: ExecLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn inherit_env(mut self, inherit: bool) -> Self {
        self.inherit_env = inherit;
        self
    }

    pub fn with_extra_env(mut self, extra: Vec<(String, String)>) -> Self {
        self.extra_env = extra;
        self
    }
}

/// Gates and configures the executor for product use. Limits precedence:
/// explicit limits > named profile > `default` profile.
pub struct SandboxService {
    runner: Arc<dyn Sandbox>,
    caps: Arc<dyn Capabilities>,
    bus: Arc<dyn EventBus>,
    profiles: ProfileTable,
    env_policy: EnvPolicy,
}

impl SandboxService {
    pub fn new(runner: Arc<dyn Sandbox>, caps: Arc<dyn Capabilities>, bus: Arc<dyn EventBus>) -> Self {
        Self {
            runner,
            caps,
            bus,
            profiles: ProfileTable::default(),
            env_policy: EnvPolicy::default(),
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    /// Run a command on behalf of `subject`. Requires the `proc.run`
    /// capability; denial spawns nothing and emits nothing.
    pub fn run(&self, subject: &str, req: &SandboxRequest) -> SandboxResult<ExecResult> {
        self.caps.require(subject, CAP_PROC_RUN)?;

        let limits = req
            .limits
            .clone()
            .unwrap_or_else(|| self.profiles.resolve(req.profile.as_deref()));
        let profile_name = req.profile.as_deref().unwrap_or("default");

        let env = self.assemble_env(req);

        emit(
            self.bus.as_ref(),
            "sandbox.start",
            json!({
                "cmd": req.cmd,
                "cwd": req.cwd,
                "profile": profile_name,
                "limits": {
                    "wall": limits.wall_time.map(|d| d.as_secs_f64()),
                    "cpu": limits.cpu_time.map(|d| d.as_secs_f64()),
                    "rss": limits.max_rss_mb,
                },
            }),
        );

        let started = Instant::now();

        let mut exec = ExecRequest::new(req.cmd.clone())
            .with_env(env)
            .with_limits(limits);
        if let Some(cwd) = &req.cwd {
            exec = exec.with_cwd(cwd);
        }
        if let Some(stdin) = &req.stdin {
            exec = exec.with_stdin(stdin.clone());
        }

        let res = self.runner.run(&exec)?;
        let duration = started.elapsed().as_secs_f64();

        if res.timed_out {
            emit(
                self.bus.as_ref(),
                "sandbox.killed",
                json!({
                    "cmd": req.cmd,
                    "cwd": req.cwd,
                    "reason": res.killed_reason.map(|r| r.as_str()),
                    "duration": duration,
                }),
            );
        }

        emit(
            self.bus.as_ref(),
            "sandbox.end",
            json!({
                "cmd": req.cmd,
                "cwd": req.cwd,
                "exit": res.exit_code,
                "timed_out": res.timed_out,
                "duration": duration,
            }),
        );

        Ok(res)
    }

    /// Child env: filtered ambient inheritance first, then the explicit env,
    /// then extra_env on top. Later entries win.
    fn assemble_env(&self, req: &SandboxRequest) -> Vec<(String, String)> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        if req.inherit_env {
            for (key, value) in std::env::vars() {
                if self.env_policy.allows(&key) {
                    merged.insert(key, value);
                }
            }
        }
        for (key, value) in &req.env {
            merged.insert(key.clone(), value.clone());
        }
        for (key, value) in &req.extra_env {
            merged.insert(key.clone(), value.clone());
        }
        merged.into_iter().collect()
    }
}
