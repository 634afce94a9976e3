//! Boundary to the external scraping agent.
//!
//! The [`Agent`] trait decouples the controller from how the agent is launched.
//! Production uses [`CommandAgent`], which spawns a configured program; tests
//! use scripted agents that write a predetermined batch without spawning
//! processes. Either way the agent's only contract is: write a JSON array of
//! objects to the output sink and succeed, or fail.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::identity::RawItem;
use crate::io::config::AgentConfig;
use crate::io::paths::HarvestPaths;
use crate::io::process::run_with_deadline;

const BATCH_SCHEMA: &str = include_str!("../../schemas/batch.schema.json");

/// Parameters for one agent attempt.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// 1-indexed attempt number within the cycle.
    pub attempt: u32,
    pub workdir: PathBuf,
    /// Configuration document the agent should read.
    pub config_path: PathBuf,
    /// Where the agent must write its batch.
    pub output_path: PathBuf,
    /// Diagnostic stdout/stderr log for this attempt.
    pub log_path: PathBuf,
    pub timeout: Duration,
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Check that the agent can be launched at all. Failures are environment
    /// errors: the cycle does not start.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Run one attempt. Must write the batch to `request.output_path` on success.
    fn run(&self, request: &AgentRequest) -> Result<()>;
}

/// Agent that spawns a configured external program.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    program: PathBuf,
    args: Vec<String>,
    config_path: PathBuf,
    output_limit_bytes: usize,
}

impl CommandAgent {
    /// Build from config; relative program paths and the config reference
    /// resolve against the deployment root.
    pub fn from_config(cfg: &AgentConfig, paths: &HarvestPaths) -> Self {
        let program = Path::new(&cfg.program);
        let program = if program.components().count() > 1 {
            paths.resolve(program)
        } else {
            program.to_path_buf()
        };
        Self {
            program,
            args: cfg.args.clone(),
            config_path: paths.resolve(&cfg.config_path),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    fn render_args(&self, request: &AgentRequest) -> Vec<String> {
        let config = request.config_path.to_string_lossy();
        let output = request.output_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{config}", &config).replace("{output}", &output))
            .collect()
    }
}

impl Agent for CommandAgent {
    fn preflight(&self) -> Result<()> {
        if resolve_program(&self.program).is_none() {
            bail!("agent executable not found: {}", self.program.display());
        }
        if !self.config_path.is_file() {
            bail!("agent config not found: {}", self.config_path.display());
        }
        Ok(())
    }

    #[instrument(skip_all, fields(attempt = request.attempt, timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &AgentRequest) -> Result<()> {
        info!(program = %self.program.display(), "starting agent");
        if let Some(parent) = request.output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create output dir {}", parent.display()))?;
        }

        let mut cmd = Command::new(&self.program);
        cmd.args(self.render_args(request))
            .env("HARVESTER_CONFIG", &request.config_path)
            .env("HARVESTER_OUTPUT", &request.output_path)
            .current_dir(&request.workdir);

        let output = run_with_deadline(cmd, request.timeout, self.output_limit_bytes)
            .context("run agent")?;
        if let Err(err) = write_attempt_log(&request.log_path, &output.render_log("agent")) {
            warn!(err = %format!("{err:#}"), "agent attempt log not written");
        }

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "agent timed out");
            return Err(anyhow!("agent timed out after {:?}", request.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            return Err(anyhow!(
                "agent failed with status {:?}",
                output.status.code()
            ));
        }
        debug!("agent completed successfully");
        Ok(())
    }
}

/// Run one attempt and load the batch it produced.
///
/// Any sink left by an earlier attempt is removed first, so a failed or killed
/// attempt can never surface a stale or partial payload.
#[instrument(skip_all, fields(attempt = request.attempt, output_path = %request.output_path.display()))]
pub fn invoke_and_load<A: Agent + ?Sized>(agent: &A, request: &AgentRequest) -> Result<Vec<RawItem>> {
    clear_stale_output(&request.output_path)?;
    agent.run(request)?;
    if !request.output_path.exists() {
        return Err(anyhow!(
            "missing agent output {}",
            request.output_path.display()
        ));
    }
    let batch = read_batch(&request.output_path)?;
    debug!(items = batch.len(), "parsed agent batch");
    Ok(batch)
}

/// Parse and schema-check a batch document.
pub fn read_batch(path: &Path) -> Result<Vec<RawItem>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read agent output {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    validate_batch(&value)?;
    serde_json::from_value(value).with_context(|| format!("deserialize {}", path.display()))
}

fn validate_batch(batch: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(BATCH_SCHEMA).context("parse batch schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid batch schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(batch)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("agent batch failed schema validation: {}", messages.join("; "));
    }
    Ok(())
}

fn clear_stale_output(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale agent output");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove stale output {}", path.display())),
    }
}

fn write_attempt_log(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write agent log {}", path.display()))
}

/// Locate `program` either as a path or on `PATH`.
fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.is_absolute() || program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }
    let search = env::var_os("PATH")?;
    env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeAgent {
        payload: Option<&'static str>,
    }

    impl Agent for FakeAgent {
        fn run(&self, request: &AgentRequest) -> Result<()> {
            if let Some(payload) = self.payload {
                fs::write(&request.output_path, payload)?;
            }
            Ok(())
        }
    }

    fn request(root: &Path) -> AgentRequest {
        AgentRequest {
            attempt: 1,
            workdir: root.to_path_buf(),
            config_path: root.join("agent.json"),
            output_path: root.join("batch.json"),
            log_path: root.join("attempt-1.log"),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn invoke_and_load_reads_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeAgent {
            payload: Some(r#"[{"title": "Rust Engineer", "job_id": 7}]"#),
        };

        let batch = invoke_and_load(&fake, &request(temp.path())).expect("load");

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0]["title"], "Rust Engineer");
    }

    #[test]
    fn empty_array_is_a_valid_batch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeAgent {
            payload: Some("[]"),
        };
        let batch = invoke_and_load(&fake, &request(temp.path())).expect("load");
        assert!(batch.is_empty());
    }

    #[test]
    fn stale_output_is_not_trusted() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        fs::write(&req.output_path, r#"[{"title": "stale"}]"#).expect("write stale");

        let err = invoke_and_load(&FakeAgent { payload: None }, &req).unwrap_err();

        assert!(err.to_string().contains("missing agent output"));
        assert!(!req.output_path.exists());
    }

    #[test]
    fn non_array_payload_fails_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeAgent {
            payload: Some(r#"{"jobs": []}"#),
        };
        let err = invoke_and_load(&fake, &request(temp.path())).unwrap_err();
        assert!(err.to_string().contains("schema validation"));
    }

    #[test]
    fn non_object_items_fail_schema() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fake = FakeAgent {
            payload: Some(r#"["just a string"]"#),
        };
        assert!(invoke_and_load(&fake, &request(temp.path())).is_err());
    }

    #[test]
    fn preflight_reports_missing_executable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HarvestPaths::new(temp.path());
        let agent = CommandAgent::from_config(
            &AgentConfig {
                program: "definitely-not-installed-agent-xyz".to_string(),
                ..AgentConfig::default()
            },
            &paths,
        );

        let err = agent.preflight().unwrap_err();
        assert!(err.to_string().contains("agent executable not found"));
    }

    #[test]
    fn render_args_substitutes_placeholders() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = HarvestPaths::new(temp.path());
        let agent = CommandAgent::from_config(&AgentConfig::default(), &paths);
        let req = request(temp.path());

        let args = agent.render_args(&req);

        assert_eq!(args[0], "--config");
        assert_eq!(args[1], req.config_path.to_string_lossy());
        assert_eq!(args[3], req.output_path.to_string_lossy());
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;

        /// Scripts run through `sh` so tests never exec a freshly written file.
        fn script_agent(root: &Path, body: &str) -> CommandAgent {
            let script = root.join("agent.sh");
            fs::write(&script, format!("{body}\n")).expect("write script");
            fs::write(root.join("agent.json"), "{}").expect("write agent config");

            CommandAgent::from_config(
                &AgentConfig {
                    program: "sh".to_string(),
                    args: vec![script.to_string_lossy().into_owned(), "{output}".to_string()],
                    config_path: PathBuf::from("agent.json"),
                    output_limit_bytes: 10_000,
                },
                &HarvestPaths::new(root),
            )
        }

        #[test]
        fn command_agent_writes_sink_and_log() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(
                temp.path(),
                r#"echo scraping >&2; printf '[{"title":"a"}]' > "$1""#,
            );
            agent.preflight().expect("preflight");
            let req = request(temp.path());

            let batch = invoke_and_load(&agent, &req).expect("invoke");

            assert_eq!(batch.len(), 1);
            let log = fs::read_to_string(&req.log_path).expect("read log");
            assert!(log.contains("scraping"));
        }

        #[test]
        fn unwritable_attempt_log_does_not_fail_attempt() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(temp.path(), r#"printf '[{"title":"a"}]' > "$1""#);
            let blocker = temp.path().join("blocker");
            fs::write(&blocker, "not a directory").expect("write blocker");
            let req = AgentRequest {
                log_path: blocker.join("attempt-1.log"),
                ..request(temp.path())
            };

            let batch = invoke_and_load(&agent, &req).expect("invoke");

            assert_eq!(batch.len(), 1);
            assert!(!req.log_path.exists());
        }

        #[test]
        fn command_agent_nonzero_exit_fails() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(temp.path(), r#"printf '[]' > "$1"; exit 4"#);

            let err = invoke_and_load(&agent, &request(temp.path())).unwrap_err();
            assert!(err.to_string().contains("agent failed with status Some(4)"));
        }

        #[test]
        fn command_agent_timeout_fails() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(temp.path(), "exec sleep 30");
            let req = AgentRequest {
                timeout: Duration::from_millis(200),
                ..request(temp.path())
            };

            let err = invoke_and_load(&agent, &req).unwrap_err();
            assert!(err.to_string().contains("timed out"));
        }

        #[test]
        fn timed_out_agent_cannot_write_the_sink_later() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(
                temp.path(),
                r#"(sleep 1; printf '[{"title":"late"}]' > "$1") & sleep 30"#,
            );
            let req = AgentRequest {
                timeout: Duration::from_millis(200),
                ..request(temp.path())
            };

            let err = invoke_and_load(&agent, &req).unwrap_err();
            std::thread::sleep(Duration::from_millis(1500));

            assert!(err.to_string().contains("timed out"));
            assert!(!req.output_path.exists());
        }

        #[test]
        fn preflight_requires_agent_config() {
            let temp = tempfile::tempdir().expect("tempdir");
            let agent = script_agent(temp.path(), "exit 0");
            fs::remove_file(temp.path().join("agent.json")).expect("remove config");

            let err = agent.preflight().unwrap_err();
            assert!(err.to_string().contains("agent config not found"));
        }
    }
}
