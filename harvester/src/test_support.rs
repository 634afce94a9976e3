//! Test-only helpers: scripted agents, a recording sleeper, item builders and
//! throwaway deployment roots.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::identity::RawItem;
use crate::io::agent::{Agent, AgentRequest};
use crate::io::config::HarvesterConfig;
use crate::io::paths::HarvestPaths;
use crate::io::retry::Sleeper;

/// What a [`ScriptedAgent`] does on one attempt.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write the items as the batch and succeed.
    Batch(Vec<RawItem>),
    /// Write raw text to the output sink and succeed.
    Raw(String),
    /// Fail without writing anything.
    Fail(String),
    /// Succeed without writing anything.
    Silent,
}

/// Agent that replays a fixed script, one step per attempt.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    steps: RefCell<VecDeque<Step>>,
    requests: RefCell<Vec<AgentRequest>>,
    preflight_error: Option<String>,
}

impl ScriptedAgent {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: RefCell::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Agent whose batch succeeds on the first attempt.
    pub fn succeeding(items: Vec<RawItem>) -> Self {
        Self::new([Step::Batch(items)])
    }

    /// Agent that fails every one of `attempts` attempts.
    pub fn failing(attempts: u32) -> Self {
        Self::new((1..=attempts).map(|n| Step::Fail(format!("scripted failure {n}"))))
    }

    /// Agent whose preflight check fails.
    pub fn unavailable(message: &str) -> Self {
        Self {
            preflight_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Attempts made so far.
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn preflight(&self) -> Result<()> {
        match &self.preflight_error {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    fn run(&self, request: &AgentRequest) -> Result<()> {
        self.requests.borrow_mut().push(request.clone());
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("agent script exhausted"))?;
        match step {
            Step::Batch(items) => {
                let mut buf = serde_json::to_string_pretty(&items)?;
                buf.push('\n');
                write_output(request, &buf)
            }
            Step::Raw(text) => write_output(request, &text),
            Step::Fail(message) => Err(anyhow!("{message}")),
            Step::Silent => Ok(()),
        }
    }
}

fn write_output(request: &AgentRequest, contents: &str) -> Result<()> {
    if let Some(parent) = request.output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&request.output_path, contents)
        .with_context(|| format!("write {}", request.output_path.display()))
}

/// Sleeper that records requested delays instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pub sleeps: Vec<Duration>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.sleeps.iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.sleeps.push(duration);
    }
}

/// Build a job posting item with the default identity fields populated.
pub fn posting(title: &str, company: &str, location: &str, job_id: &str) -> RawItem {
    let mut item = RawItem::new();
    item.insert("title".to_string(), Value::from(title));
    item.insert("company".to_string(), Value::from(company));
    item.insert("location".to_string(), Value::from(location));
    item.insert("job_id".to_string(), Value::from(job_id));
    item
}

/// `posting` plus extra non-identity fields.
pub fn posting_with(
    title: &str,
    company: &str,
    location: &str,
    job_id: &str,
    extra: &[(&str, &str)],
) -> RawItem {
    let mut item = posting(title, company, location, job_id);
    for (key, value) in extra {
        item.insert((*key).to_string(), Value::from(*value));
    }
    item
}

/// `count` distinct postings with predictable titles.
pub fn postings(count: usize) -> Vec<RawItem> {
    (0..count)
        .map(|n| posting(&format!("Engineer {n}"), "Acme", "Remote", &format!("job-{n}")))
        .collect()
}

/// Temporary deployment root with the default agent config file in place.
pub struct TestRoot {
    _dir: TempDir,
    pub paths: HarvestPaths,
}

impl TestRoot {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("tempdir")?;
        let paths = HarvestPaths::new(dir.path());
        let agent_config = paths.resolve(&HarvesterConfig::default().agent.config_path);
        if let Some(parent) = agent_config.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&agent_config, "{}\n")
            .with_context(|| format!("write {}", agent_config.display()))?;
        Ok(Self { _dir: dir, paths })
    }

    /// Default config; the scripted agent never spawns, so delays only reach the sleeper.
    pub fn config(&self) -> HarvesterConfig {
        HarvesterConfig::default()
    }
}
