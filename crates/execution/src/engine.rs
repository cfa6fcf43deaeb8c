//! The experiment engine: build, submit, poll and advance.

use crate::local::LocalBatchSystem;
use crate::report::{NodeState, RunReport};
use anyhow::{bail, Context};
use std::collections::BTreeMap;
use std::sync::Arc;
use surfexp_config::{ConfigStore, ResolvedConfig};
use surfexp_core::{format_dtg, CycleState, Dtg, NodeId, ProgressStatus, SchedulerHandle, SuiteDefinition, TaskStatus};
use surfexp_progress::ProgressTracker;
use surfexp_scheduler::{
    BatchSystem, GatewayError, RetryPolicy, SchedulerGateway, StatusReply, SubmitReport, TaskSelector,
};
use surfexp_storage::Storage;
use surfexp_suite::builder::CYCLE_LENGTH_KEY;
use surfexp_suite::SuiteBuilder;
use surfexp_tasks::{run_task, TaskContext, TaskOutcome, TaskRegistry};
use surfexp_tools::CommandRunner;
use tracing::{debug, info, warn};

/// Configuration key of the job command template.
pub const TASK_COMMAND_KEY: &str = "scheduler.task_command";

/// Context of one node: the member view of the configuration and the paths
/// of the configured host.
pub fn node_context(
    store: &ConfigStore,
    config: &ResolvedConfig,
    progress: &CycleState,
    node: NodeId,
) -> surfexp_config::Result<TaskContext> {
    let config = match node.member {
        Some(member) => store.resolve_member(config, member),
        None => config.clone(),
    };
    let paths = store.path_resolver(&config)?;
    TaskContext::new(config, paths, *progress, node)
}

/// Ties configuration, progress, suite building and the scheduler together
/// for one experiment.
pub struct ExperimentEngine<S: Storage + ?Sized> {
    store: ConfigStore,
    config: ResolvedConfig,
    registry: Arc<TaskRegistry>,
    storage: Arc<S>,
    tracker: ProgressTracker<S>,
    retry: RetryPolicy,
    task_command: Option<Vec<String>>,
}

impl<S: Storage + ?Sized> ExperimentEngine<S> {
    /// Create an engine. The configuration layers are merged once here.
    pub fn new(store: ConfigStore, registry: Arc<TaskRegistry>, storage: Arc<S>) -> Self {
        let config = store.merge();
        Self {
            tracker: ProgressTracker::new(Arc::clone(&storage)),
            store,
            config,
            registry,
            storage,
            retry: RetryPolicy::default(),
            task_command: None,
        }
    }

    /// Set the retry policy of scheduler calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the job command template, overriding `scheduler.task_command`.
    pub fn with_task_command(mut self, command: Vec<String>) -> Self {
        self.task_command = Some(command);
        self
    }

    /// Merged experiment configuration.
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The progress tracker.
    pub fn tracker(&self) -> &ProgressTracker<S> {
        &self.tracker
    }

    /// Set up the cycle window of a new experiment.
    pub async fn initialize(&self, begin: Dtg, end: Dtg) -> anyhow::Result<CycleState> {
        Ok(self.tracker.initialize(begin, end).await?)
    }

    /// Current progress.
    pub async fn progress(&self) -> anyhow::Result<CycleState> {
        Ok(self.tracker.load().await?)
    }

    /// Move progress forward by `increment`.
    pub async fn advance(&self, increment: chrono::Duration) -> anyhow::Result<CycleState> {
        Ok(self.tracker.advance(increment).await?)
    }

    /// The persisted suite.
    pub async fn suite(&self) -> anyhow::Result<SuiteDefinition> {
        self.storage
            .load_suite()
            .await?
            .context("no suite has been built yet, run build first")
    }

    /// Build the active cycle window onto the stored suite and persist it.
    pub async fn build(&self) -> anyhow::Result<SuiteDefinition> {
        let progress = self.tracker.load().await?;
        let members = ConfigStore::members(&self.config)?;
        let builder = SuiteBuilder::new(&self.store, &self.registry);
        let suite = match self.storage.load_suite().await? {
            Some(existing) => builder.append(&existing, &self.config, &progress, &members)?,
            None => builder.build(&self.config, &progress, &members)?,
        };
        self.storage.save_suite(&suite).await?;
        info!(
            "Built suite {} with {} node(s) at {}",
            suite.name,
            suite.nodes.len(),
            format_dtg(&progress.last_processed)
        );
        Ok(suite)
    }

    /// Gateway over a batch system and this experiment's storage.
    pub fn gateway(&self, batch: Arc<dyn BatchSystem>) -> anyhow::Result<SchedulerGateway<S>> {
        let gateway = SchedulerGateway::new(batch, Arc::clone(&self.storage)).with_retry(self.retry);
        let command = match &self.task_command {
            Some(command) => Some(command.clone()),
            None => self.config.get_opt::<Vec<String>>(TASK_COMMAND_KEY)?,
        };
        Ok(match command {
            Some(command) => gateway.with_task_command(command),
            None => gateway,
        })
    }

    /// Submit the stored suite.
    pub async fn submit(&self, batch: Arc<dyn BatchSystem>) -> anyhow::Result<SubmitReport> {
        let suite = self.suite().await?;
        Ok(self.gateway(batch)?.submit(&suite).await?)
    }

    /// Query every node of the stored suite and advance progress over each
    /// leading cycle whose nodes have all succeeded.
    pub async fn poll(&self, batch: Arc<dyn BatchSystem>) -> anyhow::Result<RunReport> {
        let suite = self.suite().await?;
        let gateway = self.gateway(batch)?;
        let handles = self.storage.load_handles().await?;

        let mut observed: BTreeMap<NodeId, (Option<SchedulerHandle>, NodeState)> = BTreeMap::new();
        for node in &suite.nodes {
            let Some(handle) = handles.handle(&node.id).cloned() else {
                let state = if handles.unconfirmed_reason(&node.id).is_some() {
                    NodeState::Indeterminate { last_known: None }
                } else {
                    NodeState::NotSubmitted
                };
                observed.insert(node.id, (None, state));
                continue;
            };
            let state = match gateway.status(&handle).await {
                Ok(StatusReply::Known(status)) => NodeState::Status { status },
                Ok(StatusReply::Indeterminate { last_known }) => NodeState::Indeterminate { last_known },
                Err(GatewayError::Batch(e)) => {
                    warn!("{} ({}): {}", node.id, handle, e);
                    NodeState::Indeterminate {
                        last_known: handles.last_status(&handle),
                    }
                }
                Err(e) => return Err(e.into()),
            };
            observed.insert(node.id, (Some(handle), state));
        }

        let mut report = RunReport::from_observed(&suite, observed);
        report.advanced = self.advance_completed(&report).await?;
        Ok(report)
    }

    /// Settle a submission that timed out: with a handle the job is known to
    /// exist, without one it is dropped and sent again by the next submit.
    pub async fn resolve_submission(
        &self,
        batch: Arc<dyn BatchSystem>,
        node: &NodeId,
        handle: Option<SchedulerHandle>,
    ) -> anyhow::Result<()> {
        let gateway = self.gateway(batch)?;
        match handle {
            Some(handle) => gateway.confirm(node, handle).await?,
            None => gateway.discard(node).await?,
        }
        Ok(())
    }

    /// Kill the submitted nodes a selector picks.
    pub async fn kill(&self, batch: Arc<dyn BatchSystem>, selector: &TaskSelector) -> anyhow::Result<Vec<NodeId>> {
        self.check_experiment(selector)?;
        let gateway = self.gateway(batch)?;
        let selected = gateway.select(selector).await?;
        if selected.is_empty() {
            bail!("no submitted node matches {}", selector);
        }
        let mut killed = Vec::with_capacity(selected.len());
        for (node, handle) in selected {
            gateway
                .kill(&handle)
                .await
                .with_context(|| format!("killing {} ({})", node, handle))?;
            killed.push(node);
        }
        Ok(killed)
    }

    /// Status of the submitted nodes a selector picks.
    pub async fn status(
        &self,
        batch: Arc<dyn BatchSystem>,
        selector: &TaskSelector,
    ) -> anyhow::Result<Vec<(NodeId, SchedulerHandle, StatusReply)>> {
        self.check_experiment(selector)?;
        let gateway = self.gateway(batch)?;
        let mut replies = Vec::new();
        for (node, handle) in gateway.select(selector).await? {
            let reply = gateway.status(&handle).await?;
            replies.push((node, handle, reply));
        }
        Ok(replies)
    }

    /// In-process batch system over the current progress. Jobs that reached
    /// a final state in earlier runs are carried over so their dependents
    /// can run.
    pub async fn local_batch(&self, runner: Arc<dyn CommandRunner>) -> anyhow::Result<LocalBatchSystem> {
        let progress = self.tracker.load().await?;
        let finished: Vec<(SchedulerHandle, TaskStatus)> = self
            .storage
            .load_handles()
            .await?
            .entries
            .into_values()
            .filter_map(|r| r.last_status.filter(TaskStatus::is_terminal).map(|s| (r.handle, s)))
            .collect();
        Ok(LocalBatchSystem::new(
            self.store.clone(),
            self.config.clone(),
            progress,
            Arc::clone(&self.registry),
            runner,
        )
        .with_history(finished))
    }

    /// Build, run the active window in-process and report.
    pub async fn run_local(&self, runner: Arc<dyn CommandRunner>) -> anyhow::Result<RunReport> {
        self.build().await?;
        let batch: Arc<dyn BatchSystem> = Arc::new(self.local_batch(runner).await?);
        let submitted = self.submit(Arc::clone(&batch)).await?;
        debug!("Local run submitted {} node(s)", submitted.submitted.len());
        self.poll(batch).await
    }

    /// Run one node in this process, the entry point of a batch job.
    pub async fn run_task(&self, node: NodeId, runner: &dyn CommandRunner) -> anyhow::Result<TaskOutcome> {
        let progress = self.tracker.load().await?;
        let ctx = node_context(&self.store, &self.config, &progress, node)
            .with_context(|| format!("building the context of {}", node))?;
        Ok(run_task(&self.registry, &ctx, runner).await?)
    }

    fn check_experiment(&self, selector: &TaskSelector) -> anyhow::Result<()> {
        let case = self.config.get_str(surfexp_suite::builder::CASE_KEY)?;
        if selector.experiment != case {
            bail!("selector names experiment {}, this is {}", selector.experiment, case);
        }
        Ok(())
    }

    async fn advance_completed(&self, report: &RunReport) -> anyhow::Result<Option<CycleState>> {
        let cycle_length = self.config.get_duration(CYCLE_LENGTH_KEY)?;
        let mut state = self.tracker.load().await?;
        let mut advanced = None;
        while state.status() == ProgressStatus::Active
            && state.last_processed + cycle_length <= state.end
            && report.cycle_succeeded(state.last_processed)
        {
            state = self.tracker.advance(cycle_length).await?;
            advanced = Some(state);
        }
        Ok(advanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration as StdDuration;
    use surfexp_config::ConfigLayer;
    use surfexp_core::{parse_dtg, parse_duration, TaskKind};
    use surfexp_storage::JsonStorage;
    use surfexp_tasks::{PreparedTask, SurfaceTask, Task, TaskDeclaration, TaskError};
    use surfexp_tools::{CommandOutput, CommandSpec, ToolError};

    /// Stage with the real declaration whose only step runs its kind name.
    struct Echo(TaskKind);

    #[async_trait]
    impl Task for Echo {
        fn kind(&self) -> TaskKind {
            self.0
        }

        fn declaration(&self) -> TaskDeclaration {
            SurfaceTask::for_kind(self.0).declaration()
        }

        fn prepare(&self, ctx: &TaskContext) -> Result<PreparedTask, TaskError> {
            Ok(PreparedTask::new(ctx.node, ctx.workdir()?).run(CommandSpec::new(self.0.as_str())))
        }
    }

    /// Fails every program named in `failing`.
    struct Runner {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl CommandRunner for Runner {
        async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ToolError> {
            Ok(CommandOutput {
                exit_code: if self.failing.iter().any(|p| *p == spec.program) { 1 } else { 0 },
                stdout: String::new(),
                stderr: String::new(),
                duration: StdDuration::ZERO,
            })
        }
    }

    fn store(root: &std::path::Path, extra: Value) -> ConfigStore {
        let r = root.display().to_string();
        ConfigStore::new()
            .with_layer(
                ConfigLayer::new(
                    "defaults",
                    json!({
                        "general": {"case": "demo", "times": {"cycle_length": "PT3H"}},
                        "domain": {
                            "nimax": 60, "njmax": 50, "xloncen": 10.0, "xlatcen": 59.5,
                            "xdx": 2500.0, "xdy": 2500.0, "ilone": 11, "ilate": 11,
                            "xlon0": 0.0, "xlat0": 50.0
                        },
                        "system": {
                            "wrk": format!("{r}/wrk/@YYYY@@MM@@DD@_@HH@/@EEE@"),
                            "archive_dir": format!("{r}/archive/@YYYY@/@MM@/@DD@/@HH@/@EEE@"),
                            "climdir": format!("{r}/climate"),
                            "forcing_dir": format!("{r}/forcing/@YYYY@@MM@@DD@@HH@/@EEE@")
                        }
                    }),
                )
                .unwrap(),
            )
            .with_layer(ConfigLayer::new("user", extra).unwrap())
    }

    fn registry() -> Arc<TaskRegistry> {
        let mut registry = TaskRegistry::new();
        for kind in TaskKind::ALL {
            registry.register(Echo(kind));
        }
        Arc::new(registry)
    }

    async fn engine(root: &std::path::Path, extra: Value) -> ExperimentEngine<JsonStorage> {
        let storage = Arc::new(JsonStorage::new(root.join("state")).await.unwrap());
        ExperimentEngine::new(store(root, extra), registry(), storage)
            .with_retry(RetryPolicy::new().with_initial_delay(StdDuration::from_millis(1)))
    }

    fn node(kind: TaskKind, cycle: &str) -> NodeId {
        NodeId::new(kind, parse_dtg(cycle).unwrap(), None)
    }

    #[tokio::test]
    async fn test_single_cycle_runs_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), json!({"suite_control.pipeline": ["prep", "forcing", "forecast"]})).await;
        engine
            .initialize(parse_dtg("2022020100").unwrap(), parse_dtg("2022020103").unwrap())
            .await
            .unwrap();

        let suite = engine.build().await.unwrap();
        assert_eq!(suite.nodes.len(), 3);
        assert_eq!(suite.edges().len(), 2);

        let report = engine.run_local(Arc::new(Runner { failing: vec![] })).await.unwrap();
        assert!(!report.has_failures());
        assert_eq!(report.summary()["succeeded"], 3);
        let advanced = report.advanced.unwrap();
        assert_eq!(advanced.last_processed, parse_dtg("2022020103").unwrap());
        assert_eq!(advanced.status(), ProgressStatus::Completed);

        let err = engine.advance(parse_duration("PT3H").unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("past the end"), "{err}");
    }

    #[tokio::test]
    async fn test_failure_blocks_only_its_branch() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(
            dir.path(),
            json!({"suite_control.pipeline": ["pgd", "prep", "forcing", "forecast"]}),
        )
        .await;
        engine
            .initialize(parse_dtg("2022020100").unwrap(), parse_dtg("2022020106").unwrap())
            .await
            .unwrap();

        let report = engine
            .run_local(Arc::new(Runner { failing: vec!["forcing"] }))
            .await
            .unwrap();
        let forcing = node(TaskKind::Forcing, "2022020100");
        assert_eq!(report.state(&forcing), Some(NodeState::Status { status: TaskStatus::Failed }));
        assert_eq!(
            report.state(&node(TaskKind::Forecast, "2022020100")),
            Some(NodeState::Blocked { by: forcing })
        );
        assert_eq!(
            report.state(&node(TaskKind::Prep, "2022020100")),
            Some(NodeState::Status { status: TaskStatus::Succeeded })
        );
        assert_eq!(report.advanced, None);
        assert_eq!(engine.progress().await.unwrap().last_processed, parse_dtg("2022020100").unwrap());

        // a fresh poll keeps the recorded terminal states
        let again = engine
            .poll(Arc::new(LocalBatchSystem::new(
                ConfigStore::new(),
                engine.config().clone(),
                engine.progress().await.unwrap(),
                registry(),
                Arc::new(Runner { failing: vec![] }),
            )))
            .await
            .unwrap();
        assert_eq!(again.nodes, report.nodes);
    }

    #[tokio::test]
    async fn test_next_build_appends_after_advance() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), json!({"suite_control.pipeline": ["prep", "forecast"]})).await;
        engine
            .initialize(parse_dtg("2022020100").unwrap(), parse_dtg("2022020106").unwrap())
            .await
            .unwrap();

        let runner = Arc::new(Runner { failing: vec![] });
        let first = engine.run_local(runner.clone()).await.unwrap();
        assert_eq!(first.advanced.unwrap().last_processed, parse_dtg("2022020103").unwrap());

        let second = engine.run_local(runner).await.unwrap();
        assert_eq!(second.nodes.len(), 4);
        assert_eq!(second.advanced.unwrap().status(), ProgressStatus::Completed);
        let suite = engine.suite().await.unwrap();
        assert!(suite
            .node(&node(TaskKind::Prep, "2022020103"))
            .unwrap()
            .predecessors
            .contains(&node(TaskKind::Forecast, "2022020100")));
    }

    #[tokio::test]
    async fn test_run_task_and_kill_selection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), json!({"suite_control.pipeline": ["prep"]})).await;
        engine
            .initialize(parse_dtg("2022020100").unwrap(), parse_dtg("2022020103").unwrap())
            .await
            .unwrap();

        let outcome = engine
            .run_task(node(TaskKind::Prep, "2022020100"), &Runner { failing: vec!["prep"] })
            .await
            .unwrap();
        assert!(!outcome.result.is_success());

        assert!(engine.suite().await.is_err());
        engine.build().await.unwrap();
        let batch: Arc<dyn BatchSystem> = Arc::new(LocalBatchSystem::new(
            ConfigStore::new(),
            engine.config().clone(),
            engine.progress().await.unwrap(),
            registry(),
            Arc::new(Runner { failing: vec![] }),
        ));
        let selector = TaskSelector::parse(["experiment=demo", "cycle=2022020100", "task=prep"]).unwrap();
        let other = TaskSelector::parse(["experiment=other", "cycle=2022020100"]).unwrap();
        assert!(engine.status(batch.clone(), &other).await.is_err());
        assert!(engine.kill(batch.clone(), &selector).await.is_err());

        engine.submit(batch.clone()).await.unwrap();
        // the job already finished, so kill is a no-op
        assert_eq!(engine.kill(batch.clone(), &selector).await.unwrap().len(), 1);
        let replies = engine.status(batch, &selector).await.unwrap();
        assert_eq!(replies[0].2, StatusReply::Known(TaskStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_unconfirmed_submission_waits_for_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), json!({"suite_control.pipeline": ["prep"]})).await;
        engine
            .initialize(parse_dtg("2022020100").unwrap(), parse_dtg("2022020103").unwrap())
            .await
            .unwrap();
        engine.build().await.unwrap();
        let prep = node(TaskKind::Prep, "2022020100");
        let storage = JsonStorage::new(dir.path().join("state")).await.unwrap();
        let mut table = storage.load_handles().await.unwrap();
        table.mark_unconfirmed(prep, "submit timed out");
        storage.save_handles(&table).await.unwrap();

        let runner = Arc::new(Runner { failing: vec![] });
        let batch: Arc<dyn BatchSystem> = Arc::new(engine.local_batch(runner).await.unwrap());
        let report = engine.poll(batch.clone()).await.unwrap();
        assert_eq!(report.state(&prep), Some(NodeState::Indeterminate { last_known: None }));
        assert_eq!(report.advanced, None);

        let submitted = engine.submit(batch.clone()).await.unwrap();
        assert!(submitted.submitted.is_empty());
        assert!(submitted.indeterminate.contains_key(&prep));

        engine.resolve_submission(batch.clone(), &prep, None).await.unwrap();
        assert!(engine.resolve_submission(batch.clone(), &prep, None).await.is_err());
        let submitted = engine.submit(batch).await.unwrap();
        assert_eq!(submitted.submitted, vec![prep]);
    }
}
