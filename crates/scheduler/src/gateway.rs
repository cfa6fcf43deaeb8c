//! Submission, kill and status against a batch system.

use crate::batch::{BatchSystem, JobRequest};
use crate::error::{BatchError, GatewayError, Result};
use crate::selector::TaskSelector;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use surfexp_core::{NodeId, SchedulerHandle, SuiteDefinition, TaskStatus};
use surfexp_storage::{HandleTable, Storage};
use tracing::{debug, error, info, warn};

/// Bounded retry with exponential backoff for batch system calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound of the delay
    pub max_delay: Duration,
    /// Limit of every single call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Create the default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the first retry delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the per call time limit.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Status reply of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusReply {
    /// Status reported by the batch system (or recorded terminal state)
    Known(TaskStatus),
    /// The batch system did not answer; retry later with the same handle
    Indeterminate {
        /// Last status seen for the handle
        last_known: Option<TaskStatus>,
    },
}

impl StatusReply {
    /// Status when known.
    pub fn status(&self) -> Option<TaskStatus> {
        match self {
            StatusReply::Known(status) => Some(*status),
            StatusReply::Indeterminate { .. } => None,
        }
    }
}

/// Outcome of submitting a suite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Handle of every submitted node, including earlier submissions
    pub handles: BTreeMap<NodeId, SchedulerHandle>,
    /// Nodes submitted by this call, in submission order
    pub submitted: Vec<NodeId>,
    /// Nodes that already had a handle
    pub already_submitted: Vec<NodeId>,
    /// Nodes that could not be submitted, with the reason
    pub failed: BTreeMap<NodeId, String>,
    /// Nodes held back because a predecessor was not submitted
    pub held: BTreeMap<NodeId, NodeId>,
    /// Nodes whose submission timed out, now or in an earlier call; they are
    /// not submitted again until confirmed or discarded
    pub indeterminate: BTreeMap<NodeId, String>,
}

impl SubmitReport {
    /// Whether every node of the suite has a handle.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.held.is_empty() && self.indeterminate.is_empty()
    }
}

/// Translates suites and handles into batch system calls.
///
/// The gateway owns the node to handle table; it is persisted after every
/// accepted submission so that `status` and `kill` work from a fresh process.
pub struct SchedulerGateway<S: Storage + ?Sized> {
    batch: Arc<dyn BatchSystem>,
    storage: Arc<S>,
    retry: RetryPolicy,
    task_command: Vec<String>,
}

impl<S: Storage + ?Sized> SchedulerGateway<S> {
    /// Create a gateway.
    pub fn new(batch: Arc<dyn BatchSystem>, storage: Arc<S>) -> Self {
        Self {
            batch,
            storage,
            retry: RetryPolicy::default(),
            task_command: vec![
                "surfexp".to_string(),
                "run-task".to_string(),
                "--task".to_string(),
                "{task}".to_string(),
                "--cycle".to_string(),
                "{cycle}".to_string(),
                "{member}".to_string(),
            ],
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the job command template (`{task}`, `{cycle}`, `{member}`,
    /// `{experiment}`). An argument that is exactly `{member}` expands to
    /// `--member <n>` or disappears for member-less nodes.
    pub fn with_task_command(mut self, command: Vec<String>) -> Self {
        self.task_command = command;
        self
    }

    /// Submit every node of a suite not submitted before.
    ///
    /// Nodes go out in topological order with their predecessors' handles as
    /// dependencies. A node whose predecessor has no handle is held back;
    /// unrelated nodes are still submitted. A submit that timed out is not
    /// retried, since the job may exist already: the node is marked
    /// unconfirmed in the handle table and skipped by later calls until
    /// [`SchedulerGateway::confirm`] or [`SchedulerGateway::discard`].
    pub async fn submit(&self, suite: &SuiteDefinition) -> Result<SubmitReport> {
        let order = suite.topological_order()?;
        let mut table = self.storage.load_handles().await?;
        let mut report = SubmitReport::default();

        for id in order {
            let Some(node) = suite.node(&id) else {
                continue;
            };
            if table.handle(&id).is_some() {
                report.already_submitted.push(id);
                continue;
            }
            if let Some(reason) = table.unconfirmed_reason(&id) {
                warn!("Skipping {}: earlier submission unconfirmed ({})", id, reason);
                report.indeterminate.insert(id, reason.to_string());
                continue;
            }

            let mut dependencies = Vec::with_capacity(node.predecessors.len());
            let mut blocker = None;
            for pred in &node.predecessors {
                match table.handle(pred) {
                    Some(handle) => dependencies.push(handle.clone()),
                    None => {
                        blocker = Some(*pred);
                        break;
                    }
                }
            }
            if let Some(pred) = blocker {
                warn!("Holding back {}: predecessor {} not submitted", id, pred);
                report.held.insert(id, pred);
                continue;
            }

            let job = JobRequest {
                node: id,
                name: format!("{}/{}", suite.name, id),
                command: self.job_command(&suite.name, &id),
                dependencies,
                parameters: node.parameters.clone(),
            };
            let result = self
                .retrying("submit", |e| matches!(e, BatchError::Communication(_)), || {
                    self.batch.submit(&job)
                })
                .await;

            match result {
                Ok(handle) => {
                    debug!("{} -> {}", id, handle);
                    table.insert(id, handle);
                    self.storage.save_handles(&table).await?;
                    report.submitted.push(id);
                }
                Err(e @ BatchError::Timeout(_)) => {
                    error!("Submission of {} is unconfirmed: {}", id, e);
                    table.mark_unconfirmed(id, e.to_string());
                    self.storage.save_handles(&table).await?;
                    report.indeterminate.insert(id, e.to_string());
                }
                Err(e) => {
                    error!("Submission of {} failed: {}", id, e);
                    report.failed.insert(id, e.to_string());
                }
            }
        }

        report.handles = table
            .entries
            .iter()
            .filter(|(id, _)| suite.contains(id))
            .map(|(id, record)| (*id, record.handle.clone()))
            .collect();
        info!(
            "Submitted {} node(s) of {}, {} already submitted, {} failed, {} held, {} unconfirmed",
            report.submitted.len(),
            suite.name,
            report.already_submitted.len(),
            report.failed.len(),
            report.held.len(),
            report.indeterminate.len()
        );
        Ok(report)
    }

    /// Kill a job. Killing a job that already finished does nothing, also
    /// when the batch system no longer knows the handle.
    pub async fn kill(&self, handle: &SchedulerHandle) -> Result<()> {
        let mut table = self.storage.load_handles().await?;
        if let Some(last) = table.last_status(handle) {
            if last.is_terminal() {
                debug!("{} already {}, nothing to kill", handle, last);
                return Ok(());
            }
        }
        match self.query(handle, &mut table).await {
            Ok(StatusReply::Known(status)) if status.is_terminal() => {
                debug!("{} already {}, nothing to kill", handle, status);
                return Ok(());
            }
            Ok(_) => {}
            Err(GatewayError::Batch(BatchError::UnknownHandle(_))) if table.node_for(handle).is_some() => {
                // finished jobs drop out of the batch system's listing; the
                // final state is unknown, so none is recorded
                info!("{} no longer known to the batch system, nothing to kill", handle);
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.retrying("kill", BatchError::is_transient, || self.batch.kill(handle))
            .await?;
        info!("Killed {}", handle);
        table.record_status(handle, TaskStatus::Aborted);
        self.storage.save_handles(&table).await?;
        Ok(())
    }

    /// Status of a job.
    ///
    /// A handle last seen in a terminal state keeps that state without a
    /// query. When the batch system does not answer after the retries the
    /// reply is `Indeterminate`, never `Failed`.
    pub async fn status(&self, handle: &SchedulerHandle) -> Result<StatusReply> {
        let mut table = self.storage.load_handles().await?;
        if let Some(last) = table.last_status(handle) {
            if last.is_terminal() {
                return Ok(StatusReply::Known(last));
            }
        }
        self.query(handle, &mut table).await
    }

    /// Record the handle of an unconfirmed submission that turned out to
    /// exist in the batch system.
    pub async fn confirm(&self, node: &NodeId, handle: SchedulerHandle) -> Result<()> {
        let mut table = self.storage.load_handles().await?;
        if table.unconfirmed_reason(node).is_none() {
            return Err(GatewayError::NotUnconfirmed(*node));
        }
        info!("Confirmed {} as {}", node, handle);
        table.insert(*node, handle);
        self.storage.save_handles(&table).await?;
        Ok(())
    }

    /// Forget an unconfirmed submission that never reached the batch
    /// system, so the next submit sends the node again.
    pub async fn discard(&self, node: &NodeId) -> Result<()> {
        let mut table = self.storage.load_handles().await?;
        if !table.discard_unconfirmed(node) {
            return Err(GatewayError::NotUnconfirmed(*node));
        }
        info!("Discarded the unconfirmed submission of {}", node);
        self.storage.save_handles(&table).await?;
        Ok(())
    }

    /// Handles of the nodes a selector picks, from the persisted table.
    pub async fn select(&self, selector: &TaskSelector) -> Result<Vec<(NodeId, SchedulerHandle)>> {
        let table = self.storage.load_handles().await?;
        Ok(table
            .entries
            .iter()
            .filter(|(id, _)| selector.matches(id))
            .map(|(id, record)| (*id, record.handle.clone()))
            .collect())
    }

    /// Handle of one node.
    pub async fn handle_for(&self, node: &NodeId) -> Result<SchedulerHandle> {
        let table = self.storage.load_handles().await?;
        table
            .handle(node)
            .cloned()
            .ok_or(GatewayError::NotSubmitted(*node))
    }

    async fn query(&self, handle: &SchedulerHandle, table: &mut HandleTable) -> Result<StatusReply> {
        let result = self
            .retrying("status", BatchError::is_transient, || self.batch.status(handle))
            .await;
        match result {
            Ok(status) => {
                if table.last_status(handle) != Some(status) {
                    table.record_status(handle, status);
                    self.storage.save_handles(table).await?;
                }
                Ok(StatusReply::Known(status))
            }
            Err(e) if e.is_transient() => {
                warn!("Status of {} is indeterminate: {}", handle, e);
                Ok(StatusReply::Indeterminate {
                    last_known: table.last_status(handle),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn job_command(&self, experiment: &str, id: &NodeId) -> Vec<String> {
        let cycle = surfexp_core::compact_dtg(&id.cycle);
        let mut command = Vec::with_capacity(self.task_command.len() + 1);
        for arg in &self.task_command {
            if arg == "{member}" {
                if let Some(member) = id.member {
                    command.push("--member".to_string());
                    command.push(member.0.to_string());
                }
                continue;
            }
            let mut arg = arg
                .replace("{task}", id.kind.as_str())
                .replace("{cycle}", &cycle)
                .replace("{experiment}", experiment);
            if let Some(member) = id.member {
                arg = arg.replace("{member}", &member.0.to_string());
            }
            command.push(arg);
        }
        command
    }

    async fn retrying<T, F, Fut>(
        &self,
        operation: &str,
        retryable: impl Fn(&BatchError) -> bool,
        mut call: F,
    ) -> std::result::Result<T, BatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BatchError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.retry.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(BatchError::Timeout(self.retry.call_timeout)),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_attempts && retryable(&e) => {
                    let delay = self.retry.delay(attempt);
                    warn!("{} attempt {} failed: {}, retrying in {:?}", operation, attempt, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use surfexp_core::{parse_dtg, MemberId, TaskKind, TaskNode};
    use surfexp_storage::JsonStorage;

    /// In-memory batch system with scripted failures.
    #[derive(Default)]
    struct MockBatch {
        submitted: Mutex<Vec<JobRequest>>,
        statuses: Mutex<BTreeMap<String, TaskStatus>>,
        killed: Mutex<Vec<String>>,
        fail_submit_of: Option<TaskKind>,
        submit_delay: Option<Duration>,
        transient_failures: Mutex<u32>,
        status_unreachable: bool,
    }

    #[async_trait]
    impl BatchSystem for MockBatch {
        async fn submit(&self, job: &JobRequest) -> std::result::Result<SchedulerHandle, BatchError> {
            {
                let mut remaining = self.transient_failures.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(BatchError::Communication("connection refused".into()));
                }
            }
            if let Some(delay) = self.submit_delay {
                self.submitted.lock().unwrap().push(job.clone());
                tokio::time::sleep(delay).await;
                return Ok(SchedulerHandle::new("late"));
            }
            if Some(job.node.kind) == self.fail_submit_of {
                return Err(BatchError::Rejected("queue closed".into()));
            }
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(job.clone());
            let handle = format!("job{}", submitted.len());
            self.statuses.lock().unwrap().insert(handle.clone(), TaskStatus::Pending);
            Ok(SchedulerHandle::new(handle))
        }

        async fn kill(&self, handle: &SchedulerHandle) -> std::result::Result<(), BatchError> {
            self.killed.lock().unwrap().push(handle.to_string());
            Ok(())
        }

        async fn status(&self, handle: &SchedulerHandle) -> std::result::Result<TaskStatus, BatchError> {
            if self.status_unreachable {
                return Err(BatchError::Communication("no route".into()));
            }
            self.statuses
                .lock()
                .unwrap()
                .get(handle.as_str())
                .copied()
                .ok_or_else(|| BatchError::UnknownHandle(handle.clone()))
        }
    }

    fn suite() -> SuiteDefinition {
        let cycle = parse_dtg("2022020100").unwrap();
        let mut suite = SuiteDefinition::new("demo");
        let prep = NodeId::new(TaskKind::Prep, cycle, None);
        let forcing = NodeId::new(TaskKind::Forcing, cycle, None);
        let forecast = NodeId::new(TaskKind::Forecast, cycle, None);
        suite.insert(TaskNode::new(prep)).unwrap();
        suite.insert(TaskNode::new(forcing)).unwrap();
        let mut node = TaskNode::new(forecast);
        node.predecessors = vec![prep, forcing];
        suite.insert(node).unwrap();
        suite
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_call_timeout(Duration::from_secs(5))
    }

    async fn gateway(batch: Arc<MockBatch>) -> (SchedulerGateway<JsonStorage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        (SchedulerGateway::new(batch, storage).with_retry(fast()), dir)
    }

    #[tokio::test]
    async fn test_submit_in_topological_order_once() {
        let batch = Arc::new(MockBatch::default());
        let (gw, _dir) = gateway(batch.clone()).await;
        let report = gw.submit(&suite()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.handles.len(), 3);

        {
            let submitted = batch.submitted.lock().unwrap();
            let forecast = submitted.iter().find(|j| j.node.kind == TaskKind::Forecast).unwrap();
            assert_eq!(forecast.dependencies, vec![SchedulerHandle::new("job1"), SchedulerHandle::new("job2")]);
            assert_eq!(forecast.command, vec!["surfexp", "run-task", "--task", "forecast", "--cycle", "202202010000"]);
            assert_eq!(forecast.name, "demo/202202010000/-/forecast");
        }

        let again = gw.submit(&suite()).await.unwrap();
        assert!(again.submitted.is_empty());
        assert_eq!(again.already_submitted.len(), 3);
        assert_eq!(batch.submitted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_partial_failure_holds_dependents_only() {
        let batch = Arc::new(MockBatch {
            fail_submit_of: Some(TaskKind::Forcing),
            ..Default::default()
        });
        let (gw, _dir) = gateway(batch.clone()).await;
        let report = gw.submit(&suite()).await.unwrap();
        let cycle = parse_dtg("2022020100").unwrap();
        assert_eq!(report.submitted, vec![NodeId::new(TaskKind::Prep, cycle, None)]);
        assert!(report.failed.contains_key(&NodeId::new(TaskKind::Forcing, cycle, None)));
        assert_eq!(
            report.held.get(&NodeId::new(TaskKind::Forecast, cycle, None)),
            Some(&NodeId::new(TaskKind::Forcing, cycle, None))
        );
    }

    #[tokio::test]
    async fn test_transient_submit_failures_are_retried() {
        let batch = Arc::new(MockBatch {
            transient_failures: Mutex::new(2),
            ..Default::default()
        });
        let (gw, _dir) = gateway(batch.clone()).await;
        let report = gw.submit(&suite()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(batch.submitted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_kill_of_completed_task_keeps_terminal_status() {
        let batch = Arc::new(MockBatch::default());
        let (gw, _dir) = gateway(batch.clone()).await;
        gw.submit(&suite()).await.unwrap();
        let handle = SchedulerHandle::new("job1");
        batch.statuses.lock().unwrap().insert("job1".into(), TaskStatus::Succeeded);
        assert_eq!(gw.status(&handle).await.unwrap(), StatusReply::Known(TaskStatus::Succeeded));

        // the batch system forgets finished jobs
        batch.statuses.lock().unwrap().remove("job1");
        gw.kill(&handle).await.unwrap();
        assert!(batch.killed.lock().unwrap().is_empty());
        assert_eq!(gw.status(&handle).await.unwrap(), StatusReply::Known(TaskStatus::Succeeded));

        gw.kill(&SchedulerHandle::new("job2")).await.unwrap();
        assert_eq!(*batch.killed.lock().unwrap(), vec!["job2".to_string()]);
        assert_eq!(
            gw.status(&SchedulerHandle::new("job2")).await.unwrap(),
            StatusReply::Known(TaskStatus::Aborted)
        );
    }

    #[tokio::test]
    async fn test_kill_of_forgotten_finished_job_is_a_no_op() {
        let batch = Arc::new(MockBatch::default());
        let (gw, _dir) = gateway(batch.clone()).await;
        gw.submit(&suite()).await.unwrap();
        // finished and dropped from the listing before anyone polled
        batch.statuses.lock().unwrap().remove("job1");

        gw.kill(&SchedulerHandle::new("job1")).await.unwrap();
        assert!(batch.killed.lock().unwrap().is_empty());
        assert!(matches!(
            gw.kill(&SchedulerHandle::new("stranger")).await,
            Err(GatewayError::Batch(BatchError::UnknownHandle(_)))
        ));
    }

    #[tokio::test]
    async fn test_timed_out_submit_is_never_resent() {
        let batch = Arc::new(MockBatch {
            submit_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        let gw = SchedulerGateway::new(batch.clone(), storage)
            .with_retry(fast().with_call_timeout(Duration::from_millis(20)));
        let mut suite = SuiteDefinition::new("demo");
        let cycle = parse_dtg("2022020100").unwrap();
        let prep = NodeId::new(TaskKind::Prep, cycle, None);
        let forecast = NodeId::new(TaskKind::Forecast, cycle, None);
        suite.insert(TaskNode::new(prep)).unwrap();
        let mut node = TaskNode::new(forecast);
        node.predecessors = vec![prep];
        suite.insert(node).unwrap();

        let first = gw.submit(&suite).await.unwrap();
        assert!(first.indeterminate.contains_key(&prep));
        assert!(first.failed.is_empty());
        assert_eq!(first.held.get(&forecast), Some(&prep));
        assert!(!first.is_complete());

        let second = gw.submit(&suite).await.unwrap();
        assert!(second.submitted.is_empty());
        assert!(second.indeterminate.contains_key(&prep));
        assert_eq!(second.held.get(&forecast), Some(&prep));
        assert_eq!(batch.submitted.lock().unwrap().len(), 1);

        // the operator found the job under its handle
        gw.confirm(&prep, SchedulerHandle::new("4711")).await.unwrap();
        assert_eq!(gw.handle_for(&prep).await.unwrap(), SchedulerHandle::new("4711"));
        assert!(matches!(gw.discard(&prep).await, Err(GatewayError::NotUnconfirmed(_))));
    }

    #[tokio::test]
    async fn test_discarded_submission_is_sent_again() {
        let batch = Arc::new(MockBatch::default());
        let (gw, dir) = gateway(batch.clone()).await;
        let prep = NodeId::new(TaskKind::Prep, parse_dtg("2022020100").unwrap(), None);
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        let mut table = storage.load_handles().await.unwrap();
        table.mark_unconfirmed(prep, "timed out");
        storage.save_handles(&table).await.unwrap();

        let report = gw.submit(&suite()).await.unwrap();
        assert!(!report.submitted.contains(&prep));
        gw.discard(&prep).await.unwrap();
        let report = gw.submit(&suite()).await.unwrap();
        assert!(report.submitted.contains(&prep));
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_unreachable_status_is_indeterminate() {
        let batch = Arc::new(MockBatch {
            status_unreachable: true,
            ..Default::default()
        });
        let (gw, _dir) = gateway(batch.clone()).await;
        gw.submit(&suite()).await.unwrap();
        let reply = gw.status(&SchedulerHandle::new("job3")).await.unwrap();
        assert_eq!(reply, StatusReply::Indeterminate { last_known: None });
    }

    #[tokio::test]
    async fn test_select_and_member_command() {
        let batch = Arc::new(MockBatch::default());
        let (gw, _dir) = gateway(batch.clone()).await;
        let cycle = parse_dtg("2022020100").unwrap();
        let mut suite = SuiteDefinition::new("demo");
        suite
            .insert(TaskNode::new(NodeId::new(TaskKind::Prep, cycle, Some(MemberId(2)))))
            .unwrap();
        gw.submit(&suite).await.unwrap();
        assert_eq!(
            batch.submitted.lock().unwrap()[0].command,
            vec!["surfexp", "run-task", "--task", "prep", "--cycle", "202202010000", "--member", "2"]
        );
        let selected = gw
            .select(&TaskSelector::new("demo", cycle).member(MemberId(2)))
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert!(matches!(
            gw.handle_for(&NodeId::new(TaskKind::Prep, cycle, None)).await,
            Err(GatewayError::NotSubmitted(_))
        ));
    }
}
