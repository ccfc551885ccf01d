// src/pipeline/executor.rs

use futures::future::join_all;
use tracing::{debug, error, info};

use super::registry::Registry;
use super::sink::RecordSink;
use super::types::{PipelineError, RunReport, SourceReport};
use crate::operation::{LifecycleAction, OperationDefinition, Phase, PhaseActions};

/// Runs the lifecycle of one [`OperationDefinition`].
///
/// # Lifecycle
///
/// 1. inactive operations complete immediately
/// 2. every store connects concurrently
/// 3. init actions run in series
/// 4. every extraction action runs concurrently until drained
/// 5. exit actions run in series, unless connecting failed
///
/// Stores stay connected after [`run`](Self::run); [`close`](Self::close)
/// releases them.
#[derive(Debug)]
pub struct PipelineExecutor {
    definition: OperationDefinition,
}

impl PipelineExecutor {
    pub fn new(definition: OperationDefinition) -> Self {
        PipelineExecutor { definition }
    }

    pub fn name(&self) -> &str {
        self.definition.label()
    }

    pub fn definition(&self) -> &OperationDefinition {
        &self.definition
    }

    /// Executes one run. The earliest error wins; exit failures are logged
    /// and only surface when nothing failed before them.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let name = self.name();
        if !self.definition.is_active() {
            info!(operation = name, "operation inactive, skipping");
            return Ok(RunReport {
                operation: name.to_string(),
                skipped: true,
                sources: Vec::new(),
            });
        }

        self.connect_all().await?;

        let registry = Registry::new();
        debug!(operation = name, started_at = %registry.started_at(), "run started");

        let mut sources = Vec::new();
        let mut failure = self
            .run_lifecycle(Phase::Init, self.definition.init(), &registry)
            .await
            .err();
        if failure.is_none() {
            let (reports, error) = self.run_extract(&registry).await;
            sources = reports;
            failure = error;
        }

        if let Err(err) = self
            .run_lifecycle(Phase::Exit, self.definition.exit(), &registry)
            .await
        {
            match &failure {
                Some(_) => error!(operation = name, error = %err, "exit phase failed"),
                None => failure = Some(err),
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                let report = RunReport {
                    operation: name.to_string(),
                    skipped: false,
                    sources,
                };
                info!(
                    operation = name,
                    reads = report.reads(),
                    writes = report.writes(),
                    "run completed"
                );
                Ok(report)
            }
        }
    }

    /// Closes every store concurrently, returning the first close error.
    pub async fn close(&self) -> Result<(), PipelineError> {
        let results = join_all(self.definition.stores().iter().map(|store| async move {
            (store.alias(), store.close().await)
        }))
        .await;

        let mut first = None;
        for (alias, result) in results {
            if let Err(err) = result {
                error!(operation = self.name(), store = alias, error = %err, "failed to close store");
                first.get_or_insert(PipelineError::Close {
                    alias: alias.to_string(),
                    source: err,
                });
            }
        }
        first.map_or(Ok(()), Err)
    }

    async fn connect_all(&self) -> Result<(), PipelineError> {
        let results = join_all(self.definition.stores().iter().map(|store| async move {
            (store.alias(), store.connect().await)
        }))
        .await;

        for (alias, result) in results {
            if let Err(err) = result {
                error!(operation = self.name(), store = alias, error = %err, "failed to connect store");
                return Err(PipelineError::Connect {
                    alias: alias.to_string(),
                    source: err,
                });
            }
        }
        Ok(())
    }

    async fn run_lifecycle(
        &self,
        phase: Phase,
        actions: &PhaseActions<dyn LifecycleAction>,
        registry: &Registry,
    ) -> Result<(), PipelineError> {
        let stores = self.definition.stores();
        for (alias, actions) in actions.iter() {
            let Some(store) = stores.get(alias) else {
                continue;
            };
            for (index, action) in actions.iter().enumerate() {
                debug!(operation = self.name(), %phase, store = alias, index, "running action");
                if let Err(err) = action.run(store, registry).await {
                    let err = PipelineError::Action {
                        phase,
                        alias: alias.to_string(),
                        index,
                        source: err,
                    };
                    error!(operation = self.name(), error = %err, "lifecycle action failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Drives every extraction action concurrently and waits for all of
    /// them to drain. Returns the earliest error in declaration order.
    async fn run_extract(&self, registry: &Registry) -> (Vec<SourceReport>, Option<PipelineError>) {
        let stores = self.definition.stores();
        let runs = self.definition.extract().iter().flat_map(|(alias, actions)| {
            let store = stores.get(alias);
            actions
                .iter()
                .enumerate()
                .filter_map(move |(index, action)| store.map(|store| (alias, index, store, action)))
        });

        let outcomes = join_all(runs.map(|(alias, index, store, action)| async move {
            let sink = RecordSink::new(&self.definition, alias, index, store, registry);
            sink.drive(action.as_ref()).await
        }))
        .await;

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut failure = None;
        for (report, error) in outcomes {
            debug!(
                operation = self.name(),
                source = %report.alias,
                reads = report.reads,
                writes = report.writes,
                failures = report.failures,
                "source drained"
            );
            if let Some(err) = error {
                error!(operation = self.name(), error = %err, "extraction failed");
                failure.get_or_insert(err);
            }
            reports.push(report);
        }
        (reports, failure)
    }
}
