// src/pipeline/sink.rs

use std::sync::{Arc, OnceLock};

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::flow::FlowCounter;
use super::interval::IntervalTrigger;
use super::registry::Registry;
use super::types::{PipelineError, RecordError, SourceReport};
use crate::operation::{ActionError, ExtractAction, LoadAction, OperationDefinition, Phase, TransformAction};
use crate::store::{is_empty_record, Record, StoreHandle};

struct LoadStep<'a> {
    alias: &'a str,
    index: usize,
    store: &'a StoreHandle,
    action: &'a dyn LoadAction,
}

/// Receives the records of one extraction action.
///
/// Each record runs through the source's transforms, then every load action
/// in declaration order, then any interval actions that are due. The first
/// failure is terminal: later records are rejected and the source finalizes
/// with that error once every in-flight record has settled.
pub struct RecordSink<'a> {
    operation: &'a str,
    alias: &'a str,
    index: usize,
    source: &'a StoreHandle,
    registry: &'a Registry,
    transforms: &'a [Arc<dyn TransformAction>],
    loads: Vec<LoadStep<'a>>,
    intervals: IntervalTrigger<'a>,
    counter: FlowCounter,
    terminal: OnceLock<RecordError>,
    verbose: bool,
}

impl<'a> RecordSink<'a> {
    pub(crate) fn new(
        definition: &'a OperationDefinition,
        alias: &'a str,
        index: usize,
        source: &'a StoreHandle,
        registry: &'a Registry,
    ) -> Self {
        let stores = definition.stores();
        let loads = definition
            .load()
            .iter()
            .filter_map(|(alias, actions)| stores.get(alias).map(|store| (alias, store, actions)))
            .flat_map(|(alias, store, actions)| {
                actions.iter().enumerate().map(move |(index, action)| LoadStep {
                    alias,
                    index,
                    store,
                    action: action.as_ref(),
                })
            })
            .collect();

        RecordSink {
            operation: definition.label(),
            alias,
            index,
            source,
            registry,
            transforms: definition.transform().get(alias),
            loads,
            intervals: IntervalTrigger::new(definition.interval(), stores),
            counter: FlowCounter::new(),
            terminal: OnceLock::new(),
            verbose: definition.is_verbose(),
        }
    }

    /// Alias of the source store.
    pub fn alias(&self) -> &str {
        self.alias
    }

    pub fn counter(&self) -> &FlowCounter {
        &self.counter
    }

    /// The error that terminated this source, if any.
    pub fn terminal_error(&self) -> Option<&RecordError> {
        self.terminal.get()
    }

    /// Runs one record through transforms, loads and interval actions.
    ///
    /// Returning is the signal that the next record may be read. A
    /// `Value::Null` record is ignored.
    pub async fn process(&self, record: Record) -> Result<(), RecordError> {
        if is_empty_record(&record) {
            return Ok(());
        }
        if let Some(err) = self.terminal.get() {
            return Err(err.clone());
        }

        let ticket = self.counter.begin();
        if let Err(err) = self.deliver(record).await {
            ticket.fail();
            return Err(self.terminate(err));
        }

        // another record may have turned the source terminal meanwhile
        if let Some(err) = self.terminal.get() {
            ticket.fail();
            return Err(err.clone());
        }
        let writes = ticket.complete();
        self.report_progress(writes);
        self.intervals
            .fire(writes, self.registry)
            .await
            .map_err(|err| self.terminate(err))
    }

    async fn deliver(&self, record: Record) -> Result<(), RecordError> {
        let mut record = record;
        for (index, transform) in self.transforms.iter().enumerate() {
            record = transform
                .transform(self.source, self.registry, record)
                .map_err(|err| RecordError::new(Phase::Transform, self.alias, index, err))?;
        }
        if is_empty_record(&record) {
            trace!(source = self.alias, "record dropped by transform");
            return Ok(());
        }

        for step in &self.loads {
            if let Some(err) = self.terminal.get() {
                return Err(err.clone());
            }
            step.action
                .load(step.store, self.registry, &record)
                .await
                .map_err(|err| RecordError::new(Phase::Load, step.alias, step.index, err))?;
        }
        Ok(())
    }

    fn terminate(&self, err: RecordError) -> RecordError {
        if self.terminal.set(err.clone()).is_ok() {
            warn!(
                operation = self.operation,
                source = self.alias,
                error = %err,
                "record failed, stopping source"
            );
        }
        err
    }

    fn report_progress(&self, writes: u64) {
        let reads = self.counter.reads();
        let percent = (writes as f64 * 1000.0 / reads.max(1) as f64).round() / 10.0;
        let throughput = self.counter.throughput().unwrap_or_default().round();
        if self.verbose {
            info!(
                operation = self.operation,
                source = self.alias,
                reads,
                writes,
                percent,
                throughput,
                "progress"
            );
        } else {
            trace!(operation = self.operation, source = self.alias, reads, writes, "progress");
        }
    }

    /// Failures without a terminal error come from records whose `process`
    /// future was dropped before their loads settled.
    fn abandoned(&self) -> RecordError {
        let message = format!(
            "{} record(s) abandoned before their loads settled",
            self.counter.failures()
        );
        RecordError::new(Phase::Load, self.alias, self.index, ActionError::new(message))
    }

    /// Runs `action` to completion, then waits for read/write parity.
    pub(crate) async fn drive(
        &self,
        action: &dyn ExtractAction,
    ) -> (SourceReport, Option<PipelineError>) {
        let started = Instant::now();
        let result = action.extract(self.source, self.registry, self).await;

        if !self.counter.is_balanced() {
            debug!(
                source = self.alias,
                in_flight = self.counter.in_flight(),
                "waiting for outstanding loads"
            );
            self.counter.wait_balanced().await;
        }

        // a record failure outranks whatever the action itself returned
        let error = match (self.terminal.get(), result) {
            (Some(err), _) => Some(PipelineError::Record(err.clone())),
            (None, _) if self.counter.failures() > 0 => {
                let err = self.abandoned();
                warn!(operation = self.operation, source = self.alias, error = %err, "records abandoned");
                Some(PipelineError::Record(err))
            }
            (None, Err(err)) => Some(PipelineError::Action {
                phase: Phase::Extract,
                alias: self.alias.to_string(),
                index: self.index,
                source: err,
            }),
            (None, Ok(())) => None,
        };

        let report = SourceReport {
            alias: self.alias.to_string(),
            index: self.index,
            reads: self.counter.reads(),
            writes: self.counter.writes(),
            failures: self.counter.failures(),
            elapsed: started.elapsed(),
            throughput: self.counter.throughput(),
        };
        (report, error)
    }
}
