use tracing::{debug, info, warn};

use super::{
    ExecutionSummary, Stage, TerminationKind, TerminationReason, ValidationOutcome, WorkflowState,
};
use crate::collaborators::{
    ConfirmationGate, Executor, Exporter, GateDecision, GateKind, Interpretation, Interpreter,
    RewriteRequest, Rewriter,
};
use crate::measures::{MeasureStore, resolve};
use crate::schema::SchemaCatalog;
use crate::sql::{assemble, validate};

/// External services the controller talks to, passed in at construction.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub interpreter: &'a dyn Interpreter,
    pub rewriter: &'a dyn Rewriter,
    pub executor: &'a dyn Executor,
    pub exporter: &'a dyn Exporter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("workflow is not waiting at a confirmation gate (stage: {stage})")]
pub struct NotAtGate {
    pub stage: Stage,
}

/// Drives a `WorkflowState` through the pipeline.
///
/// Every transition takes the current state by value and returns the next
/// one. The controller holds no per-query data, so one instance can serve any
/// number of independent sessions.
pub struct WorkflowController<'a> {
    store: &'a MeasureStore,
    catalog: &'a SchemaCatalog,
    collaborators: Collaborators<'a>,
}

impl<'a> WorkflowController<'a> {
    #[must_use]
    pub fn new(
        store: &'a MeasureStore,
        catalog: &'a SchemaCatalog,
        collaborators: Collaborators<'a>,
    ) -> Self {
        Self {
            store,
            catalog,
            collaborators,
        }
    }

    /// Performs the single transition out of `state.stage`. Gate and terminal
    /// stages are returned unchanged.
    #[must_use]
    pub fn step(&self, state: WorkflowState) -> WorkflowState {
        match state.stage {
            Stage::Input => self.identify(state),
            Stage::MeasuresIdentified => self.rewrite(state),
            Stage::QueryRewritten => {
                info!("suspending at rewrite confirmation gate");
                transition(state, Stage::AwaitingRewriteConfirmation)
            }
            Stage::MeasuresResolved => self.generate(state),
            Stage::SqlGenerated => {
                if state.sql_review_enabled {
                    info!("suspending at SQL confirmation gate");
                    transition(state, Stage::AwaitingSqlConfirmation)
                } else {
                    debug!("SQL review disabled; validating directly");
                    self.validate_and_execute(state)
                }
            }
            Stage::AwaitingRewriteConfirmation
            | Stage::AwaitingSqlConfirmation
            | Stage::Executed
            | Stage::Aborted
            | Stage::Rejected => state,
        }
    }

    /// Steps until the workflow suspends at a gate or terminates.
    #[must_use]
    pub fn advance(&self, mut state: WorkflowState) -> WorkflowState {
        while !state.is_terminal() && state.stage.gate().is_none() {
            state = self.step(state);
        }
        state
    }

    /// Resumes a suspended workflow with the human's decision and performs
    /// the transition out of the gate.
    pub fn apply_decision(
        &self,
        state: WorkflowState,
        decision: GateDecision,
    ) -> Result<WorkflowState, NotAtGate> {
        match state.stage.gate() {
            Some(kind) => Ok(self.decide(state, kind, decision)),
            None => Err(NotAtGate { stage: state.stage }),
        }
    }

    /// Runs the whole pipeline, asking `gate` at each suspension.
    #[must_use]
    pub fn run_to_completion(
        &self,
        state: WorkflowState,
        gate: &dyn ConfirmationGate,
    ) -> WorkflowState {
        let mut state = self.advance(state);
        loop {
            let Some((kind, payload)) = state
                .gate_payload()
                .map(|(kind, payload)| (kind, payload.to_string()))
            else {
                return state;
            };

            state = match gate.confirm(kind, &payload) {
                Ok(decision) => self.advance(self.decide(state, kind, decision)),
                Err(error) => reject(state, TerminationKind::GateFailed, error.to_string(), Vec::new()),
            };
        }
    }

    fn decide(&self, state: WorkflowState, kind: GateKind, decision: GateDecision) -> WorkflowState {
        info!(gate = %kind, ?decision, "gate decision received");
        match (kind, decision) {
            (_, GateDecision::Cancel) => {
                let message = format!("cancelled at the {kind} confirmation gate");
                abort(state, message)
            }
            (GateKind::Rewrite, GateDecision::Confirm) => self.resolve_measures(state),
            (GateKind::Rewrite, GateDecision::ConfirmEdited(text)) => {
                let text = text.trim().to_string();
                if text.is_empty() || state.rewritten_query.as_deref() == Some(text.as_str()) {
                    return self.resolve_measures(state);
                }
                self.reinterpret(state, text)
            }
            (GateKind::Sql, GateDecision::Confirm) => self.validate_and_execute(state),
            (GateKind::Sql, GateDecision::ConfirmEdited(sql)) => {
                let state = WorkflowState {
                    generated_sql: Some(sql),
                    sql_edited: true,
                    ..state
                };
                self.validate_and_execute(state)
            }
        }
    }

    fn identify(&self, state: WorkflowState) -> WorkflowState {
        let description = self.catalog.describe(&self.store.snapshot());
        info!(query = %state.raw_query, "identifying measures and dimensions");

        match self
            .collaborators
            .interpreter
            .interpret(&state.raw_query, &description)
        {
            Ok(interpretation) => {
                debug!(?interpretation, "interpretation received");
                let state = WorkflowState {
                    candidates: interpretation.measures,
                    dimensions: interpretation.dimensions,
                    filters: interpretation.filters,
                    ..state
                };
                transition(state, Stage::MeasuresIdentified)
            }
            Err(error) => reject(
                state,
                TerminationKind::InterpretationFailed,
                error.to_string(),
                Vec::new(),
            ),
        }
    }

    fn rewrite(&self, state: WorkflowState) -> WorkflowState {
        let index = self.store.snapshot();
        let known = resolve(&state.candidates, &index).matched;
        let interpretation = Interpretation {
            measures: state.candidates.clone(),
            dimensions: state.dimensions.clone(),
            filters: state.filters.clone(),
        };
        let request = RewriteRequest {
            raw_query: &state.raw_query,
            interpretation: &interpretation,
            known_measures: &known,
        };

        match self.collaborators.rewriter.rewrite(&request) {
            Ok(rewritten) => {
                let state = WorkflowState {
                    rewritten_query: Some(rewritten),
                    ..state
                };
                transition(state, Stage::QueryRewritten)
            }
            Err(error) => reject(
                state,
                TerminationKind::RewriteFailed,
                error.to_string(),
                Vec::new(),
            ),
        }
    }

    /// The edited rewrite replaces the original; candidates come from
    /// interpreting the edited text.
    fn reinterpret(&self, state: WorkflowState, edited: String) -> WorkflowState {
        let description = self.catalog.describe(&self.store.snapshot());
        info!("rewrite edited at gate; re-identifying measures");

        match self
            .collaborators
            .interpreter
            .interpret(&edited, &description)
        {
            Ok(interpretation) => {
                let state = WorkflowState {
                    rewritten_query: Some(edited),
                    rewrite_edited: true,
                    candidates: interpretation.measures,
                    dimensions: interpretation.dimensions,
                    filters: interpretation.filters,
                    ..state
                };
                self.resolve_measures(state)
            }
            Err(error) => {
                let state = WorkflowState {
                    rewritten_query: Some(edited),
                    rewrite_edited: true,
                    ..state
                };
                reject(
                    state,
                    TerminationKind::InterpretationFailed,
                    error.to_string(),
                    Vec::new(),
                )
            }
        }
    }

    fn resolve_measures(&self, state: WorkflowState) -> WorkflowState {
        if state.candidates.is_empty() {
            return reject(
                state,
                TerminationKind::UnresolvedMeasures,
                "no measure candidates were identified in the query".to_string(),
                Vec::new(),
            );
        }

        let resolution = resolve(&state.candidates, &self.store.snapshot());
        if !resolution.is_complete() {
            let message = format!(
                "unknown measure(s): {}; rephrase or add a measure config",
                resolution.unmatched.join(", ")
            );
            let offending = resolution.unmatched.clone();
            let state = WorkflowState {
                unresolved_candidates: resolution.unmatched,
                ..state
            };
            return reject(state, TerminationKind::UnresolvedMeasures, message, offending);
        }

        let dimensions = self.catalog.resolve_dimensions(&state.dimensions);
        if !dimensions.unmatched.is_empty() {
            let message = format!(
                "unknown dimension(s): {}; use a column of `{}`",
                dimensions.unmatched.join(", "),
                self.catalog.table
            );
            return reject(
                state,
                TerminationKind::UnresolvedDimensions,
                message,
                dimensions.unmatched,
            );
        }

        let state = WorkflowState {
            resolved_measures: resolution.matched,
            group_by: dimensions.columns,
            unresolved_candidates: Vec::new(),
            ..state
        };
        info!(measures = ?state.measure_codes(), group_by = ?state.group_by, "measures resolved");
        transition(state, Stage::MeasuresResolved)
    }

    fn generate(&self, state: WorkflowState) -> WorkflowState {
        match assemble(
            &self.catalog.table,
            &state.resolved_measures,
            &state.group_by,
            &state.filters,
        ) {
            Ok(query) => {
                let sql = query.to_sql();
                debug!(%sql, "SQL assembled");
                let state = WorkflowState {
                    generated_sql: Some(sql),
                    ..state
                };
                transition(state, Stage::SqlGenerated)
            }
            Err(error) => reject(
                state,
                TerminationKind::AssemblyFailed,
                error.to_string(),
                Vec::new(),
            ),
        }
    }

    /// Validation runs on every path to the executor, reviewed or not.
    fn validate_and_execute(&self, state: WorkflowState) -> WorkflowState {
        let sql = state.generated_sql.clone().unwrap_or_default();
        let validated = match validate(&sql) {
            Ok(validated) => validated,
            Err(rejection) => {
                warn!(rule = %rejection.rule, detail = %rejection.detail, "generated SQL rejected");
                let offending = rejection.token.clone().into_iter().collect();
                let state = WorkflowState {
                    validation: Some(ValidationOutcome {
                        accepted: false,
                        rule: Some(rejection.rule),
                        detail: Some(rejection.detail.clone()),
                    }),
                    ..state
                };
                return reject(state, TerminationKind::UnsafeSql, rejection.to_string(), offending);
            }
        };
        let state = WorkflowState {
            validation: Some(ValidationOutcome {
                accepted: true,
                rule: None,
                detail: None,
            }),
            ..state
        };

        info!(sql = %validated, "executing validated SQL");
        let result = match self.collaborators.executor.execute(&validated) {
            Ok(result) => result,
            Err(error) => {
                return reject(
                    state,
                    TerminationKind::ExecutionFailed,
                    error.to_string(),
                    Vec::new(),
                );
            }
        };

        let mut execution = ExecutionSummary {
            row_count: result.row_count(),
            truncated: result.truncated,
            columns: result.columns.clone(),
            export_path: None,
        };
        if let Some(destination) = state.export_path.as_deref() {
            match self.collaborators.exporter.export(&result, destination) {
                Ok(path) => execution.export_path = Some(path),
                Err(error) => {
                    let state = WorkflowState {
                        execution: Some(execution),
                        result: Some(result),
                        ..state
                    };
                    return reject(
                        state,
                        TerminationKind::ExportFailed,
                        error.to_string(),
                        Vec::new(),
                    );
                }
            }
        }

        let state = WorkflowState {
            execution: Some(execution),
            result: Some(result),
            ..state
        };
        transition(state, Stage::Executed)
    }
}

fn transition(state: WorkflowState, next: Stage) -> WorkflowState {
    debug_assert!(next > state.stage, "workflow stages only move forward");
    info!(from = %state.stage, to = %next, "workflow transition");
    WorkflowState {
        stage: next,
        ..state
    }
}

fn reject(
    state: WorkflowState,
    kind: TerminationKind,
    message: String,
    offending: Vec<String>,
) -> WorkflowState {
    warn!(stage = %state.stage, reason = %kind, %message, "workflow rejected");
    let termination = TerminationReason {
        kind,
        stage: state.stage,
        message,
        offending,
    };
    WorkflowState {
        stage: Stage::Rejected,
        termination: Some(termination),
        ..state
    }
}

fn abort(state: WorkflowState, message: String) -> WorkflowState {
    info!(stage = %state.stage, "workflow aborted by user");
    let termination = TerminationReason {
        kind: TerminationKind::UserCancelled,
        stage: state.stage,
        message,
        offending: Vec::new(),
    };
    WorkflowState {
        stage: Stage::Aborted,
        termination: Some(termination),
        ..state
    }
}
