use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::computation::{ComputationRequest, SettlementDisposition};
use crate::config::SettlementConfig;
use crate::error::{LedgerError, RunnerError};
use crate::interpreter::{self, Outcome};
use crate::ledger::{self, Ledger};
use crate::matcher::{self, MatchReport};
use crate::runner::{CreateExecOutcome, ExecHandle, ExecRunner, ExecutionOutcome};

pub const REASON_RESOURCE_MISMATCH: &str = "resource mismatch or insufficient funds";
pub const REASON_PRE_EXECUTION: &str = "pre-execution error";
pub const REASON_FULFILLMENT_REJECTED: &str = "fulfillment rejected";
pub const REASON_RESULT_STORAGE: &str = "result storage failed";

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 500;

// where one request stands in its pipeline pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Validating,
    Executing,
    Interpreting,
    SettlingSuccess,
    SettlingFailure,
    Done,
}

fn advance(stage: &mut Stage, next: Stage, id: &str) {
    debug!("Computation `{id}`: {stage:?} -> {next:?}");
    *stage = next;
}

// transport-level failures are worth another attempt, everything else
// is an answer
trait Transient {
    fn transient(&self) -> bool;
}

impl Transient for LedgerError {
    fn transient(&self) -> bool {
        self.is_retryable()
    }
}

impl Transient for RunnerError {
    fn transient(&self) -> bool {
        self.is_retryable()
    }
}

#[derive(Default)]
struct SettlementState {
    // per-id guards so the two trigger surfaces never settle the same
    // id concurrently
    in_flight: HashMap<String, Arc<tokio::sync::Mutex<()>>>,

    // terminal dispositions; a re-delivered id answers from here
    // without touching the ledger again
    settled: HashMap<String, SettlementDisposition>,
}

/// Sequences validate -> execute -> interpret -> settle for one request
/// at a time per id, and performs exactly one terminal ledger action
/// (commit or revert) per id.
pub struct SettlementController {
    ledger: Arc<dyn Ledger>,
    runner: Arc<dyn ExecRunner>,

    // handed to the sandbox as the last wrapper argument
    requester_public_key: String,

    max_attempts: u32,
    backoff: Duration,

    state: Mutex<SettlementState>,
}

impl SettlementController {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        runner: Arc<dyn ExecRunner>,
        requester_public_key: String,
        config: &SettlementConfig,
    ) -> SettlementController {
        SettlementController {
            ledger,
            runner,
            requester_public_key,
            max_attempts: config.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1),
            backoff: Duration::from_millis(config.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
            state: Mutex::new(SettlementState::default()),
        }
    }

    /// Whether a terminal settlement action has already been applied
    /// for this id.
    pub fn is_settled(&self, id: &str) -> bool {
        self.state.lock().unwrap().settled.contains_key(id)
    }

    /// Drive one request to a terminal disposition. Safe under
    /// at-least-once delivery: a replayed id returns its recorded
    /// disposition without any further ledger call.
    pub async fn settle(&self, request: ComputationRequest) -> SettlementDisposition {
        let id = request.computation_id.clone();
        let guard = self.guard_for(&id);
        let _held = guard.lock().await;

        if let Some(done) = self.recorded(&id) {
            info!("Computation `{id}` is already settled, nothing to do.");
            return done;
        }
        let disposition = self.run_pipeline(&request).await;
        self.record(&id, disposition.clone());
        disposition
    }

    async fn run_pipeline(&self, request: &ComputationRequest) -> SettlementDisposition {
        let mut stage = Stage::Received;
        let disposition = self.drive(request, &mut stage).await;
        advance(&mut stage, Stage::Done, &request.computation_id);
        disposition
    }

    async fn drive(
        &self,
        request: &ComputationRequest,
        stage: &mut Stage,
    ) -> SettlementDisposition {
        let id = request.computation_id.as_str();
        let owner = request.result_owner.as_str();

        advance(stage, Stage::Validating, id);
        let report = match self
            .with_retries("Resource matching", || {
                matcher::match_resources(self.ledger.as_ref(), self.runner.as_ref(), request)
            })
            .await
        {
            Ok(report) => report,

            Err(e) => {
                // cannot verify the request, so the funds go back
                warn!("Resource matching for `{id}` failed: `{e}`");
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, REASON_RESOURCE_MISMATCH).await;
            }
        };
        if !report.is_valid() {
            warn!("Computation `{id}` cannot be placed: {}", describe(&report));
            advance(stage, Stage::SettlingFailure, id);
            return self.settle_failure(id, owner, REASON_RESOURCE_MISMATCH).await;
        }

        advance(stage, Stage::Executing, id);
        let exec = match self
            .with_retries("Exec creation", || {
                self.runner.create_exec(
                    &report.artifacts.execution_unit,
                    &report.artifacts.dataset_address,
                    &report.artifacts.software_address,
                    &self.requester_public_key,
                )
            })
            .await
        {
            Ok(CreateExecOutcome::Created(handle)) => handle,

            Ok(CreateExecOutcome::Rejected { code, message }) => {
                // the computation never ran
                warn!("Runtime refused the exec for `{id}` ({code}): {message}");
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, REASON_PRE_EXECUTION).await;
            }

            Err(e) => {
                warn!("Exec creation for `{id}` failed: `{e}`");
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, REASON_PRE_EXECUTION).await;
            }
        };

        advance(stage, Stage::Interpreting, id);
        let outcome = match self
            .with_retries("Exec start", || self.runner.run_exec(&exec))
            .await
        {
            Ok(ExecutionOutcome::RawOutput(raw)) => interpreter::interpret(&raw),

            Ok(ExecutionOutcome::RuntimeFailure { code, message }) => {
                warn!("Exec `{}` for `{id}` failed to start ({code}).", exec.id);
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, &message).await;
            }

            Err(e) => {
                warn!("Exec start for `{id}` failed: `{e}`");
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, &e.to_string()).await;
            }
        };

        match outcome {
            Outcome::KnownError { code, message } => {
                // a definitive answer from the computation itself,
                // recorded verbatim and never retried
                warn!("Computation `{id}` reported code {code}: {message}");
                advance(stage, Stage::SettlingFailure, id);
                self.settle_failure(id, owner, message).await
            }

            Outcome::Success { address } => {
                advance(stage, Stage::SettlingSuccess, id);
                self.settle_success(request, &address, stage).await
            }
        }
    }

    async fn settle_success(
        &self,
        request: &ComputationRequest,
        address: &str,
        stage: &mut Stage,
    ) -> SettlementDisposition {
        let id = request.computation_id.as_str();
        let owner = request.result_owner.as_str();

        // the payment commit is the gate that authorizes result storage
        match self
            .with_retries("Payment commit", || self.ledger.computation_succeed(id))
            .await
        {
            Ok(()) => {}

            Err(e @ LedgerError::Transport(_)) => {
                // retries are exhausted and the commit may or may not
                // have landed on the chain
                error!(
                    "Payment commit for `{id}` could not be confirmed: `{e}`. \
                     Manual reconciliation may be required."
                );
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, REASON_FULFILLMENT_REJECTED).await;
            }

            Err(e) => {
                warn!("Ledger refused the payment for `{id}`: `{e}`");
                advance(stage, Stage::SettlingFailure, id);
                return self.settle_failure(id, owner, REASON_FULFILLMENT_REJECTED).await;
            }
        }

        let stored = match ledger::result_to_bytes32(address) {
            Ok(bytes) => {
                self.with_retries("Result storage", || {
                    self.ledger.add_result_info(owner, bytes)
                })
                .await
            }
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            // payment is already committed, so this failure has to
            // revert it; an implicit leftover commit would strand the
            // requester's funds with no stored result
            warn!(
                "Failed to store the result for `{id}`: `{e}`. \
                 Reverting the committed payment."
            );
            advance(stage, Stage::SettlingFailure, id);
            return self.settle_failure(id, owner, REASON_RESULT_STORAGE).await;
        }

        info!("Computation `{id}` settled, result `{address}` stored for `{owner}`.");
        SettlementDisposition::Committed(address.to_string())
    }

    // record the reason, then return the funds; both writes are
    // attempted even if the first fails
    async fn settle_failure(
        &self,
        id: &str,
        owner: &str,
        reason: &str,
    ) -> SettlementDisposition {
        if let Err(e) = self
            .with_retries("Error recording", || self.ledger.result_error(owner, reason))
            .await
        {
            error!("Could not record the error for `{id}`: `{e}`");
        }
        match self
            .with_retries("Payment revert", || self.ledger.computation_failed(id))
            .await
        {
            Ok(()) => info!("Funds for `{id}` returned to the requester."),

            Err(e) => error!(
                "Could not revert the payment for `{id}`: `{e}`. \
                 Funds are in an ambiguous state until reconciled by an operator."
            ),
        }
        SettlementDisposition::Reverted(reason.to_string())
    }

    /// Create an exec on behalf of the synchronous trigger. The caller
    /// supplies the artifacts directly; registry validation belongs to
    /// the event path.
    pub async fn prepare_execution(
        &self,
        unit: &str,
        dataset_artifact: &str,
        software_artifact: &str,
        requester_key: &str,
    ) -> Result<ExecHandle, String> {
        match self
            .with_retries("Exec creation", || {
                self.runner
                    .create_exec(unit, dataset_artifact, software_artifact, requester_key)
            })
            .await
        {
            Ok(CreateExecOutcome::Created(handle)) => Ok(handle),
            Ok(CreateExecOutcome::Rejected { message, .. }) => Err(message.to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Reduced pipeline behind the synchronous trigger: start the exec,
    /// interpret its output, and commit or revert the referenced
    /// payment. No result storage happens on this path; the payment id
    /// is the caller's settlement key and is narrower than the event
    /// path's computation id.
    pub async fn settle_execution(
        &self,
        exec_id: &str,
        payment_id: &str,
    ) -> SettlementDisposition {
        let guard = self.guard_for(payment_id);
        let _held = guard.lock().await;

        if let Some(done) = self.recorded(payment_id) {
            info!("Payment `{payment_id}` is already settled, nothing to do.");
            return done;
        }

        let exec = ExecHandle { id: exec_id.to_string() };
        let outcome = match self
            .with_retries("Exec start", || self.runner.run_exec(&exec))
            .await
        {
            Ok(ExecutionOutcome::RawOutput(raw)) => interpreter::interpret(&raw),

            Ok(ExecutionOutcome::RuntimeFailure { code, message }) => {
                warn!("Exec `{exec_id}` failed to start ({code}).");
                self.revert_payment(payment_id).await;
                let disposition = SettlementDisposition::Reverted(message);
                self.record(payment_id, disposition.clone());
                return disposition;
            }

            Err(e) => {
                warn!("Exec start for `{exec_id}` failed: `{e}`");
                self.revert_payment(payment_id).await;
                let disposition = SettlementDisposition::Reverted(e.to_string());
                self.record(payment_id, disposition.clone());
                return disposition;
            }
        };

        let disposition = match outcome {
            Outcome::KnownError { code, message } => {
                warn!("Exec `{exec_id}` reported code {code}: {message}");
                self.revert_payment(payment_id).await;
                SettlementDisposition::Reverted(message.to_string())
            }

            Outcome::Success { address } => {
                match self
                    .with_retries("Payment commit", || {
                        self.ledger.computation_succeed(payment_id)
                    })
                    .await
                {
                    Ok(()) => SettlementDisposition::Committed(address),

                    Err(e) => {
                        warn!("Ledger refused the payment `{payment_id}`: `{e}`");
                        self.revert_payment(payment_id).await;
                        SettlementDisposition::Reverted(
                            REASON_FULFILLMENT_REJECTED.to_string()
                        )
                    }
                }
            }
        };
        self.record(payment_id, disposition.clone());
        disposition
    }

    async fn revert_payment(&self, payment_id: &str) {
        match self
            .with_retries("Payment revert", || self.ledger.computation_failed(payment_id))
            .await
        {
            Ok(()) => info!("Funds for `{payment_id}` returned to the requester."),

            Err(e) => error!(
                "Could not revert the payment `{payment_id}`: `{e}`. \
                 Funds are in an ambiguous state until reconciled by an operator."
            ),
        }
    }

    async fn with_retries<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        E: std::fmt::Display + Transient,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Err(e) if e.transient() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    warn!(
                        "{what} failed: `{e}`. Attempt {attempt} of {} follows.",
                        self.max_attempts - 1
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                }

                other => return other,
            }
        }
    }

    fn guard_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut state = self.state.lock().unwrap();
        state
            .in_flight
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn recorded(&self, id: &str) -> Option<SettlementDisposition> {
        self.state.lock().unwrap().settled.get(id).cloned()
    }

    fn record(&self, id: &str, disposition: SettlementDisposition) {
        let mut state = self.state.lock().unwrap();
        state.settled.insert(id.to_string(), disposition);
        state.in_flight.remove(id);
    }
}

fn describe(report: &MatchReport) -> String {
    format!(
        "funds_ok={} dataset_match={} software_match={} container_alive={}",
        report.funds_ok, report.dataset_match, report.software_match, report.container_alive
    )
}
