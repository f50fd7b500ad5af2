//! Approval task state machine.
//!
//! # States
//! ```text
//! idle → prefetching → signing → submitted
//!                         ↓  ↑ retry
//!                       failed
//! any non-terminal → rejected
//! ```
//!
//! # Concurrency
//! - State sits behind a std `Mutex` that is never held across an await;
//!   every suspension point reads inputs, drops the lock, awaits, then
//!   re-locks and checks the generation before writing back
//! - A `reject` bumps the generation so in-flight results are discarded
//! - One signing operation at a time, enforced by an atomic flag

use alloy::primitives::{Address, TxHash, U256};
use futures_util::future::join_all;
use futures_util::join;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::watch;
use uuid::Uuid;

use crate::account::Account;
use crate::approval::prefetch::{
    clear_notice, confirm_blockers, gasless_advertised, price_items, set_notice, BlockerInputs, PrefetchData,
};
use crate::approval::types::{
    ApprovalError, ApprovalRequest, ApprovalResult, ConfirmBlocker, ConfirmProgress, ItemProgress, PrefetchNotice,
    PrefetchStep, RetryHint, TaskSnapshot, TaskStatus, TxItem,
};
use crate::chain::ChainInfo;
use crate::config::schema::EngineConfig;
use crate::gas::nonce::assign_batch_nonces;
use crate::gas::recommend::{bump_fees, select_initial_level};
use crate::gas::{ExplainGas, GasCheckError, GasCheckItem, GasEngine, GasLevelKind, GasQuote, PreparedL1Fee};
use crate::multisig::{MultisigError, MultisigTracker};
use crate::observability::metrics;
use crate::payment::{EligibilityChecker, GasAccountUnavailable, GasPaymentMethod, GasPaymentResolver};
use crate::security::{SecuritySession, SecurityVerdict};
use crate::services::{
    Collaborators, GasAccountAuth, GasAccountCheck, GaslessCheck, SecurityContext, ServiceResult, SignRequest,
};
use crate::transaction::{normalize_batch, NormalizeError, TransactionDraft};

struct TaskState {
    status: TaskStatus,
    items: Vec<TxItem>,
    data: PrefetchData,
    prepared_l1_fees: Vec<Option<PreparedL1Fee>>,
    gas_level: GasLevelKind,
    custom_price: Option<u128>,
    resolver: GasPaymentResolver,
    security: SecuritySession,
    gas_errors: Vec<GasCheckError>,
    notices: Vec<PrefetchNotice>,
    tx_hashes: Vec<TxHash>,
    error: Option<String>,
    retry_hint: RetryHint,
    multisig: Option<MultisigTracker>,
    /// Owner whose co-signature failed last; retried as-is.
    failed_owner: Option<Address>,
    edit_revision: u64,
}

/// Clears the in-flight flag when a signing attempt ends, however it ends.
struct SigningGuard<'a>(&'a AtomicBool);

impl<'a> SigningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SigningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One approval: a normalized batch driven from admission to submission.
pub struct ApprovalTask {
    id: Uuid,
    config: Arc<EngineConfig>,
    deps: Collaborators,
    gas: GasEngine,
    eligibility: EligibilityChecker,
    chain: ChainInfo,
    account: Account,
    origin: Option<String>,
    gas_account_auth: Option<GasAccountAuth>,
    local_accounts: Vec<Account>,
    state: Mutex<TaskState>,
    signing: AtomicBool,
    generation: AtomicU64,
    snapshots: watch::Sender<TaskSnapshot>,
}

impl ApprovalTask {
    /// Normalize the batch and open an idle task for it.
    pub fn new(request: ApprovalRequest, config: Arc<EngineConfig>, deps: Collaborators) -> ApprovalResult<Arc<Self>> {
        let max = config.approval.max_batch_size;
        if request.txs.len() > max {
            return Err(ApprovalError::BatchTooLarge {
                size: request.txs.len(),
                max,
            });
        }

        let drafts = normalize_batch(&request.txs, request.chain, &request.hints)?;
        let first = drafts.first().ok_or(NormalizeError::EmptyBatch)?;
        let chain = deps.chains.require(first.chain_id)?;
        let has_custom_rpc = deps.chains.has_custom_rpc(chain.id);

        let caller_price = first.max_fee_per_gas.or(first.gas_price);
        let (gas_level, custom_price) = select_initial_level(&first.flags, caller_price, request.last_gas);

        let resolver = GasPaymentResolver::new(
            &config.payment,
            &request.account,
            chain.id,
            has_custom_rpc,
            request.gas_account_auth.is_some(),
        );

        let mut data = PrefetchData::default();
        if request.account.is_multisig() {
            // the Safe nonce is resolved when the proposal is built
            data.nonce_done = true;
        }

        let id = Uuid::new_v4();
        let prepared_l1_fees = vec![None; drafts.len()];
        let state = TaskState {
            status: TaskStatus::Idle,
            items: drafts.into_iter().map(TxItem::new).collect(),
            data,
            prepared_l1_fees,
            gas_level,
            custom_price,
            resolver,
            security: SecuritySession::new(&config.security),
            gas_errors: Vec::new(),
            notices: Vec::new(),
            tx_hashes: Vec::new(),
            error: None,
            retry_hint: RetryHint::None,
            multisig: None,
            failed_owner: None,
            edit_revision: 0,
        };

        let (snapshots, _) = watch::channel(initial_snapshot(id, &state));
        let task = Arc::new(Self {
            id,
            gas: GasEngine::new(&config, &deps),
            eligibility: EligibilityChecker::new(&config.payment, &deps),
            config,
            deps,
            chain,
            account: request.account,
            origin: request.origin,
            gas_account_auth: request.gas_account_auth,
            local_accounts: request.local_accounts,
            state: Mutex::new(state),
            signing: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            snapshots,
        });

        {
            let state = task.lock();
            tracing::info!(
                task_id = %task.id,
                chain_id = %task.chain.id,
                from = %task.account.address,
                batch_size = state.items.len(),
                gas_level = %state.gas_level,
                "Approval task opened"
            );
            metrics::record_task_transition(TaskStatus::Idle.as_str());
            task.publish(&state);
        }
        Ok(task)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn chain(&self) -> &ChainInfo {
        &self.chain
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn is_ready(&self) -> bool {
        self.lock().data.is_ready()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receives a snapshot after every state change.
    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn drafts(&self) -> Vec<TransactionDraft> {
        self.lock().items.iter().map(|i| i.draft.clone()).collect()
    }

    pub fn blockers(&self) -> Vec<ConfirmBlocker> {
        let state = self.lock();
        self.blockers_for(&state)
    }

    pub fn security_verdict(&self) -> SecurityVerdict {
        self.lock().security.verdict().clone()
    }

    pub fn payment_method(&self) -> GasPaymentMethod {
        self.lock().resolver.method()
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_current(&self, generation: u64) -> ApprovalResult<()> {
        if self.generation.load(Ordering::SeqCst) != generation {
            return Err(ApprovalError::Rejected);
        }
        Ok(())
    }

    fn transition(&self, state: &mut TaskState, to: TaskStatus) {
        if state.status == to {
            return;
        }
        tracing::info!(task_id = %self.id, from = %state.status, to = %to, "Task transition");
        state.status = to;
        metrics::record_task_transition(to.as_str());
    }

    fn blockers_for(&self, state: &TaskState) -> Vec<ConfirmBlocker> {
        confirm_blockers(&BlockerInputs {
            ready: state.data.is_ready(),
            account: &self.account,
            items: &state.items,
            gas_errors: &state.gas_errors,
            security: &state.security,
            security_loaded: state.data.security_loaded,
            resolver: &state.resolver,
            chain: &self.chain,
            approval: &self.config.approval,
            gas: &self.config.gas,
        })
    }

    fn publish(&self, state: &TaskState) {
        let snapshot = TaskSnapshot {
            blockers: self.blockers_for(state),
            ..initial_snapshot(self.id, state)
        };
        self.snapshots.send_replace(snapshot);
    }

    // ------------------------------------------------------------------
    // Prefetch
    // ------------------------------------------------------------------

    /// Fetch everything confirm depends on. Returns whether the task is ready.
    ///
    /// Safe to call again after a failed read; only missing steps re-run.
    pub async fn prefetch(&self) -> ApprovalResult<bool> {
        let generation = {
            let mut state = self.lock();
            match state.status {
                TaskStatus::Idle => self.transition(&mut state, TaskStatus::Prefetching),
                TaskStatus::Prefetching => {}
                status => {
                    return Err(ApprovalError::InvalidState {
                        action: "prefetch",
                        status,
                    })
                }
            }
            self.publish(&state);
            self.generation.load(Ordering::SeqCst)
        };

        let start = Instant::now();
        self.prefetch_market(generation).await?;
        self.prefetch_gas(generation).await?;
        self.prefetch_checks(generation).await?;
        metrics::record_prefetch_duration(start);

        let state = self.lock();
        let ready = state.data.is_ready();
        tracing::debug!(
            task_id = %self.id,
            ready,
            notices = state.notices.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Prefetch pass finished"
        );
        Ok(ready)
    }

    /// Nonce, balance, gas quote and median price, in parallel.
    async fn prefetch_market(&self, generation: u64) -> ApprovalResult<()> {
        let (need_nonce, need_balance, need_quote, need_median, first, custom_price) = {
            let state = self.lock();
            let first = match state.items.first() {
                Some(item) => item.draft.clone(),
                None => return Ok(()),
            };
            (
                !state.data.nonce_done,
                state.data.balance.is_none(),
                state.data.quote.is_none(),
                state.data.median_price.is_none(),
                first,
                state.custom_price,
            )
        };
        let from = self.account.address;
        let chain = &self.chain;

        let nonce = async {
            match need_nonce {
                true => Some(self.gas.recommend_nonce(from, chain.id).await),
                false => None,
            }
        };
        let balance = async {
            match need_balance {
                true => Some(self.gas.native_balance(from, chain.id).await),
                false => None,
            }
        };
        let quote = async {
            match need_quote {
                true => Some(self.deps.gas_market.quote(chain, &first, custom_price).await),
                false => None,
            }
        };
        let median = async {
            match need_median {
                true => Some(self.deps.gas_market.median_price(chain).await),
                false => None,
            }
        };
        let (nonce, balance, quote, median) = join!(nonce, balance, quote, median);

        let mut state = self.lock();
        self.ensure_current(generation)?;

        match nonce {
            Some(Ok(n)) => {
                state.data.recommended_nonce = Some(n);
                state.data.nonce_done = true;
                clear_notice(&mut state.notices, PrefetchStep::Nonce);
            }
            Some(Err(e)) => set_notice(&mut state.notices, PrefetchStep::Nonce, e.to_string()),
            None => {}
        }
        match balance {
            Some(Ok(b)) => {
                state.data.balance = Some(b);
                clear_notice(&mut state.notices, PrefetchStep::Balance);
            }
            Some(Err(e)) => set_notice(&mut state.notices, PrefetchStep::Balance, e.to_string()),
            None => {}
        }
        match quote.map(|r| r.map_err(Into::into).and_then(GasQuote::new)) {
            Some(Ok(mut q)) => {
                if let Some(price) = custom_price {
                    q.set_custom_price(price);
                }
                state.data.quote = Some(q);
                clear_notice(&mut state.notices, PrefetchStep::GasQuote);
            }
            Some(Err(e)) => set_notice(&mut state.notices, PrefetchStep::GasQuote, e.to_string()),
            None => {}
        }
        match median {
            Some(Ok(m)) => {
                state.data.median_price = Some(m);
                clear_notice(&mut state.notices, PrefetchStep::GasMedian);
            }
            Some(Err(e)) => set_notice(&mut state.notices, PrefetchStep::GasMedian, e.to_string()),
            None => {}
        }

        for notice in &state.notices {
            tracing::warn!(task_id = %self.id, step = ?notice.step, message = %notice.message, "Prefetch step failed");
        }
        self.publish(&state);
        Ok(())
    }

    /// Nonces and fees onto the drafts, simulation, gas limits and costs.
    async fn prefetch_gas(&self, generation: u64) -> ApprovalResult<()> {
        let drafts = {
            let mut state = self.lock();
            if !state.data.phase_a_done() {
                return Ok(());
            }
            if !state.data.simulated {
                if let Some(nonce) = state.data.recommended_nonce {
                    let current: Vec<_> = state.items.iter().map(|i| i.draft.clone()).collect();
                    for (item, draft) in state.items.iter_mut().zip(assign_batch_nonces(&current, nonce)) {
                        item.draft = draft;
                    }
                }
                let level = state.gas_level;
                if let Some(quote) = state.data.quote.clone() {
                    price_items(&mut state.items, &self.chain, &quote, level)?;
                }
            }
            state.items.iter().map(|i| i.draft.clone()).collect::<Vec<_>>()
        };

        if !self.lock().data.simulated {
            let in_flight = self.in_flight_before(&drafts);
            let pending_lists: Vec<Vec<TransactionDraft>> = (0..drafts.len())
                .map(|i| in_flight.iter().chain(&drafts[..i]).cloned().collect())
                .collect();
            let simulations = join_all(
                drafts
                    .iter()
                    .zip(&pending_lists)
                    .map(|(draft, pending)| self.deps.simulation.pre_execute(&self.chain, draft, pending)),
            )
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>();

            let mut state = self.lock();
            self.ensure_current(generation)?;
            match simulations {
                Ok(results) => {
                    for (item, sim) in state.items.iter_mut().zip(results) {
                        if !sim.success {
                            tracing::warn!(task_id = %self.id, error = ?sim.error, "Simulation reported failure");
                        }
                        item.simulation = Some(sim);
                    }
                    state.data.simulated = true;
                    clear_notice(&mut state.notices, PrefetchStep::Simulation);
                }
                Err(e) => {
                    tracing::warn!(task_id = %self.id, error = %e, "Simulation unavailable");
                    set_notice(&mut state.notices, PrefetchStep::Simulation, e.to_string());
                    self.publish(&state);
                    return Ok(());
                }
            }
        }

        if !self.lock().data.gas_planned {
            let inputs: Vec<_> = {
                let state = self.lock();
                state
                    .items
                    .iter()
                    .filter_map(|i| i.simulation.as_ref().map(|s| (i.draft.clone(), s.clone())))
                    .collect()
            };
            let recommendations = join_all(
                inputs
                    .iter()
                    .map(|(draft, sim)| self.gas.recommend_gas(&self.chain, draft, sim.estimated_gas, sim.gas_used)),
            )
            .await;

            let mut state = self.lock();
            self.ensure_current(generation)?;
            let balance = state.data.balance;
            let is_multisig = self.account.is_multisig();
            for (index, (item, rec)) in state.items.iter_mut().zip(recommendations).enumerate() {
                let ratio = item.simulation.as_ref().and_then(|s| s.gas_ratio);
                let plan = self.gas.plan_gas_limit(&self.chain, &item.draft, rec, ratio, balance, is_multisig);
                item.draft = item.draft.with_gas_limit(plan.gas_limit);
                item.recommendation = Some(rec);
                item.plan = Some(plan);
                tracing::debug!(task_id = %self.id, index, gas = rec.gas, gas_limit = plan.gas_limit, "Gas planned");
            }
            state.prepared_l1_fees = state
                .items
                .iter()
                .map(|i| self.gas.prepare_l1_fee(&self.chain, &i.draft))
                .collect();
            state.data.gas_planned = true;
        }

        self.refresh_costs(generation).await
    }

    /// Recompute every item's cost, then re-run the gas and nonce checks.
    /// Locally pending submissions that land before this batch.
    ///
    /// The nonce lookup already pruned everything below the on-chain nonce.
    fn in_flight_before(&self, drafts: &[TransactionDraft]) -> Vec<TransactionDraft> {
        let first_nonce = drafts.first().and_then(|d| d.nonce);
        self.deps
            .pending
            .pending_txs_from(self.account.address, self.chain.id, 0)
            .into_iter()
            .filter(|tx| match (tx.nonce, first_nonce) {
                (Some(n), Some(first)) => n < first,
                _ => true,
            })
            .collect()
    }

    async fn refresh_costs(&self, generation: u64) -> ApprovalResult<()> {
        let (revision, inputs) = {
            let state = self.lock();
            if !state.data.gas_planned {
                return Ok(());
            }
            let inputs: Vec<_> = state
                .items
                .iter()
                .zip(&state.prepared_l1_fees)
                .map(|(item, prepared)| {
                    let gas_used = item.recommendation.map(|r| r.gas_used).unwrap_or_default();
                    let price = item.simulation.as_ref().map(|s| s.native_token_price).unwrap_or_default();
                    (item.draft.clone(), gas_used, price, prepared.clone())
                })
                .collect();
            (state.edit_revision, inputs)
        };

        let costs = join_all(inputs.iter().map(|(draft, gas_used, price, prepared)| {
            self.gas.explain_gas(ExplainGas {
                chain: &self.chain,
                tx: draft,
                gas_used: *gas_used,
                gas_limit: draft.gas_limit.unwrap_or(*gas_used),
                gas_price: draft.fee_cap(),
                native_token_price: *price,
                prepared_l1_fee: prepared.clone(),
            })
        }))
        .await;

        let mut state = self.lock();
        self.ensure_current(generation)?;
        if state.edit_revision != revision {
            // a newer edit recomputes with its own drafts
            return Ok(());
        }

        let mut failed = None;
        for (index, cost) in costs.into_iter().enumerate() {
            match cost {
                Ok(cost) => {
                    if let Some(item) = state.items.get_mut(index) {
                        item.cost = Some(cost);
                    }
                }
                Err(e) => {
                    if let Some(prepared) = state.prepared_l1_fees.get_mut(index) {
                        *prepared = None;
                    }
                    failed = Some(e.to_string());
                }
            }
        }
        match failed {
            Some(message) => {
                tracing::warn!(task_id = %self.id, error = %message, "Gas cost unavailable");
                state.data.costs_done = false;
                set_notice(&mut state.notices, PrefetchStep::GasCost, message);
            }
            None => {
                state.data.costs_done = true;
                clear_notice(&mut state.notices, PrefetchStep::GasCost);
            }
        }

        self.run_checks(&mut state);
        self.publish(&state);
        Ok(())
    }

    fn run_checks(&self, state: &mut TaskState) {
        if !state.data.costs_done {
            state.gas_errors.clear();
            return;
        }
        let errors = {
            let items: Vec<GasCheckItem<'_>> = state
                .items
                .iter()
                .map(|item| GasCheckItem {
                    draft: &item.draft,
                    gas_limit: item.draft.gas_limit.unwrap_or_default(),
                    recommended_gas: item.recommendation.map(|r| r.gas).unwrap_or_default(),
                    max_gas_cost: item.cost.map(|c| c.max_gas_cost_wei).unwrap_or_default(),
                    recommended_nonce: state.data.recommended_nonce,
                })
                .collect();
            self.gas.check(
                &self.chain,
                &items,
                state.data.balance.unwrap_or(U256::ZERO),
                self.account.is_multisig(),
            )
        };
        state.gas_errors = errors;
    }

    /// Security rules and payment eligibility, once the task is ready.
    async fn prefetch_checks(&self, generation: u64) -> ApprovalResult<()> {
        let (context, need_security, need_gasless, need_gas_account, gasless_pre, gas_account_pre) = {
            let state = self.lock();
            if !state.data.is_ready() {
                return Ok(());
            }
            let context = SecurityContext {
                session_id: state.security.id(),
                chain: self.chain.clone(),
                origin: self.origin.clone(),
                drafts: state.items.iter().map(|i| i.draft.clone()).collect(),
                simulations: state.items.iter().filter_map(|i| i.simulation.clone()).collect(),
            };
            let gasless = state.resolver.gasless();
            let gas_account = state.resolver.gas_account();
            (
                context,
                !state.data.security_loaded,
                !gasless.loaded || gasless.check_failed(),
                !gas_account.loaded || gas_account.check_failed(),
                state.resolver.gasless_precheck(),
                state.resolver.gas_account_precheck(),
            )
        };
        let drafts = &context.drafts;

        let security = async {
            match need_security {
                true => Some(self.deps.security_rules.evaluate(&context).await),
                false => None,
            }
        };
        let gasless = async {
            match (need_gasless, &gasless_pre) {
                (true, Ok(())) => {
                    self.eligibility
                        .check_gasless(&self.chain, self.account.address, drafts, false)
                        .await
                }
                _ => None,
            }
        };
        let gas_account = async {
            match (need_gas_account, &gas_account_pre, &self.gas_account_auth) {
                (true, Ok(()), Some(auth)) => {
                    self.eligibility
                        .check_gas_account(&self.chain, drafts, auth, false)
                        .await
                }
                _ => None,
            }
        };
        let (security, gasless, gas_account) = join!(security, gasless, gas_account);

        let mut state = self.lock();
        self.ensure_current(generation)?;

        match security {
            Some(Ok(results)) => {
                state.security.set_results(results);
                state.data.security_loaded = true;
                clear_notice(&mut state.notices, PrefetchStep::Security);
            }
            Some(Err(e)) => {
                tracing::warn!(task_id = %self.id, error = %e, "Security rules unavailable");
                set_notice(&mut state.notices, PrefetchStep::Security, e.to_string());
            }
            None => {}
        }

        if need_gasless {
            match gasless_pre {
                Err(reason) => state.resolver.mark_gasless_unavailable(reason),
                Ok(()) => {
                    if let Some(result) = gasless {
                        self.apply_gasless(&mut state, result);
                    }
                }
            }
        }
        if need_gas_account {
            match (gas_account_pre, &self.gas_account_auth) {
                (Err(reason), _) => state.resolver.mark_gas_account_unavailable(reason),
                (Ok(()), None) => state
                    .resolver
                    .mark_gas_account_unavailable(GasAccountUnavailable::NotLoggedIn),
                (Ok(()), Some(_)) => {
                    if let Some(result) = gas_account {
                        self.apply_gas_account(&mut state, result);
                    }
                }
            }
        }
        if need_gasless || need_gas_account {
            self.settle_payment(&mut state);
        }

        self.publish(&state);
        Ok(())
    }

    fn apply_gasless(&self, state: &mut TaskState, result: ServiceResult<GaslessCheck>) {
        match &result {
            Ok(_) => clear_notice(&mut state.notices, PrefetchStep::Gasless),
            Err(e) => set_notice(&mut state.notices, PrefetchStep::Gasless, e.to_string()),
        }
        state.resolver.apply_gasless(result);
    }

    fn apply_gas_account(&self, state: &mut TaskState, result: ServiceResult<GasAccountCheck>) {
        match &result {
            Ok(_) => clear_notice(&mut state.notices, PrefetchStep::GasAccount),
            Err(e) => set_notice(&mut state.notices, PrefetchStep::GasAccount, e.to_string()),
        }
        state.resolver.apply_gas_account(result);
    }

    /// Payment counts as loaded only once no check is sitting on an error.
    fn settle_payment(&self, state: &mut TaskState) {
        state.data.payment_loaded = state.resolver.checks_settled();
        if state.data.payment_loaded {
            let advertised = gasless_advertised(&state.gas_errors, &state.resolver);
            state.resolver.maybe_auto_switch(advertised);
        }
    }

    /// Debounced gasless and gas-account re-check after a gas edit.
    async fn recheck_payment(&self, generation: u64) -> ApprovalResult<()> {
        let (drafts, gasless_ok, gas_account_ok) = {
            let state = self.lock();
            if !state.resolver.first_load_done() {
                return Ok(());
            }
            (
                state.items.iter().map(|i| i.draft.clone()).collect::<Vec<_>>(),
                state.resolver.gasless_precheck().is_ok(),
                state.resolver.gas_account_precheck().is_ok(),
            )
        };

        let gasless = async {
            match gasless_ok {
                true => {
                    self.eligibility
                        .check_gasless(&self.chain, self.account.address, &drafts, true)
                        .await
                }
                false => None,
            }
        };
        let gas_account = async {
            match (gas_account_ok, &self.gas_account_auth) {
                (true, Some(auth)) => self.eligibility.check_gas_account(&self.chain, &drafts, auth, true).await,
                _ => None,
            }
        };
        let (gasless, gas_account) = join!(gasless, gas_account);
        if gasless.is_none() && gas_account.is_none() {
            return Ok(());
        }

        let mut state = self.lock();
        self.ensure_current(generation)?;
        if let Some(result) = gasless {
            self.apply_gasless(&mut state, result);
        }
        if let Some(result) = gas_account {
            self.apply_gas_account(&mut state, result);
        }
        self.settle_payment(&mut state);
        self.publish(&state);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Edits
    // ------------------------------------------------------------------

    fn ensure_editable(&self, state: &TaskState, action: &'static str) -> ApprovalResult<()> {
        let signing = self.signing.load(Ordering::Acquire);
        match state.status {
            TaskStatus::Idle | TaskStatus::Prefetching | TaskStatus::Failed if !signing => Ok(()),
            TaskStatus::Idle | TaskStatus::Prefetching | TaskStatus::Failed => Err(ApprovalError::InvalidState {
                action,
                status: TaskStatus::Signing,
            }),
            status => Err(ApprovalError::InvalidState { action, status }),
        }
    }

    /// Switch gas level; `custom_price` sets the custom level's price.
    pub async fn select_gas_level(&self, level: GasLevelKind, custom_price: Option<u128>) -> ApprovalResult<()> {
        let generation = {
            let mut state = self.lock();
            self.ensure_editable(&state, "change gas")?;

            if let Some(price) = custom_price {
                state.custom_price = Some(price);
                if let Some(quote) = state.data.quote.as_mut() {
                    quote.set_custom_price(price);
                }
            }
            state.gas_level = level;
            if let Some(quote) = state.data.quote.clone() {
                price_items(&mut state.items, &self.chain, &quote, level)?;
            }
            state.edit_revision += 1;
            tracing::debug!(task_id = %self.id, %level, ?custom_price, "Gas level selected");
            self.publish(&state);
            self.generation.load(Ordering::SeqCst)
        };
        self.after_edit(generation).await
    }

    pub async fn set_gas_limit(&self, index: usize, gas_limit: u64) -> ApprovalResult<()> {
        self.edit_item(index, "change gas limit", |draft| draft.with_gas_limit(gas_limit))
            .await
    }

    pub async fn set_nonce(&self, index: usize, nonce: u64) -> ApprovalResult<()> {
        {
            let state = self.lock();
            let item = state.items.get(index).ok_or(ApprovalError::NoSuchItem(index))?;
            if item.draft.replaces_pending() {
                return Err(ApprovalError::NonceLocked(index));
            }
        }
        self.edit_item(index, "change nonce", |draft| draft.with_nonce(nonce))
            .await
    }

    async fn edit_item<F>(&self, index: usize, action: &'static str, edit: F) -> ApprovalResult<()>
    where
        F: FnOnce(&TransactionDraft) -> TransactionDraft,
    {
        let generation = {
            let mut state = self.lock();
            self.ensure_editable(&state, action)?;
            let item = state.items.get_mut(index).ok_or(ApprovalError::NoSuchItem(index))?;
            item.draft = edit(&item.draft);
            state.edit_revision += 1;
            self.publish(&state);
            self.generation.load(Ordering::SeqCst)
        };
        self.after_edit(generation).await
    }

    async fn after_edit(&self, generation: u64) -> ApprovalResult<()> {
        self.refresh_costs(generation).await?;
        self.recheck_payment(generation).await
    }

    pub fn set_payment_method(&self, method: GasPaymentMethod) -> ApprovalResult<()> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Err(ApprovalError::InvalidState {
                action: "change payment method",
                status: state.status,
            });
        }
        let signing = state.status == TaskStatus::Signing || self.signing.load(Ordering::Acquire);
        state.resolver.set_method(method, signing)?;
        tracing::info!(task_id = %self.id, %method, "Payment method selected");
        self.publish(&state);
        Ok(())
    }

    /// "Ignore this rule".
    pub fn process_rule(&self, rule_id: &str) -> bool {
        let mut state = self.lock();
        let changed = state.security.process_rule(rule_id);
        if changed {
            self.publish(&state);
        }
        changed
    }

    /// "Undo ignore".
    pub fn unprocess_rule(&self, rule_id: &str) -> bool {
        let mut state = self.lock();
        let changed = state.security.unprocess_rule(rule_id);
        if changed {
            self.publish(&state);
        }
        changed
    }

    pub fn process_all_rules(&self) {
        let mut state = self.lock();
        state.security.process_all();
        self.publish(&state);
    }

    // ------------------------------------------------------------------
    // Confirm, sign, retry, reject
    // ------------------------------------------------------------------

    /// Start signing. A confirm while another is in flight does nothing.
    pub async fn confirm(&self) -> ApprovalResult<ConfirmProgress> {
        let Some(_guard) = SigningGuard::acquire(&self.signing) else {
            tracing::debug!(task_id = %self.id, "Confirm ignored, already signing");
            return Ok(ConfirmProgress::AlreadySigning);
        };

        let generation = {
            let mut state = self.lock();
            match state.status {
                TaskStatus::Prefetching => {}
                TaskStatus::Signing => {
                    if let Some(tracker) = &state.multisig {
                        return Ok(multisig_progress(tracker));
                    }
                    return Ok(ConfirmProgress::AlreadySigning);
                }
                status => {
                    return Err(ApprovalError::InvalidState {
                        action: "confirm",
                        status,
                    })
                }
            }

            let blockers = self.blockers_for(&state);
            if !blockers.is_empty() {
                tracing::debug!(task_id = %self.id, ?blockers, "Confirm blocked");
                return Err(ApprovalError::Blocked(blockers));
            }
            if self.account.is_multisig() {
                if state.items.len() != 1 {
                    return Err(ApprovalError::MultisigBatch);
                }
                if self.deps.multisig.is_none() {
                    return Err(MultisigError::NotConfigured.into());
                }
            }

            self.transition(&mut state, TaskStatus::Signing);
            self.publish(&state);
            self.generation.load(Ordering::SeqCst)
        };

        match self.account.is_multisig() {
            true => self.open_multisig(generation).await,
            false => self.sign_items(generation).await,
        }
    }

    /// Sign and submit every item not yet signed, in batch order.
    async fn sign_items(&self, generation: u64) -> ApprovalResult<ConfirmProgress> {
        let (pending, method, level) = {
            let mut state = self.lock();
            let mut pending = Vec::new();
            for (index, item) in state.items.iter_mut().enumerate() {
                if item.progress != ItemProgress::Signed {
                    item.progress = ItemProgress::Built;
                    pending.push((index, item.draft.clone()));
                }
            }
            self.publish(&state);
            (pending, state.resolver.method(), state.gas_level)
        };
        let gas_account = match method {
            GasPaymentMethod::GasAccount => self.gas_account_auth.clone(),
            GasPaymentMethod::Native | GasPaymentMethod::Gasless => None,
        };

        for (index, draft) in pending {
            let request = SignRequest {
                task_id: self.id,
                index,
                chain: self.chain.clone(),
                draft: draft.clone(),
                payment_method: method,
                gas_level: level,
                gas_account: gas_account.clone(),
            };

            match self.deps.signer.sign_and_submit(request).await {
                Ok(outcome) => {
                    metrics::record_signing_attempt("ok");
                    self.deps.pending.record_submission(outcome.tx_hash, &draft);

                    let mut state = self.lock();
                    self.ensure_current(generation)?;
                    if let Some(item) = state.items.get_mut(index) {
                        item.progress = ItemProgress::Signed;
                        item.tx_hash = Some(outcome.tx_hash);
                    }
                    tracing::info!(task_id = %self.id, index, tx_hash = %outcome.tx_hash, "Transaction submitted");
                    self.publish(&state);
                }
                Err(e) => {
                    metrics::record_signing_attempt("error");
                    let mut state = self.lock();
                    self.ensure_current(generation)?;
                    if let Some(item) = state.items.get_mut(index) {
                        item.progress = ItemProgress::Failed;
                    }
                    state.error = Some(e.to_string());
                    state.retry_hint = RetryHint::for_error(&e);
                    tracing::warn!(task_id = %self.id, index, error = %e, hint = ?state.retry_hint, "Signing failed");
                    self.transition(&mut state, TaskStatus::Failed);
                    self.publish(&state);
                    return Err(e.into());
                }
            }
        }

        let mut state = self.lock();
        self.ensure_current(generation)?;
        let tx_hashes: Vec<TxHash> = state.items.iter().filter_map(|i| i.tx_hash).collect();
        state.tx_hashes = tx_hashes.clone();
        state.error = None;
        self.transition(&mut state, TaskStatus::Submitted);
        self.publish(&state);
        Ok(ConfirmProgress::Submitted { tx_hashes })
    }

    async fn open_multisig(&self, generation: u64) -> ApprovalResult<ConfirmProgress> {
        let draft = {
            let state = self.lock();
            state.items.first().map(|i| i.draft.clone())
        };
        let (Some(backend), Some(draft)) = (self.deps.multisig.clone(), draft) else {
            return Err(MultisigError::NotConfigured.into());
        };

        let opened = MultisigTracker::open_for_draft(backend, &draft, &self.local_accounts)
            .await
            .map(|t| t.with_origin(self.origin.clone()));

        let mut state = self.lock();
        self.ensure_current(generation)?;
        match opened {
            Ok(tracker) if tracker.is_finished() => {
                let safe_tx_hash = tracker.state().payload.hash();
                tracing::info!(task_id = %self.id, %safe_tx_hash, "Reusing finished safe proposal");
                state.tx_hashes = vec![safe_tx_hash];
                state.multisig = Some(tracker);
                self.transition(&mut state, TaskStatus::Submitted);
                self.publish(&state);
                Ok(ConfirmProgress::ReusedSignature { safe_tx_hash })
            }
            Ok(tracker) => {
                let progress = multisig_progress(&tracker);
                state.multisig = Some(tracker);
                self.publish(&state);
                Ok(progress)
            }
            Err(e) => {
                state.error = Some(e.to_string());
                self.transition(&mut state, TaskStatus::Failed);
                self.publish(&state);
                Err(e.into())
            }
        }
    }

    /// Sign the open Safe proposal as `owner` and record the confirmation.
    pub async fn sign_with_owner(&self, owner: Address) -> ApprovalResult<ConfirmProgress> {
        let Some(_guard) = SigningGuard::acquire(&self.signing) else {
            return Ok(ConfirmProgress::AlreadySigning);
        };

        let (tracker, generation) = {
            let state = self.lock();
            let tracker = match (&state.multisig, state.status) {
                (Some(tracker), TaskStatus::Signing) => tracker.clone(),
                (_, status) => {
                    return Err(ApprovalError::InvalidState {
                        action: "sign as owner",
                        status,
                    })
                }
            };
            (tracker, self.generation.load(Ordering::SeqCst))
        };
        self.owner_signature(tracker, owner, generation).await
    }

    async fn owner_signature(
        &self,
        mut tracker: MultisigTracker,
        owner: Address,
        generation: u64,
    ) -> ApprovalResult<ConfirmProgress> {
        let multisig_state = tracker.state();
        if !multisig_state.owners.contains(&owner) {
            return Err(MultisigError::NotOwner(owner).into());
        }
        if multisig_state.is_confirmed_by(&owner) {
            return Err(MultisigError::AlreadyConfirmed(owner).into());
        }
        let safe_tx_hash = multisig_state.payload.hash();

        let submitted = match self.deps.signer.sign_hash(owner, safe_tx_hash).await {
            Ok(signature) => tracker
                .submit_signature(owner, signature)
                .await
                .map_err(ApprovalError::from),
            Err(e) => Err(e.into()),
        };

        let mut state = self.lock();
        self.ensure_current(generation)?;
        match submitted {
            Ok(finished) => {
                metrics::record_signing_attempt("ok");
                state.failed_owner = None;
                let progress = match finished {
                    true => {
                        state.tx_hashes = vec![safe_tx_hash];
                        self.transition(&mut state, TaskStatus::Submitted);
                        ConfirmProgress::Submitted {
                            tx_hashes: vec![safe_tx_hash],
                        }
                    }
                    false => multisig_progress(&tracker),
                };
                state.multisig = Some(tracker);
                self.publish(&state);
                Ok(progress)
            }
            Err(e) => {
                metrics::record_signing_attempt("error");
                tracing::warn!(task_id = %self.id, %owner, error = %e, "Co-owner signature failed");
                state.error = Some(e.to_string());
                state.failed_owner = Some(owner);
                self.transition(&mut state, TaskStatus::Failed);
                self.publish(&state);
                Err(e)
            }
        }
    }

    /// Re-run the failed signing attempt, applying the classified retry hint.
    pub async fn retry(&self) -> ApprovalResult<ConfirmProgress> {
        let Some(_guard) = SigningGuard::acquire(&self.signing) else {
            return Ok(ConfirmProgress::AlreadySigning);
        };

        let (hint, tracker, generation) = {
            let state = self.lock();
            if state.status != TaskStatus::Failed {
                return Err(ApprovalError::InvalidState {
                    action: "retry",
                    status: state.status,
                });
            }
            (
                state.retry_hint,
                state.multisig.clone(),
                self.generation.load(Ordering::SeqCst),
            )
        };

        if let Some(mut tracker) = tracker {
            tracker.refresh().await?;
            let failed_owner = {
                let mut state = self.lock();
                self.ensure_current(generation)?;
                state.error = None;
                if tracker.is_finished() {
                    let progress = multisig_progress(&tracker);
                    state.tx_hashes = vec![tracker.state().payload.hash()];
                    state.failed_owner = None;
                    state.multisig = Some(tracker);
                    self.transition(&mut state, TaskStatus::Submitted);
                    self.publish(&state);
                    return Ok(progress);
                }
                state.multisig = Some(tracker.clone());
                self.transition(&mut state, TaskStatus::Signing);
                self.publish(&state);
                state
                    .failed_owner
                    .take()
                    .filter(|owner| !tracker.state().is_confirmed_by(owner))
            };
            return match failed_owner {
                Some(owner) => self.owner_signature(tracker, owner, generation).await,
                None => Ok(multisig_progress(&tracker)),
            };
        }

        if self.account.is_multisig() {
            // the proposal never opened
            {
                let mut state = self.lock();
                self.transition(&mut state, TaskStatus::Signing);
                self.publish(&state);
            }
            return self.open_multisig(generation).await;
        }

        match hint {
            RetryHint::RefreshNonce => {
                // replacements keep the nonce of the submission they replace
                let locked = {
                    let state = self.lock();
                    state
                        .items
                        .iter()
                        .position(|i| i.progress != ItemProgress::Signed && i.draft.replaces_pending())
                };
                if let Some(index) = locked {
                    tracing::warn!(task_id = %self.id, index, "Replacement nonce already used, not retrying");
                    return Err(ApprovalError::NonceLocked(index));
                }
                let nonce = self.gas.recommend_nonce(self.account.address, self.chain.id).await?;
                let mut state = self.lock();
                self.ensure_current(generation)?;
                state.data.recommended_nonce = Some(nonce);
                let mut next = nonce;
                for item in state.items.iter_mut().filter(|i| i.progress != ItemProgress::Signed) {
                    item.draft = item.draft.with_nonce(next);
                    next += 1;
                }
                state.edit_revision += 1;
                tracing::info!(task_id = %self.id, nonce, "Retrying with refreshed nonce");
            }
            RetryHint::BumpFees => {
                let factor = self.config.gas.retry_fee_bump;
                let mut state = self.lock();
                self.ensure_current(generation)?;
                for item in state.items.iter_mut().filter(|i| i.progress != ItemProgress::Signed) {
                    item.draft = bump_fees(&item.draft, factor);
                }
                state.edit_revision += 1;
                tracing::info!(task_id = %self.id, factor, "Retrying with bumped fees");
            }
            RetryHint::None => {}
        }
        if hint != RetryHint::None {
            self.refresh_costs(generation).await?;
        }

        {
            let mut state = self.lock();
            self.ensure_current(generation)?;
            let blockers = self.blockers_for(&state);
            if !blockers.is_empty() {
                return Err(ApprovalError::Blocked(blockers));
            }
            state.error = None;
            state.retry_hint = RetryHint::None;
            self.transition(&mut state, TaskStatus::Signing);
            self.publish(&state);
        }
        self.sign_items(generation).await
    }

    /// User cancel. In-flight results arriving afterwards are dropped.
    pub fn reject(&self) -> ApprovalResult<()> {
        let mut state = self.lock();
        if state.status.is_terminal() {
            return Err(ApprovalError::InvalidState {
                action: "reject",
                status: state.status,
            });
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.eligibility.cancel();
        state.multisig = None;
        self.transition(&mut state, TaskStatus::Rejected);
        self.publish(&state);
        Ok(())
    }
}

fn multisig_progress(tracker: &MultisigTracker) -> ConfirmProgress {
    let state = tracker.state();
    ConfirmProgress::AwaitingCoOwners {
        safe_tx_hash: state.payload.hash(),
        pending_signers: tracker.pending_signers().iter().map(|c| c.address).collect(),
        confirmations: state.confirmations.len(),
        threshold: state.threshold,
    }
}

/// Snapshot without confirm blockers (those need the task's context).
fn initial_snapshot(id: Uuid, state: &TaskState) -> TaskSnapshot {
    TaskSnapshot {
        id,
        status: state.status,
        ready: state.data.is_ready(),
        items: state.items.clone(),
        gas_level: state.gas_level,
        payment_method: state.resolver.method(),
        gasless: state.resolver.gasless().clone(),
        gas_account: state.resolver.gas_account().clone(),
        gas_errors: state.gas_errors.clone(),
        security: state.security.verdict().clone(),
        notices: state.notices.clone(),
        blockers: vec![ConfirmBlocker::NotReady],
        tx_hashes: state.tx_hashes.clone(),
        error: state.error.clone(),
        retry_hint: state.retry_hint,
        edit_revision: state.edit_revision,
    }
}

impl std::fmt::Debug for ApprovalTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalTask")
            .field("id", &self.id)
            .field("chain", &self.chain.id)
            .field("account", &self.account.address)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
