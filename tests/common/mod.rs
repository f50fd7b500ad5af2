//! Shared mock collaborators and fixtures for integration tests.

#![allow(dead_code)]

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use approval_engine::account::{Account, KeyringKind};
use approval_engine::approval::{ApprovalRequest, ApprovalTask};
use approval_engine::chain::{ChainId, ChainInfo, StaticChainRegistry};
use approval_engine::config::schema::ChainConfig;
use approval_engine::gas::{GasLevel, GasLevelKind};
use approval_engine::multisig::{MultisigResult, SafeConfirmation, SafeInfo, SafeProposal};
use approval_engine::pending::PendingTxStore;
use approval_engine::security::RuleResult;
use approval_engine::services::{
    ChainStateReader, Collaborators, GasAccountAuth, GasAccountCheck, GasAccountService, GasMarketService,
    GaslessCheck, GaslessService, HistoryGasService, L1FeeEstimator, MultisigBackend, SecurityContext,
    SecurityRuleEngine, ServiceError, ServiceResult, SignOutcome, SignRequest, SigningBackend, SigningError,
    SigningResult, SimulationResult, SimulationService,
};
use approval_engine::transaction::{RawTransaction, TransactionDraft};
use approval_engine::EngineConfig;
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const SENDER: &str = "0x1111111111111111111111111111111111111111";
pub const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";

pub const GWEI: u128 = 1_000_000_000;
pub const ETH: u128 = 1_000_000_000_000_000_000;

pub fn sender() -> Address {
    SENDER.parse().unwrap()
}

pub fn eth(amount: f64) -> U256 {
    U256::from((amount * ETH as f64) as u128)
}

/// Plain value transfer on mainnet.
pub fn transfer(value: U256) -> RawTransaction {
    serde_json::from_value(json!({
        "chainId": 1,
        "from": SENDER,
        "to": RECIPIENT,
        "value": format!("{:#x}", value),
        "data": "0x",
    }))
    .unwrap()
}

pub fn quote_levels(normal_gwei: u128) -> Vec<GasLevel> {
    [
        (GasLevelKind::Slow, normal_gwei / 2),
        (GasLevelKind::Normal, normal_gwei),
        (GasLevelKind::Fast, normal_gwei * 2),
    ]
    .into_iter()
    .map(|(level, gwei)| GasLevel {
        level,
        price: gwei * GWEI,
        priority_price: Some(GWEI),
        estimated_seconds: 12.0,
        front_tx_count: 0,
        base_fee: Some(gwei * GWEI - GWEI),
    })
    .collect()
}

// ------------------------------------------------------------------
// Chain state
// ------------------------------------------------------------------

pub struct MockChainState {
    pub nonce: AtomicU64,
    pub balance: Mutex<U256>,
    pub fail_nonce: AtomicBool,
    pub nonce_calls: AtomicUsize,
    pub balance_calls: AtomicUsize,
}

impl MockChainState {
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self {
            nonce: AtomicU64::new(nonce),
            balance: Mutex::new(balance),
            fail_nonce: AtomicBool::new(false),
            nonce_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChainStateReader for MockChainState {
    async fn transaction_count(&self, _chain: ChainId, _address: Address) -> ServiceResult<u64> {
        self.nonce_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_nonce.load(Ordering::SeqCst) {
            return Err(ServiceError::InvalidResponse {
                service: "rpc",
                message: "nonce unavailable".into(),
            });
        }
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn balance(&self, _chain: ChainId, _address: Address) -> ServiceResult<U256> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.balance.lock().unwrap())
    }
}

// ------------------------------------------------------------------
// Simulation
// ------------------------------------------------------------------

pub struct MockSimulation {
    pub gas_used: u64,
    pub success: AtomicBool,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    /// Length of the pending list seen by each call.
    pub pending_seen: Mutex<Vec<usize>>,
    pub delay: Mutex<Option<Duration>>,
}

impl MockSimulation {
    pub fn new(gas_used: u64) -> Self {
        Self {
            gas_used,
            success: AtomicBool::new(true),
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            pending_seen: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SimulationService for MockSimulation {
    async fn pre_execute(
        &self,
        _chain: &ChainInfo,
        _tx: &TransactionDraft,
        pending: &[TransactionDraft],
    ) -> ServiceResult<SimulationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pending_seen.lock().unwrap().push(pending.len());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::request("simulation", "connection reset"));
        }
        Ok(SimulationResult {
            success: self.success.load(Ordering::SeqCst),
            gas_used: self.gas_used,
            gas_limit: None,
            estimated_gas: self.gas_used,
            gas_ratio: None,
            balance_change: Default::default(),
            native_token_price: 2_000.0,
            trace_id: None,
            error: None,
        })
    }
}

// ------------------------------------------------------------------
// Gas market, history, L1 fee
// ------------------------------------------------------------------

pub struct MockGasMarket {
    pub levels: Mutex<Vec<GasLevel>>,
    pub quote_calls: AtomicUsize,
    pub custom_seeds: Mutex<Vec<Option<u128>>>,
}

impl MockGasMarket {
    pub fn new(levels: Vec<GasLevel>) -> Self {
        Self {
            levels: Mutex::new(levels),
            quote_calls: AtomicUsize::new(0),
            custom_seeds: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GasMarketService for MockGasMarket {
    async fn quote(
        &self,
        _chain: &ChainInfo,
        _tx: &TransactionDraft,
        custom_price: Option<u128>,
    ) -> ServiceResult<Vec<GasLevel>> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.custom_seeds.lock().unwrap().push(custom_price);
        Ok(self.levels.lock().unwrap().clone())
    }

    async fn median_price(&self, _chain: &ChainInfo) -> ServiceResult<Option<u128>> {
        Ok(Some(10 * GWEI))
    }
}

pub struct NoHistory;

#[async_trait]
impl HistoryGasService for NoHistory {
    async fn history_gas_used(&self, _chain: &ChainInfo, _tx: &TransactionDraft) -> ServiceResult<Option<u64>> {
        Ok(None)
    }
}

pub struct FixedL1Fee(pub U256);

#[async_trait]
impl L1FeeEstimator for FixedL1Fee {
    async fn l1_fee(&self, _chain: &ChainInfo, _tx: &TransactionDraft) -> ServiceResult<U256> {
        Ok(self.0)
    }
}

// ------------------------------------------------------------------
// Security, gasless, gas account
// ------------------------------------------------------------------

pub struct MockSecurity {
    pub results: Mutex<Vec<RuleResult>>,
    pub calls: AtomicUsize,
}

impl MockSecurity {
    pub fn new(results: Vec<RuleResult>) -> Self {
        Self {
            results: Mutex::new(results),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SecurityRuleEngine for MockSecurity {
    async fn evaluate(&self, _context: &SecurityContext) -> ServiceResult<Vec<RuleResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.lock().unwrap().clone())
    }
}

pub struct MockGasless {
    pub check: Mutex<ServiceResult<GaslessCheck>>,
    pub calls: AtomicUsize,
}

impl MockGasless {
    pub fn new(check: GaslessCheck) -> Self {
        Self {
            check: Mutex::new(Ok(check)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GaslessService for MockGasless {
    async fn check_eligibility(
        &self,
        _chain: &ChainInfo,
        _from: Address,
        _batch: &[TransactionDraft],
    ) -> ServiceResult<GaslessCheck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check.lock().unwrap().clone()
    }
}

pub struct MockGasAccount {
    pub check: Mutex<ServiceResult<GasAccountCheck>>,
    pub calls: AtomicUsize,
}

impl MockGasAccount {
    pub fn new(check: GasAccountCheck) -> Self {
        Self {
            check: Mutex::new(Ok(check)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl GasAccountService for MockGasAccount {
    async fn check_balance(
        &self,
        _chain: &ChainInfo,
        _batch: &[TransactionDraft],
        _auth: &GasAccountAuth,
    ) -> ServiceResult<GasAccountCheck> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check.lock().unwrap().clone()
    }
}

pub fn usable_gas_account() -> GasAccountCheck {
    GasAccountCheck {
        balance_is_enough: true,
        chain_not_support: false,
        is_gas_account: true,
        cost: Default::default(),
    }
}

// ------------------------------------------------------------------
// Signing
// ------------------------------------------------------------------

/// Plays back a script of outcomes, then signs everything.
pub struct MockSigner {
    /// `None` entries succeed.
    pub script: Mutex<VecDeque<Option<SigningError>>>,
    pub requests: Mutex<Vec<SignRequest>>,
    pub hash_requests: Mutex<Vec<(Address, B256)>>,
    pub delay: Mutex<Option<Duration>>,
    counter: AtomicU64,
}

impl MockSigner {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            hash_requests: Mutex::new(Vec::new()),
            delay: Mutex::new(None),
            counter: AtomicU64::new(1),
        }
    }

    pub fn fail_next(&self, error: SigningError) {
        self.script.lock().unwrap().push_back(Some(error));
    }

    pub fn succeed_next(&self) {
        self.script.lock().unwrap().push_back(None);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl SigningBackend for MockSigner {
    async fn sign_and_submit(&self, request: SignRequest) -> SigningResult<SignOutcome> {
        self.requests.lock().unwrap().push(request);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front().flatten();
        if let Some(error) = scripted {
            return Err(error);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SignOutcome {
            tx_hash: TxHash::with_last_byte(n as u8),
            raw: None,
        })
    }

    async fn sign_hash(&self, signer: Address, hash: B256) -> SigningResult<Bytes> {
        self.hash_requests.lock().unwrap().push((signer, hash));
        let scripted = self.script.lock().unwrap().pop_front().flatten();
        if let Some(error) = scripted {
            return Err(error);
        }
        let mut signature = vec![0u8; 65];
        signature[..20].copy_from_slice(signer.as_slice());
        signature[64] = 27;
        Ok(Bytes::from(signature))
    }
}

// ------------------------------------------------------------------
// Safe service
// ------------------------------------------------------------------

/// In-memory Safe transaction service.
pub struct MockSafeService {
    pub info: SafeInfo,
    pub confirmations: Mutex<Option<Vec<SafeConfirmation>>>,
    pub proposals: Mutex<Vec<SafeProposal>>,
    pub added: Mutex<Vec<Bytes>>,
}

impl MockSafeService {
    pub fn new(info: SafeInfo) -> Self {
        Self {
            info,
            confirmations: Mutex::new(None),
            proposals: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MultisigBackend for MockSafeService {
    async fn safe_info(&self, _chain: ChainId, _safe: Address) -> MultisigResult<SafeInfo> {
        Ok(self.info.clone())
    }

    async fn transaction_confirmations(
        &self,
        _chain: ChainId,
        _safe_tx_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>> {
        Ok(self.confirmations.lock().unwrap().clone())
    }

    async fn message_confirmations(
        &self,
        _chain: ChainId,
        _message_hash: B256,
    ) -> MultisigResult<Option<Vec<SafeConfirmation>>> {
        Ok(self.confirmations.lock().unwrap().clone())
    }

    async fn post_transaction(&self, _chain: ChainId, _safe: Address, proposal: &SafeProposal) -> MultisigResult<()> {
        self.proposals.lock().unwrap().push(proposal.clone());
        *self.confirmations.lock().unwrap() = Some(vec![SafeConfirmation {
            owner: proposal.sender,
            signature: proposal.signature.clone(),
        }]);
        Ok(())
    }

    async fn add_confirmation(&self, _chain: ChainId, _safe_tx_hash: B256, signature: Bytes) -> MultisigResult<()> {
        self.added.lock().unwrap().push(signature.clone());
        let owner = Address::from_slice(&signature[..20]);
        self.confirmations
            .lock()
            .unwrap()
            .get_or_insert_with(Vec::new)
            .push(SafeConfirmation { owner, signature });
        Ok(())
    }
}

// ------------------------------------------------------------------
// Harness
// ------------------------------------------------------------------

/// Every collaborator as a concrete mock, plus the bundle handed to tasks.
pub struct Harness {
    pub config: EngineConfig,
    pub chain_state: Arc<MockChainState>,
    pub simulation: Arc<MockSimulation>,
    pub gas_market: Arc<MockGasMarket>,
    pub security: Arc<MockSecurity>,
    pub gasless: Arc<MockGasless>,
    pub gas_account: Arc<MockGasAccount>,
    pub signer: Arc<MockSigner>,
    pub safe: Option<Arc<MockSafeService>>,
    pub pending: PendingTxStore,
}

impl Harness {
    /// Nonce 7, 1 ETH balance, 10 gwei normal price, plain transfers.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            chain_state: Arc::new(MockChainState::new(7, U256::from(ETH))),
            simulation: Arc::new(MockSimulation::new(21_000)),
            gas_market: Arc::new(MockGasMarket::new(quote_levels(10))),
            security: Arc::new(MockSecurity::new(Vec::new())),
            gasless: Arc::new(MockGasless::new(GaslessCheck::default())),
            gas_account: Arc::new(MockGasAccount::new(usable_gas_account())),
            signer: Arc::new(MockSigner::new()),
            safe: None,
            pending: PendingTxStore::new(None),
        }
    }

    pub fn with_safe(mut self, info: SafeInfo) -> Self {
        self.safe = Some(Arc::new(MockSafeService::new(info)));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        let chains = vec![ChainConfig::default()];
        Collaborators {
            chains: Arc::new(StaticChainRegistry::from_config(&chains)),
            chain_state: self.chain_state.clone(),
            simulation: self.simulation.clone(),
            gas_market: self.gas_market.clone(),
            history_gas: Arc::new(NoHistory),
            l1_fees: Arc::new(FixedL1Fee(U256::ZERO)),
            security_rules: self.security.clone(),
            gasless: self.gasless.clone(),
            gas_account: self.gas_account.clone(),
            signer: self.signer.clone(),
            multisig: self.safe.clone().map(|s| s as Arc<dyn MultisigBackend>),
            pending: self.pending.clone(),
        }
    }

    pub fn request(&self, txs: Vec<RawTransaction>) -> ApprovalRequest {
        ApprovalRequest::new(txs, Account::new(sender(), KeyringKind::PrivateKey))
    }

    pub fn logged_in(&self, mut request: ApprovalRequest) -> ApprovalRequest {
        request.gas_account_auth = Some(GasAccountAuth {
            account_id: "gas-account-1".to_string(),
            signature: "0xsig".to_string(),
        });
        request
    }

    pub fn task(&self, request: ApprovalRequest) -> Arc<ApprovalTask> {
        ApprovalTask::new(request, Arc::new(self.config.clone()), self.collaborators()).unwrap()
    }

    /// Open a task for `txs` and run prefetch to completion.
    pub async fn ready_task(&self, txs: Vec<RawTransaction>) -> Arc<ApprovalTask> {
        let task = self.task(self.request(txs));
        assert!(task.prefetch().await.unwrap(), "prefetch did not reach ready");
        task
    }
}

// ------------------------------------------------------------------
// TCP mock for HTTP clients
// ------------------------------------------------------------------

/// Serve `(status, body)` per request; the handler sees method and path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String, String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some((method, path, body)) = read_request(&mut socket).await else {
                            return;
                        };
                        let (status, body) = f(method, path, body).await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            204 => "204 No Content",
                            400 => "400 Bad Request",
                            404 => "404 Not Found",
                            422 => "422 Unprocessable Entity",
                            500 => "500 Internal Server Error",
                            _ => "200 OK",
                        };

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<(String, String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(header_end) = find_header_end(&buf) else {
            continue;
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|l| l.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<usize>().ok())
            .unwrap_or(0);

        let body_start = header_end + 4;
        while buf.len() < body_start + content_length {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let mut request_line = head.lines().next()?.split_whitespace();
        let method = request_line.next()?.to_string();
        let path = request_line.next()?.to_string();
        let body = String::from_utf8_lossy(&buf[body_start..]).to_string();
        return Some((method, path, body));
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
