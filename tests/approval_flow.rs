//! End-to-end approval task behaviour against in-memory collaborators.

mod common;

use alloy::primitives::{TxHash, U256};
use approval_engine::account::{Account, KeyringKind};
use approval_engine::approval::{
    ApprovalError, CantProcessReason, ConfirmBlocker, ConfirmProgress, ItemProgress, PrefetchStep, RetryHint,
    TaskStatus,
};
use approval_engine::gas::{GasCheckCode, GasLevelKind};
use approval_engine::payment::GasPaymentMethod;
use approval_engine::security::{Level, RuleResult};
use approval_engine::chain::ChainId;
use approval_engine::services::{GaslessCheck, GaslessPromotion, ServiceError, SigningError};
use approval_engine::transaction::TransactionDraft;
use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_transfer_signs_with_planned_gas() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;

    assert!(task.blockers().is_empty());
    let progress = task.confirm().await.unwrap();
    assert!(matches!(progress, ConfirmProgress::Submitted { ref tx_hashes } if tx_hashes.len() == 1));
    assert_eq!(task.status(), TaskStatus::Submitted);

    let requests = h.signer.requests.lock().unwrap();
    let draft = &requests[0].draft;
    assert_eq!(draft.nonce, Some(7));
    // 21000 estimated × 1.5 default ratio
    assert_eq!(draft.gas_limit, Some(31_500));
    assert_eq!(draft.max_fee_per_gas, Some(10 * GWEI));
    assert_eq!(draft.max_priority_fee_per_gas, Some(GWEI));
    assert_eq!(requests[0].payment_method, GasPaymentMethod::Native);
    assert_eq!(h.pending.count(), 1);
}

#[tokio::test]
async fn test_batch_gets_sequential_nonces_and_pending_context() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1)), transfer(eth(0.2))]).await;

    let mut seen = h.simulation.pending_seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![0, 1]);

    task.confirm().await.unwrap();
    let nonces: Vec<_> = h.signer.requests.lock().unwrap().iter().map(|r| r.draft.nonce).collect();
    assert_eq!(nonces, vec![Some(7), Some(8)]);
}

#[tokio::test]
async fn test_simulation_sees_local_pending_before_the_batch() {
    let h = Harness::new();
    let earlier = TransactionDraft::new(ChainId(1), sender(), Some(sender())).with_nonce(7);
    assert!(h.pending.record_submission(TxHash::with_last_byte(0xee), &earlier));

    let task = h.ready_task(vec![transfer(eth(0.1)), transfer(eth(0.1))]).await;
    let nonces: Vec<_> = task.drafts().iter().map(|d| d.nonce).collect();
    assert_eq!(nonces, vec![Some(8), Some(9)]);

    let mut seen = h.simulation.pending_seen.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2]);
}

#[tokio::test]
async fn test_oversized_batch_refused() {
    let h = Harness::new();
    let txs = vec![transfer(eth(0.01)); 17];
    let err = approval_engine::ApprovalTask::new(
        h.request(txs),
        std::sync::Arc::new(h.config.clone()),
        h.collaborators(),
    )
    .unwrap_err();
    assert!(matches!(err, ApprovalError::BatchTooLarge { size: 17, max: 16 }));
}

#[tokio::test]
async fn test_confirm_blocked_until_ready() {
    let h = Harness::new();
    h.simulation.fail.store(true, Ordering::SeqCst);
    let task = h.task(h.request(vec![transfer(eth(0.1))]));

    assert!(!task.prefetch().await.unwrap());
    assert!(task.snapshot().notices.iter().any(|n| n.step == PrefetchStep::Simulation));
    match task.confirm().await {
        Err(ApprovalError::Blocked(blockers)) => assert_eq!(blockers, vec![ConfirmBlocker::NotReady]),
        other => panic!("expected blocked confirm, got {:?}", other),
    }
    assert_eq!(h.signer.request_count(), 0);

    h.simulation.fail.store(false, Ordering::SeqCst);
    assert!(task.prefetch().await.unwrap());
    assert!(task.snapshot().notices.is_empty());
    assert_eq!(h.simulation.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.gas_market.quote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_step_is_the_only_one_rerun() {
    let h = Harness::new();
    h.chain_state.fail_nonce.store(true, Ordering::SeqCst);
    let task = h.task(h.request(vec![transfer(eth(0.1))]));

    assert!(!task.prefetch().await.unwrap());
    let snapshot = task.snapshot();
    assert_eq!(snapshot.notices.len(), 1);
    assert_eq!(snapshot.notices[0].step, PrefetchStep::Nonce);
    assert_eq!(h.simulation.calls.load(Ordering::SeqCst), 0);

    h.chain_state.fail_nonce.store(false, Ordering::SeqCst);
    assert!(task.prefetch().await.unwrap());
    assert_eq!(h.chain_state.nonce_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.chain_state.balance_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gas_market.quote_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_confirm_signs_once() {
    let h = Harness::new();
    *h.signer.delay.lock().unwrap() = Some(Duration::from_millis(50));
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;

    let (a, b) = tokio::join!(task.confirm(), task.confirm());
    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(
        outcomes
            .iter()
            .filter(|p| matches!(p, ConfirmProgress::AlreadySigning))
            .count(),
        1
    );
    assert_eq!(h.signer.request_count(), 1);
    assert_eq!(task.status(), TaskStatus::Submitted);
}

#[tokio::test(start_paused = true)]
async fn test_reject_discards_in_flight_results() {
    let h = Harness::new();
    *h.simulation.delay.lock().unwrap() = Some(Duration::from_millis(100));
    let task = h.task(h.request(vec![transfer(eth(0.1))]));

    let (result, _) = tokio::join!(task.prefetch(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        task.reject().unwrap();
    });

    assert!(matches!(result, Err(ApprovalError::Rejected)));
    assert_eq!(task.status(), TaskStatus::Rejected);
    assert!(task.snapshot().items[0].simulation.is_none());
    assert!(matches!(
        task.confirm().await,
        Err(ApprovalError::InvalidState {
            status: TaskStatus::Rejected,
            ..
        })
    ));
    assert!(task.reject().is_err());
}

#[tokio::test]
async fn test_nonce_too_low_retries_with_fresh_nonce() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    h.signer.fail_next(SigningError::NonceTooLow("nonce too low".into()));

    assert!(matches!(
        task.confirm().await,
        Err(ApprovalError::Signing(SigningError::NonceTooLow(_)))
    ));
    let snapshot = task.snapshot();
    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.retry_hint, RetryHint::RefreshNonce);
    assert_eq!(snapshot.items[0].progress, ItemProgress::Failed);

    h.chain_state.nonce.store(9, Ordering::SeqCst);
    assert!(matches!(task.retry().await.unwrap(), ConfirmProgress::Submitted { .. }));
    let requests = h.signer.requests.lock().unwrap();
    assert_eq!(requests.last().unwrap().draft.nonce, Some(9));
}

#[tokio::test]
async fn test_underpriced_retries_with_bumped_fees() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    h.signer.fail_next(SigningError::Underpriced("replacement transaction underpriced".into()));

    assert!(task.confirm().await.is_err());
    assert_eq!(task.snapshot().retry_hint, RetryHint::BumpFees);

    task.retry().await.unwrap();
    let requests = h.signer.requests.lock().unwrap();
    let draft = &requests.last().unwrap().draft;
    assert_eq!(draft.max_fee_per_gas, Some(13 * GWEI));
    assert_eq!(draft.max_priority_fee_per_gas, Some(1_300_000_000));
}

#[tokio::test]
async fn test_retry_skips_signed_items() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1)), transfer(eth(0.1))]).await;
    h.signer.succeed_next();
    h.signer.fail_next(SigningError::Underpriced("fee too low".into()));

    assert!(task.confirm().await.is_err());
    let items = task.snapshot().items;
    assert_eq!(items[0].progress, ItemProgress::Signed);
    assert_eq!(items[1].progress, ItemProgress::Failed);

    match task.retry().await.unwrap() {
        ConfirmProgress::Submitted { tx_hashes } => assert_eq!(tx_hashes.len(), 2),
        other => panic!("unexpected {:?}", other),
    }
    let requests = h.signer.requests.lock().unwrap();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].index, 1);
    assert_eq!(h.pending.count(), 2);
}

#[tokio::test]
async fn test_speed_up_keeps_its_nonce() {
    let h = Harness::new();
    let mut tx = transfer(eth(0.1));
    tx.nonce = Some(serde_json::json!("0x5"));
    let mut request = h.request(vec![tx]);
    request.hints.is_speed_up = true;
    let task = h.task(request);
    assert!(task.prefetch().await.unwrap());
    assert!(matches!(task.set_nonce(0, 9).await, Err(ApprovalError::NonceLocked(0))));

    h.signer.fail_next(SigningError::NonceTooLow("nonce too low".into()));
    assert!(task.confirm().await.is_err());
    assert_eq!(task.snapshot().retry_hint, RetryHint::RefreshNonce);

    assert!(matches!(task.retry().await, Err(ApprovalError::NonceLocked(0))));
    assert_eq!(task.status(), TaskStatus::Failed);
    assert_eq!(task.drafts()[0].nonce, Some(5));
    let requests = h.signer.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].draft.nonce, Some(5));
}

#[tokio::test]
async fn test_retry_requires_failed_task() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    assert!(matches!(
        task.retry().await,
        Err(ApprovalError::InvalidState { action: "retry", .. })
    ));
}

#[tokio::test]
async fn test_watch_only_cannot_process() {
    let h = Harness::new();
    let mut request = h.request(vec![transfer(eth(0.1))]);
    request.account = Account::new(sender(), KeyringKind::WatchOnly);
    let task = h.task(request);

    assert!(task.prefetch().await.unwrap());
    assert_eq!(
        task.blockers(),
        vec![ConfirmBlocker::CannotProcess {
            reason: CantProcessReason::WatchOnly
        }]
    );
    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 0);
    assert!(task.confirm().await.is_err());
}

#[tokio::test]
async fn test_danger_rule_blocks_until_processed() {
    let h = Harness::new();
    *h.security.results.lock().unwrap() = vec![
        RuleResult::new("1016", Level::Danger),
        RuleResult::new("1002", Level::Safe),
    ];
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;

    assert_eq!(
        task.blockers(),
        vec![ConfirmBlocker::SecurityUnprocessed {
            rule_ids: vec!["1016".to_string()]
        }]
    );
    assert!(task.process_rule("1016"));
    assert!(task.blockers().is_empty());
    assert!(task.unprocess_rule("1016"));
    assert!(!task.blockers().is_empty());

    task.process_all_rules();
    assert!(task.confirm().await.is_ok());
}

#[tokio::test]
async fn test_short_balance_switches_to_gas_account_once() {
    let mut h = Harness::new();
    h.chain_state = std::sync::Arc::new(MockChainState::new(7, U256::from(100_000_000_000_000u128)));
    let task = h.task(h.logged_in(h.request(vec![transfer(U256::ZERO)])));
    assert!(task.prefetch().await.unwrap());

    let snapshot = task.snapshot();
    assert!(snapshot
        .gas_errors
        .iter()
        .any(|e| e.code == GasCheckCode::InsufficientBalance));
    assert_eq!(snapshot.payment_method, GasPaymentMethod::GasAccount);
    assert!(snapshot.blockers.is_empty());

    task.set_payment_method(GasPaymentMethod::Native).unwrap();
    assert_eq!(
        task.blockers(),
        vec![ConfirmBlocker::GasCheck {
            index: 0,
            code: GasCheckCode::InsufficientBalance
        }]
    );
    task.prefetch().await.unwrap();
    assert_eq!(task.payment_method(), GasPaymentMethod::Native);

    task.set_payment_method(GasPaymentMethod::GasAccount).unwrap();
    task.confirm().await.unwrap();
    let requests = h.signer.requests.lock().unwrap();
    assert_eq!(requests[0].payment_method, GasPaymentMethod::GasAccount);
    assert!(requests[0].gas_account.is_some());
}

#[tokio::test]
async fn test_promotion_alone_advertises_gasless() {
    let h = Harness::new();
    *h.gasless.check.lock().unwrap() = Ok(GaslessCheck {
        is_gasless: false,
        desc: None,
        promotion: Some(GaslessPromotion {
            id: "promo".to_string(),
            config: None,
        }),
    });
    let task = h.task(h.logged_in(h.request(vec![transfer(eth(0.1))])));
    task.prefetch().await.unwrap();
    assert_eq!(task.payment_method(), GasPaymentMethod::GasAccount);
}

#[tokio::test]
async fn test_no_switch_without_advertisement() {
    let h = Harness::new();
    let task = h.task(h.logged_in(h.request(vec![transfer(eth(0.1))])));
    task.prefetch().await.unwrap();
    assert_eq!(task.payment_method(), GasPaymentMethod::Native);
}

#[tokio::test]
async fn test_failed_gasless_check_reruns_on_next_prefetch() {
    let h = Harness::new();
    *h.gasless.check.lock().unwrap() = Err(ServiceError::request("gasless", "connection reset"));
    let task = h.task(h.request(vec![transfer(eth(0.1))]));

    assert!(task.prefetch().await.unwrap());
    assert!(task.snapshot().notices.iter().any(|n| n.step == PrefetchStep::Gasless));
    assert!(task.set_payment_method(GasPaymentMethod::Gasless).is_err());

    *h.gasless.check.lock().unwrap() = Ok(GaslessCheck {
        is_gasless: true,
        ..GaslessCheck::default()
    });
    assert!(task.prefetch().await.unwrap());
    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 2);
    assert!(task.snapshot().notices.is_empty());
    task.set_payment_method(GasPaymentMethod::Gasless).unwrap();

    task.prefetch().await.unwrap();
    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_auto_switch_waits_for_failed_gas_account_check() {
    let mut h = Harness::new();
    h.chain_state = std::sync::Arc::new(MockChainState::new(7, U256::from(100_000_000_000_000u128)));
    *h.gas_account.check.lock().unwrap() = Err(ServiceError::request("gas account", "timeout"));
    let task = h.task(h.logged_in(h.request(vec![transfer(U256::ZERO)])));

    assert!(task.prefetch().await.unwrap());
    let snapshot = task.snapshot();
    assert_eq!(snapshot.payment_method, GasPaymentMethod::Native);
    assert!(snapshot.notices.iter().any(|n| n.step == PrefetchStep::GasAccount));

    *h.gas_account.check.lock().unwrap() = Ok(usable_gas_account());
    assert!(task.prefetch().await.unwrap());
    let snapshot = task.snapshot();
    assert_eq!(snapshot.payment_method, GasPaymentMethod::GasAccount);
    assert!(snapshot.notices.is_empty());
    assert_eq!(h.gas_account.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_gasless_unavailable_cannot_be_selected() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    assert!(matches!(
        task.set_payment_method(GasPaymentMethod::Gasless),
        Err(ApprovalError::Payment(_))
    ));
}

#[tokio::test]
async fn test_gas_limit_edit_rechecks() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;

    task.set_gas_limit(0, 20_000).await.unwrap();
    let snapshot = task.snapshot();
    assert_eq!(snapshot.edit_revision, 1);
    assert!(snapshot.blockers.contains(&ConfirmBlocker::GasCheck {
        index: 0,
        code: GasCheckCode::GasLimitTooLow
    }));

    task.set_gas_limit(0, 25_000).await.unwrap();
    let snapshot = task.snapshot();
    assert!(snapshot
        .gas_errors
        .iter()
        .any(|e| e.code == GasCheckCode::GasLimitBelowRecommended));
    assert!(snapshot.blockers.is_empty());

    // exactly the estimated usage sits between the two bands
    task.set_gas_limit(0, 21_000).await.unwrap();
    assert!(task.snapshot().gas_errors.is_empty());

    assert!(matches!(
        task.set_gas_limit(3, 21_000).await,
        Err(ApprovalError::NoSuchItem(3))
    ));
}

#[tokio::test]
async fn test_lowered_nonce_flags_3003() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    task.set_nonce(0, 3).await.unwrap();
    assert!(task
        .snapshot()
        .gas_errors
        .iter()
        .any(|e| e.code == GasCheckCode::NonceTooLow));
}

#[tokio::test]
async fn test_gas_level_selection_reprices() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;

    task.select_gas_level(GasLevelKind::Fast, None).await.unwrap();
    assert_eq!(task.drafts()[0].max_fee_per_gas, Some(20 * GWEI));

    task.select_gas_level(GasLevelKind::Custom, Some(15 * GWEI)).await.unwrap();
    let draft = &task.drafts()[0];
    assert_eq!(draft.max_fee_per_gas, Some(15 * GWEI));
    assert_eq!(draft.max_priority_fee_per_gas, Some(15 * GWEI));
    assert_eq!(task.snapshot().gas_level, GasLevelKind::Custom);
}

#[tokio::test]
async fn test_edits_refused_after_submit() {
    let h = Harness::new();
    let task = h.ready_task(vec![transfer(eth(0.1))]).await;
    task.confirm().await.unwrap();

    assert!(matches!(
        task.set_gas_limit(0, 50_000).await,
        Err(ApprovalError::InvalidState {
            status: TaskStatus::Submitted,
            ..
        })
    ));
    assert!(task.reject().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_payment_rechecks_coalesce() {
    let h = Harness::new();
    let task = h.task(h.logged_in(h.request(vec![transfer(eth(0.1))])));
    task.prefetch().await.unwrap();
    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gas_account.calls.load(Ordering::SeqCst), 1);

    let (a, b, c) = tokio::join!(
        task.set_gas_limit(0, 40_000),
        task.set_gas_limit(0, 41_000),
        task.set_gas_limit(0, 42_000)
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(h.gasless.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.gas_account.calls.load(Ordering::SeqCst), 2);
    assert_eq!(task.drafts()[0].gas_limit, Some(42_000));
    assert_eq!(task.snapshot().edit_revision, 3);
}

#[tokio::test]
async fn test_snapshots_published() {
    let h = Harness::new();
    let task = h.task(h.request(vec![transfer(eth(0.1))]));
    let mut rx = task.subscribe();
    assert!(!rx.borrow().ready);

    task.prefetch().await.unwrap();
    assert!(rx.has_changed().unwrap());
    let snapshot = rx.borrow_and_update().clone();
    assert!(snapshot.ready);
    assert_eq!(snapshot.status, TaskStatus::Prefetching);
    assert!(snapshot.items[0].cost.is_some());
}
