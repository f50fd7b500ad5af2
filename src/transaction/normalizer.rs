//! Raw request → canonical draft.
//!
//! Malformed numeric fields are logged and dropped; malformed addresses,
//! call data and chain ids are rejected because no repair keeps the meaning
//! of what the user is asked to approve.

use alloy::eips::eip7702::SignedAuthorization;
use alloy::primitives::{Bytes, U256};
use serde_json::Value;

use crate::chain::ChainId;
use crate::transaction::hex::{parse_address, parse_data, parse_quantity, parse_u128, parse_u64, QuantityError};
use crate::transaction::types::{
    AuthorizationList, NormalizeError, NormalizeResult, RawTransaction, RequestHints, TransactionDraft, TxFlags,
};

/// Normalize a whole batch. All entries must target one chain.
pub fn normalize_batch(
    raws: &[RawTransaction],
    default_chain: Option<ChainId>,
    hints: &RequestHints,
) -> NormalizeResult<Vec<TransactionDraft>> {
    if raws.is_empty() {
        return Err(NormalizeError::EmptyBatch);
    }

    let mut drafts = Vec::with_capacity(raws.len());
    for (index, raw) in raws.iter().enumerate() {
        let draft = normalize_transaction(index, raw, default_chain, hints)?;
        if let Some(first) = drafts.first().map(|d: &TransactionDraft| d.chain_id) {
            if first != draft.chain_id {
                return Err(NormalizeError::MixedChains {
                    expected: first,
                    actual: draft.chain_id,
                });
            }
        }
        drafts.push(draft);
    }

    tracing::debug!(
        batch_size = drafts.len(),
        chain_id = %drafts[0].chain_id,
        "Normalized transaction batch"
    );
    Ok(drafts)
}

/// Normalize one entry of a batch.
pub fn normalize_transaction(
    index: usize,
    raw: &RawTransaction,
    default_chain: Option<ChainId>,
    hints: &RequestHints,
) -> NormalizeResult<TransactionDraft> {
    let invalid = |field: &'static str, e: QuantityError| NormalizeError::InvalidField {
        index,
        field,
        reason: e.to_string(),
    };

    let chain_id = match raw.chain_id.as_ref() {
        Some(v) => parse_u64(v).map_err(|e| invalid("chainId", e))?.map(ChainId),
        None => None,
    }
    .or(default_chain)
    .ok_or(NormalizeError::MissingChain { index })?;

    let from = raw
        .from
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or(NormalizeError::MissingSender { index })?;
    let from = parse_address(from).map_err(|e| invalid("from", e))?;

    let to = match raw.to.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(parse_address(s).map_err(|e| invalid("to", e))?),
    };

    let data = match raw.data.as_deref() {
        Some(s) => parse_data(s).map_err(|e| invalid("data", e))?,
        None => Bytes::new(),
    };

    let value = lenient(index, "value", raw.value.as_ref(), parse_quantity).unwrap_or(U256::ZERO);
    let nonce = lenient(index, "nonce", raw.nonce.as_ref(), parse_u64);
    let gas_limit = lenient(index, "gas", raw.gas.as_ref(), parse_u64)
        .or_else(|| lenient(index, "gasLimit", raw.gas_limit.as_ref(), parse_u64));
    let gas_price = lenient(index, "gasPrice", raw.gas_price.as_ref(), parse_u128);
    let max_fee_per_gas = lenient(index, "maxFeePerGas", raw.max_fee_per_gas.as_ref(), parse_u128);
    let max_priority_fee_per_gas = lenient(
        index,
        "maxPriorityFeePerGas",
        raw.max_priority_fee_per_gas.as_ref(),
        parse_u128,
    );

    let authorization_list = raw
        .authorization_list
        .as_ref()
        .filter(|v| !v.is_null())
        .map(|v| parse_authorizations(index, v));

    let is_7702 = matches!(&authorization_list, Some(AuthorizationList::Signed(list)) if !list.is_empty());
    let self_cancel = nonce.is_some() && to == Some(from) && data.is_empty();

    let flags = TxFlags {
        is_send: hints.is_send,
        is_cancel: hints.is_cancel || self_cancel,
        is_speed_up: hints.is_speed_up,
        is_swap: hints.is_swap,
        is_bridge: hints.is_bridge,
        is_7702,
        is_view_gnosis_safe: hints.is_view_gnosis_safe,
    };

    Ok(TransactionDraft {
        chain_id,
        from,
        to,
        data,
        value,
        nonce,
        gas_limit,
        // A request carrying both fee styles is treated as EIP-1559.
        gas_price: if max_fee_per_gas.is_some() { None } else { gas_price },
        max_fee_per_gas,
        max_priority_fee_per_gas: max_fee_per_gas.and(max_priority_fee_per_gas),
        authorization_list,
        flags,
    })
}

/// Parse an optional field, logging and dropping it when malformed.
fn lenient<T>(
    index: usize,
    field: &'static str,
    value: Option<&Value>,
    parse: fn(&Value) -> Result<Option<T>, QuantityError>,
) -> Option<T> {
    match parse(value?) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(index, field, error = %e, "Dropping malformed transaction field");
            None
        }
    }
}

fn parse_authorizations(index: usize, value: &Value) -> AuthorizationList {
    match serde_json::from_value::<Vec<SignedAuthorization>>(value.clone()) {
        Ok(list) => AuthorizationList::Signed(list),
        Err(e) => {
            tracing::warn!(index, error = %e, "Unparseable authorization list, keeping it as-is");
            AuthorizationList::Unparsed(value.clone())
        }
    }
}
