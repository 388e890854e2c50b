//! Stateless helpers for turning wallet transactions into transfer notifications.

use std::collections::{BTreeMap, HashMap};

use helius_laserstream::{
    grpc::{SubscribeRequestFilterTransactions, SubscribeUpdateTransaction},
    solana::storage::confirmed_block::TokenBalance,
};

use crate::consts::WALLET_FILTER;
use crate::types::{TransactionNotification, TransferDirection};

/// Creates the subscription filter for successful, non-vote transactions
/// touching `address`.
///
/// Returns a HashMap to be used as the SubscribeRequest's transactions field.
pub fn create_filter(address: &str) -> HashMap<String, SubscribeRequestFilterTransactions> {
    let mut transactions = HashMap::new();
    let tx_filter = SubscribeRequestFilterTransactions {
        vote: Some(false),
        failed: Some(false),
        account_include: vec![address.into()],
        ..Default::default()
    };
    transactions.insert(WALLET_FILTER.into(), tx_filter);
    transactions
}

/// Processes a transaction update and extracts the token balance changes of
/// the accounts owned by `address`, one notification per mint.
pub fn process_update(
    address: &str,
    txn: &SubscribeUpdateTransaction,
) -> Vec<TransactionNotification> {
    let Some((info, meta)) = txn
        .transaction
        .as_ref()
        .and_then(|t| t.meta.as_ref().map(|m| (t, m)))
        .filter(|(_, m)| m.err.is_none())
    else {
        return Vec::new();
    };

    let signature = bs58::encode(&info.signature).into_string();

    token_deltas(address, &meta.pre_token_balances, &meta.post_token_balances)
        .into_iter()
        .filter_map(|(token_mint, delta)| {
            let direction = if delta > 0 {
                TransferDirection::Received
            } else {
                TransferDirection::Sent
            };
            let raw_amount = u64::try_from(delta.unsigned_abs()).ok()?;
            Some(TransactionNotification {
                address: address.to_owned(),
                raw_amount,
                token_mint,
                signature: signature.clone(),
                direction,
                slot: txn.slot,
            })
        })
        .collect()
}

/// Net balance change per mint across all token accounts owned by `owner`.
/// Mints without a change are left out.
pub(crate) fn token_deltas(
    owner: &str,
    pre: &[TokenBalance],
    post: &[TokenBalance],
) -> BTreeMap<String, i128> {
    let mut deltas = BTreeMap::<String, i128>::new();

    for balance in pre.iter().filter(|b| b.owner == owner) {
        *deltas.entry(balance.mint.clone()).or_default() -= raw_balance(balance);
    }
    for balance in post.iter().filter(|b| b.owner == owner) {
        *deltas.entry(balance.mint.clone()).or_default() += raw_balance(balance);
    }

    deltas.retain(|_, delta| *delta != 0);
    deltas
}

fn raw_balance(balance: &TokenBalance) -> i128 {
    balance
        .ui_token_amount
        .as_ref()
        .and_then(|amount| amount.amount.parse::<u64>().ok())
        .map_or(0, i128::from)
}
