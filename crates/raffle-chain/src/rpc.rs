//! JSON-RPC ledger client.
//!
//! Talks `getTransaction` with `jsonParsed` encoding and decodes the reply
//! into a [`LedgerTransaction`]. Anything that does not match the expected
//! shape is a [`ChainError::Decode`], never a partially filled transaction.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raffle_types::TxSignature;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::client::LedgerClient;
use crate::config::Commitment;
use crate::error::{ChainError, ChainResult};
use crate::transaction::{LedgerTransaction, TokenBalanceChange};

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    block_time: Option<i64>,
    meta: Option<RpcMeta>,
    transaction: RpcEnvelope,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMeta {
    err: Option<serde_json::Value>,
    pre_balances: Vec<u64>,
    post_balances: Vec<u64>,
    #[serde(default)]
    pre_token_balances: Option<Vec<RpcTokenBalance>>,
    #[serde(default)]
    post_token_balances: Option<Vec<RpcTokenBalance>>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    message: RpcMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    account_keys: Vec<RpcAccountKey>,
}

/// `jsonParsed` returns objects; legacy encodings return bare strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcAccountKey {
    Parsed {
        pubkey: String,
        #[serde(default)]
        signer: bool,
    },
    Plain(String),
}

impl RpcAccountKey {
    fn pubkey(&self) -> &str {
        match self {
            Self::Parsed { pubkey, .. } => pubkey,
            Self::Plain(key) => key,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTokenBalance {
    account_index: usize,
    mint: String,
    owner: Option<String>,
    ui_token_amount: RpcTokenAmount,
}

#[derive(Debug, Deserialize)]
struct RpcTokenAmount {
    amount: String,
    decimals: u32,
}

impl RpcTransaction {
    fn into_ledger(self, signature: &TxSignature) -> ChainResult<LedgerTransaction> {
        let meta = self
            .meta
            .ok_or_else(|| ChainError::Decode("transaction meta missing".into()))?;
        let keys = self.transaction.message.account_keys;

        if keys.is_empty() {
            return Err(ChainError::Decode("no account keys".into()));
        }
        if meta.pre_balances.len() != keys.len() || meta.post_balances.len() != keys.len() {
            return Err(ChainError::Decode(format!(
                "balance arrays ({}, {}) do not match {} account keys",
                meta.pre_balances.len(),
                meta.post_balances.len(),
                keys.len()
            )));
        }

        let block_time = self
            .block_time
            .map(|secs| {
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .ok_or_else(|| ChainError::Decode(format!("block time out of range: {secs}")))
            })
            .transpose()?;

        let signers = keys
            .iter()
            .filter_map(|k| match k {
                RpcAccountKey::Parsed { pubkey, signer: true } => Some(pubkey.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();
        // Legacy encodings carry no signer flags; the fee payer always signs.
        let signers = if signers.is_empty() {
            vec![keys[0].pubkey().to_string()]
        } else {
            signers
        };
        let account_keys: Vec<String> = keys.iter().map(|k| k.pubkey().to_string()).collect();

        let token_balances = merge_token_balances(
            &account_keys,
            meta.pre_token_balances.unwrap_or_default(),
            meta.post_token_balances.unwrap_or_default(),
        )?;

        Ok(LedgerTransaction {
            signature: signature.clone(),
            failed: meta.err.is_some_and(|e| !e.is_null()),
            block_time,
            account_keys,
            signers,
            pre_balances: meta.pre_balances,
            post_balances: meta.post_balances,
            token_balances,
        })
    }
}

fn parse_raw(amount: &str) -> ChainResult<u128> {
    amount
        .parse::<u128>()
        .map_err(|_| ChainError::Decode(format!("invalid token amount {amount:?}")))
}

/// Join pre- and post-transaction token balances by account index. An
/// account missing on one side had a zero balance there (created or closed
/// by the transaction).
fn merge_token_balances(
    account_keys: &[String],
    pre: Vec<RpcTokenBalance>,
    post: Vec<RpcTokenBalance>,
) -> ChainResult<Vec<TokenBalanceChange>> {
    let mut merged: BTreeMap<usize, TokenBalanceChange> = BTreeMap::new();

    for (side_is_pre, balances) in [(true, pre), (false, post)] {
        for b in balances {
            let account = account_keys.get(b.account_index).ok_or_else(|| {
                ChainError::Decode(format!("token account index {} out of range", b.account_index))
            })?;
            let raw = parse_raw(&b.ui_token_amount.amount)?;
            let slot = merged.entry(b.account_index).or_insert_with(|| TokenBalanceChange {
                account: account.clone(),
                mint: b.mint.clone(),
                owner: b.owner.clone(),
                decimals: b.ui_token_amount.decimals,
                pre: 0,
                post: 0,
            });
            if slot.mint != b.mint {
                return Err(ChainError::Decode(format!(
                    "token account {account} changes mint within one transaction"
                )));
            }
            if slot.owner.is_none() {
                slot.owner = b.owner;
            }
            if side_is_pre {
                slot.pre = raw;
            } else {
                slot.post = raw;
            }
        }
    }

    Ok(merged.into_values().collect())
}

/// [`LedgerClient`] over HTTP JSON-RPC.
pub struct RpcLedgerClient {
    endpoint: String,
    client: Client,
}

impl RpcLedgerClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> ChainResult<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ChainError::Misconfigured);
        }
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self { endpoint, client })
    }

    fn request(signature: &TxSignature, commitment: Commitment) -> RpcRequest {
        RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "getTransaction",
            params: json!([
                signature.as_str(),
                {
                    "encoding": "jsonParsed",
                    "commitment": commitment.as_str(),
                    "maxSupportedTransactionVersion": 0
                }
            ]),
        }
    }
}

/// Decode a raw `getTransaction` reply body.
pub fn decode_transaction_response(
    signature: &TxSignature,
    body: &[u8],
) -> ChainResult<Option<LedgerTransaction>> {
    let response: RpcResponse<RpcTransaction> =
        serde_json::from_slice(body).map_err(|e| ChainError::Decode(e.to_string()))?;
    if let Some(err) = response.error {
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    response
        .result
        .map(|tx| tx.into_ledger(signature))
        .transpose()
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    fn endpoint(&self) -> Option<&str> {
        Some(&self.endpoint)
    }

    async fn get_transaction(
        &self,
        signature: &TxSignature,
        commitment: Commitment,
    ) -> ChainResult<Option<LedgerTransaction>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&Self::request(signature, commitment))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("rpc returned HTTP {status}")));
        }
        let body = response.bytes().await?;
        debug!(proof = signature.short(), bytes = body.len(), "rpc reply received");
        decode_transaction_response(signature, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> TxSignature {
        TxSignature::from_bytes([0x52; 64])
    }

    const PARSED: &str = r#"{
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "blockTime": 1700000000,
            "slot": 230000000,
            "meta": {
                "err": null,
                "fee": 5000,
                "preBalances": [2000000000, 100, 2039280, 1],
                "postBalances": [1499995000, 500000100, 2039280, 1],
                "preTokenBalances": [
                    {"accountIndex": 2, "mint": "MintX", "owner": "Treasury",
                     "uiTokenAmount": {"amount": "1000", "decimals": 6, "uiAmount": 0.001}}
                ],
                "postTokenBalances": [
                    {"accountIndex": 2, "mint": "MintX", "owner": "Treasury",
                     "uiTokenAmount": {"amount": "2500000", "decimals": 6, "uiAmount": 2.5}}
                ]
            },
            "transaction": {
                "signatures": ["sig"],
                "message": {
                    "accountKeys": [
                        {"pubkey": "Payer", "signer": true, "writable": true, "source": "transaction"},
                        {"pubkey": "Treasury", "signer": false, "writable": true, "source": "transaction"},
                        {"pubkey": "TreasuryAta", "signer": false, "writable": true, "source": "transaction"},
                        {"pubkey": "11111111111111111111111111111111", "signer": false, "writable": false, "source": "transaction"}
                    ]
                }
            }
        }
    }"#;

    #[test]
    fn decodes_parsed_transaction() {
        let tx = decode_transaction_response(&sig(), PARSED.as_bytes())
            .unwrap()
            .unwrap();
        assert!(!tx.failed);
        assert_eq!(tx.fee_payer(), Some("Payer"));
        assert_eq!(tx.signers, vec!["Payer".to_string()]);
        assert_eq!(tx.native_delta("Treasury"), Some(500_000_000));
        assert_eq!(tx.block_time.unwrap().timestamp(), 1_700_000_000);
        let token = tx.token_change("Treasury", "MintX").unwrap();
        assert_eq!(token.account, "TreasuryAta");
        assert_eq!(token.delta(), Some(2_499_000));
        assert_eq!(token.decimals, 6);
    }

    #[test]
    fn null_result_is_not_found() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        assert!(decode_transaction_response(&sig(), body).unwrap().is_none());
    }

    #[test]
    fn rpc_error_is_surfaced() {
        let body = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"Invalid param"}}"#;
        assert_eq!(
            decode_transaction_response(&sig(), body).unwrap_err(),
            ChainError::Rpc { code: -32602, message: "Invalid param".into() }
        );
    }

    fn mutate(f: impl FnOnce(&mut serde_json::Value)) -> Vec<u8> {
        let mut v: serde_json::Value = serde_json::from_str(PARSED).unwrap();
        f(&mut v["result"]);
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn failed_transaction_flagged() {
        let body = mutate(|r| r["meta"]["err"] = json!({"InstructionError": [0, "Custom"]}));
        let tx = decode_transaction_response(&sig(), &body).unwrap().unwrap();
        assert!(tx.failed);
    }

    #[test]
    fn mismatched_balance_arrays_rejected() {
        let body = mutate(|r| r["meta"]["preBalances"] = json!([2000000000u64, 100]));
        assert!(matches!(
            decode_transaction_response(&sig(), &body),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn token_index_out_of_range_rejected() {
        let body = mutate(|r| r["meta"]["postTokenBalances"][0]["accountIndex"] = json!(9));
        assert!(matches!(
            decode_transaction_response(&sig(), &body),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn non_numeric_token_amount_rejected() {
        let body = mutate(|r| r["meta"]["postTokenBalances"][0]["uiTokenAmount"]["amount"] = json!("2.5"));
        assert!(matches!(
            decode_transaction_response(&sig(), &body),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn missing_meta_rejected() {
        let body = mutate(|r| r["meta"] = serde_json::Value::Null);
        assert!(matches!(
            decode_transaction_response(&sig(), &body),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn token_account_created_in_transaction_starts_at_zero() {
        let body = mutate(|r| r["meta"]["preTokenBalances"] = json!([]));
        let tx = decode_transaction_response(&sig(), &body).unwrap().unwrap();
        assert_eq!(tx.token_change("Treasury", "MintX").unwrap().delta(), Some(2_500_000));
    }

    #[test]
    fn legacy_string_keys_accepted() {
        let body = br#"{"jsonrpc":"2.0","id":1,"result":{
            "blockTime": null,
            "meta": {"err": null, "preBalances": [10, 0], "postBalances": [5, 5]},
            "transaction": {"message": {"accountKeys": ["Payer", "Treasury"]}}
        }}"#;
        let tx = decode_transaction_response(&sig(), body).unwrap().unwrap();
        assert_eq!(tx.signers, vec!["Payer".to_string()]);
        assert!(tx.block_time.is_none());
        assert_eq!(tx.native_delta("Treasury"), Some(5));
    }

    #[test]
    fn garbage_is_decode_error() {
        assert!(matches!(
            decode_transaction_response(&sig(), b"<html>"),
            Err(ChainError::Decode(_))
        ));
    }

    #[test]
    fn rejects_non_http_endpoint() {
        assert!(matches!(
            RpcLedgerClient::new("ftp://node", Duration::from_secs(1)),
            Err(ChainError::Misconfigured)
        ));
        assert!(RpcLedgerClient::new("https://api.mainnet-beta.solana.com", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn request_shape() {
        let req = RpcLedgerClient::request(&sig(), Commitment::Finalized);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["method"], "getTransaction");
        assert_eq!(v["params"][1]["encoding"], "jsonParsed");
        assert_eq!(v["params"][1]["commitment"], "finalized");
        assert_eq!(v["params"][1]["maxSupportedTransactionVersion"], 0);
    }
}
