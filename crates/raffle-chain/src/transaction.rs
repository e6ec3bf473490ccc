use chrono::{DateTime, Utc};
use raffle_types::TxSignature;
use serde::{Deserialize, Serialize};

/// Token balance of one account before and after a transaction, in raw units.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalanceChange {
    pub account: String,
    pub mint: String,
    pub owner: Option<String>,
    pub decimals: u32,
    pub pre: u128,
    pub post: u128,
}

impl TokenBalanceChange {
    /// Signed change in raw units, or `None` if it does not fit an `i128`.
    pub fn delta(&self) -> Option<i128> {
        let pre = i128::try_from(self.pre).ok()?;
        let post = i128::try_from(self.post).ok()?;
        post.checked_sub(pre)
    }
}

/// A decoded ledger transaction, reduced to what claim verification needs.
///
/// `pre_balances` and `post_balances` are index-aligned with `account_keys`;
/// the decoder guarantees equal lengths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub signature: TxSignature,
    pub failed: bool,
    pub block_time: Option<DateTime<Utc>>,
    /// Account keys in message order; index 0 is the fee payer.
    pub account_keys: Vec<String>,
    pub signers: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub token_balances: Vec<TokenBalanceChange>,
}

impl LedgerTransaction {
    /// A successful transaction paid for by `fee_payer` with no transfers.
    pub fn new(signature: TxSignature, fee_payer: impl Into<String>) -> Self {
        let payer = fee_payer.into();
        Self {
            signature,
            failed: false,
            block_time: Some(Utc::now()),
            account_keys: vec![payer.clone()],
            signers: vec![payer],
            pre_balances: vec![0],
            post_balances: vec![0],
            token_balances: Vec::new(),
        }
    }

    pub fn fee_payer(&self) -> Option<&str> {
        self.account_keys.first().map(String::as_str)
    }

    pub fn is_signer(&self, account: &str) -> bool {
        self.signers.iter().any(|s| s == account)
    }

    /// Lamport delta of `account`, or `None` if it is not in the transaction.
    pub fn native_delta(&self, account: &str) -> Option<i128> {
        let index = self.account_keys.iter().position(|k| k == account)?;
        let pre = *self.pre_balances.get(index)?;
        let post = *self.post_balances.get(index)?;
        Some(post as i128 - pre as i128)
    }

    /// Token movement into the account `owner` holds for `mint`.
    pub fn token_change(&self, owner: &str, mint: &str) -> Option<&TokenBalanceChange> {
        self.token_balances
            .iter()
            .find(|b| b.mint == mint && b.owner.as_deref() == Some(owner))
    }

    pub fn with_block_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.block_time = at;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.failed = true;
        self
    }

    /// Add a native transfer of `lamports` from the fee payer to `to`.
    pub fn with_native_transfer(mut self, to: impl Into<String>, lamports: u64) -> Self {
        let start = 10_000_000_000u64;
        self.pre_balances[0] = start;
        self.post_balances[0] = start.saturating_sub(lamports);
        let to = to.into();
        match self.account_keys.iter().position(|k| *k == to) {
            Some(i) => self.post_balances[i] += lamports,
            None => {
                self.account_keys.push(to);
                self.pre_balances.push(start);
                self.post_balances.push(start + lamports);
            }
        }
        self
    }

    /// Add a token transfer of `raw` units into `owner`'s account for `mint`.
    pub fn with_token_transfer(
        mut self,
        owner: impl Into<String>,
        mint: impl Into<String>,
        decimals: u32,
        raw: u128,
    ) -> Self {
        let owner = owner.into();
        let account = format!("ata-{}-{}", self.token_balances.len(), owner);
        self.account_keys.push(account.clone());
        self.pre_balances.push(2_039_280);
        self.post_balances.push(2_039_280);
        self.token_balances.push(TokenBalanceChange {
            account,
            mint: mint.into(),
            owner: Some(owner),
            decimals,
            pre: 5_000_000,
            post: 5_000_000 + raw,
        });
        self
    }
}
