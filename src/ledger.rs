//! Ledger service
//!
//! Applies one validated transaction to an account. Every write goes through
//! the caller's [`StoreTx`], so the balance change and the transaction record
//! commit (or vanish) together.

use crate::budget::{BudgetEvaluator, AI_SUGGESTION};
use crate::config::AccountPolicy;
use crate::currency::{normalize_code, CurrencyConverter};
use crate::models::{Account, LedgerOutcome, Transaction, TransactionRequest, TransactionType};
use crate::state::StoreTx;
use crate::Result;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const IGNORED_MESSAGE: &str = "Transaction type unclear or amount missing. Logged for review.";

pub struct LedgerService {
    converter: Arc<dyn CurrencyConverter>,
    budget: BudgetEvaluator,
    policy: AccountPolicy,
}

impl LedgerService {
    pub fn new(
        converter: Arc<dyn CurrencyConverter>,
        budget: BudgetEvaluator,
        policy: AccountPolicy,
    ) -> Self {
        Self {
            converter,
            budget,
            policy,
        }
    }

    /// Store errors propagate; everything else resolves to a [`LedgerOutcome`].
    pub async fn process_transaction(
        &self,
        tx: &mut dyn StoreTx,
        request: &TransactionRequest,
    ) -> Result<LedgerOutcome> {
        let amount = match (request.type_of_transaction, request.amount) {
            (TransactionType::Unknown, _) | (_, None) => {
                info!(user_id = %request.user_id, "Transaction ignored");
                return Ok(LedgerOutcome::Ignored {
                    message: IGNORED_MESSAGE.to_string(),
                });
            }
            (_, Some(amount)) => amount.abs(),
        };

        let currency = normalize_code(&request.currency);

        let account = match tx
            .find_account(request.user_id, &request.institution_name)
            .await?
        {
            Some(account) => account,
            None => match self.policy {
                AccountPolicy::AutoCreate => {
                    let account = Account::new(request.user_id, &request.institution_name, &currency);
                    info!(
                        user_id = %request.user_id,
                        institution = %account.institution_name,
                        currency = %account.currency,
                        "Auto-creating account"
                    );
                    tx.insert_account(&account).await?
                }
                AccountPolicy::RequireExisting => {
                    warn!(
                        user_id = %request.user_id,
                        institution = %request.institution_name,
                        "No registered account for institution"
                    );
                    return Ok(LedgerOutcome::Error {
                        message: format!(
                            "Account not found for institution '{}'",
                            request.institution_name
                        ),
                    });
                }
            },
        };

        let normalized = match self.converter.convert(amount, &currency, &account.currency).await {
            Ok(conversion) => conversion.amount,
            Err(e) => {
                warn!(
                    from = %currency,
                    to = %account.currency,
                    error = %e,
                    "Currency conversion failed, using original amount"
                );
                amount
            }
        };

        let alert_triggered = request.type_of_transaction == TransactionType::Withdraw
            && self.budget.is_over_budget(normalized, account.balance);

        let delta = match request.type_of_transaction {
            TransactionType::Withdraw => -normalized,
            _ => normalized,
        };
        let new_balance = tx.apply_balance_delta(account.id, delta).await?;

        let transaction = Transaction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            account_id: account.id,
            amount,
            currency,
            type_of_transaction: request.type_of_transaction,
            is_over_budget_alert: alert_triggered,
            created_at: request.received_at,
        };
        tx.insert_transaction(&transaction).await?;

        info!(
            user_id = %request.user_id,
            transaction_id = %transaction.id,
            new_balance,
            currency = %account.currency,
            alert_triggered,
            "Transaction applied"
        );

        Ok(LedgerOutcome::Success {
            new_balance,
            account_currency: account.currency,
            transaction_id: transaction.id,
            alert_triggered,
            ai_suggestion: alert_triggered.then(|| AI_SUGGESTION.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{Conversion, CurrencyNormalizer};
    use crate::error::GatekeeperError;
    use crate::state::{InMemoryStore, Store};
    use chrono::Utc;

    struct BrokenConverter;

    #[async_trait::async_trait]
    impl CurrencyConverter for BrokenConverter {
        async fn convert(&self, _amount: f64, _from: &str, _to: &str) -> Result<Conversion> {
            Err(GatekeeperError::Currency("rates offline".to_string()))
        }
    }

    fn service(policy: AccountPolicy) -> LedgerService {
        LedgerService::new(
            Arc::new(CurrencyNormalizer::offline()),
            BudgetEvaluator::default(),
            policy,
        )
    }

    fn request(
        user_id: Uuid,
        amount: Option<f64>,
        currency: &str,
        kind: TransactionType,
    ) -> TransactionRequest {
        TransactionRequest {
            user_id,
            amount,
            currency: currency.to_string(),
            type_of_transaction: kind,
            institution_name: "MBBank".to_string(),
            received_at: Utc::now(),
        }
    }

    async fn funded_store(user_id: Uuid, balance: f64) -> InMemoryStore {
        let store = InMemoryStore::new();
        let account = store
            .register_account(Account::new(user_id, "MBBank", "VND"))
            .await
            .unwrap();
        let mut tx = store.begin().await.unwrap();
        tx.apply_balance_delta(account.id, balance).await.unwrap();
        tx.commit().await.unwrap();
        store
    }

    async fn run(
        store: &InMemoryStore,
        ledger: &LedgerService,
        request: &TransactionRequest,
    ) -> LedgerOutcome {
        let mut tx = store.begin().await.unwrap();
        let outcome = ledger.process_transaction(tx.as_mut(), request).await.unwrap();
        tx.commit().await.unwrap();
        outcome
    }

    #[tokio::test]
    async fn test_large_withdraw_triggers_absolute_alert() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 1_000_000.0).await;

        let outcome = run(
            &store,
            &service(AccountPolicy::AutoCreate),
            &request(user_id, Some(5_500_000.0), "VND", TransactionType::Withdraw),
        )
        .await;

        match outcome {
            LedgerOutcome::Success {
                new_balance,
                alert_triggered,
                ai_suggestion,
                ..
            } => {
                assert_eq!(new_balance, -4_500_000.0);
                assert!(alert_triggered);
                assert_eq!(ai_suggestion.as_deref(), Some(AI_SUGGESTION));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let transactions = store.transactions_for_user(user_id).await.unwrap();
        assert_eq!(transactions.len(), 1);
        assert!(transactions[0].is_over_budget_alert);
    }

    #[tokio::test]
    async fn test_foreign_withdraw_normalized_without_alert() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 10_000_000.0).await;

        let outcome = run(
            &store,
            &service(AccountPolicy::AutoCreate),
            &request(user_id, Some(100.0), "USD", TransactionType::Withdraw),
        )
        .await;

        match outcome {
            LedgerOutcome::Success {
                new_balance,
                account_currency,
                alert_triggered,
                ai_suggestion,
                ..
            } => {
                assert_eq!(new_balance, 7_460_000.0);
                assert_eq!(account_currency, "VND");
                assert!(!alert_triggered);
                assert_eq!(ai_suggestion, None);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Original amount and currency are what gets recorded
        let transactions = store.transactions_for_user(user_id).await.unwrap();
        assert_eq!(transactions[0].amount, 100.0);
        assert_eq!(transactions[0].currency, "USD");
    }

    #[tokio::test]
    async fn test_deposit_adds_normalized_amount() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 50_000.0).await;

        run(
            &store,
            &service(AccountPolicy::AutoCreate),
            &request(user_id, Some(2.0), "EUR", TransactionType::Deposit),
        )
        .await;

        let accounts = store.accounts_for_user(user_id).await.unwrap();
        assert_eq!(accounts[0].balance, 50_000.0 + 55_000.0);
        assert_eq!(store.transactions_for_user(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_or_missing_amount_is_ignored() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 100.0).await;
        let ledger = service(AccountPolicy::AutoCreate);

        for req in [
            request(user_id, Some(10.0), "VND", TransactionType::Unknown),
            request(user_id, None, "VND", TransactionType::Deposit),
        ] {
            let outcome = run(&store, &ledger, &req).await;
            assert_eq!(
                outcome,
                LedgerOutcome::Ignored {
                    message: IGNORED_MESSAGE.to_string()
                }
            );
        }

        assert!(store.transactions_for_user(user_id).await.unwrap().is_empty());
        assert_eq!(store.accounts_for_user(user_id).await.unwrap()[0].balance, 100.0);
    }

    #[tokio::test]
    async fn test_auto_create_uses_transaction_currency() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();

        let outcome = run(
            &store,
            &service(AccountPolicy::AutoCreate),
            &request(user_id, Some(40.0), "usd", TransactionType::Deposit),
        )
        .await;

        assert!(matches!(outcome, LedgerOutcome::Success { new_balance, .. } if new_balance == 40.0));
        let accounts = store.accounts_for_user(user_id).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].currency, "USD");
        assert_eq!(accounts[0].institution_name, "MBBank");
    }

    #[tokio::test]
    async fn test_require_existing_reports_error() {
        let store = InMemoryStore::new();
        let user_id = Uuid::new_v4();

        let outcome = run(
            &store,
            &service(AccountPolicy::RequireExisting),
            &request(user_id, Some(40.0), "VND", TransactionType::Deposit),
        )
        .await;

        assert!(matches!(outcome, LedgerOutcome::Error { .. }));
        assert!(store.accounts_for_user(user_id).await.unwrap().is_empty());
        assert!(store.transactions_for_user(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_converter_failure_uses_original_amount() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 1_000.0).await;
        let ledger = LedgerService::new(
            Arc::new(BrokenConverter),
            BudgetEvaluator::default(),
            AccountPolicy::AutoCreate,
        );

        let outcome = run(
            &store,
            &ledger,
            &request(user_id, Some(100.0), "USD", TransactionType::Withdraw),
        )
        .await;

        assert!(matches!(outcome, LedgerOutcome::Success { new_balance, .. } if new_balance == 900.0));
    }

    #[tokio::test]
    async fn test_relative_rule_uses_pre_transaction_balance() {
        let user_id = Uuid::new_v4();
        let store = funded_store(user_id, 1_000_000.0).await;

        let outcome = run(
            &store,
            &service(AccountPolicy::AutoCreate),
            &request(user_id, Some(300_000.0), "VND", TransactionType::Withdraw),
        )
        .await;

        assert!(matches!(
            outcome,
            LedgerOutcome::Success { alert_triggered: true, new_balance, .. } if new_balance == 700_000.0
        ));
    }
}
