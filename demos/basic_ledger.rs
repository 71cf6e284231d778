//! Basic ledger usage example
//!
//! Run with `RUST_LOG=ledger_core=debug` to see the engine's events.

use ledger_core::{
    AccountKind, AccountPatch, Ledger, LedgerConfig, MemoryStorage, NewAccount, TransactionPatch,
    TransactionSpec,
};
use tracing_subscriber::EnvFilter;

const OWNER: &str = "demo-user";

fn format_minor(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Ledger Core - Basic Ledger Example\n");

    let ledger = Ledger::with_config(MemoryStorage::new(), LedgerConfig::from_env()?);

    // 1. Open a few accounts
    println!("Opening accounts...");
    let checking = ledger
        .create_account(
            NewAccount {
                number_full: Some("000123456789".to_string()),
                ..NewAccount::new("Checking", AccountKind::Asset, "USD", 150_000)
            },
            OWNER,
        )
        .await?;
    let savings = ledger
        .create_account(NewAccount::new("Savings", AccountKind::Asset, "USD", 0), OWNER)
        .await?;
    let card = ledger
        .create_account(
            NewAccount::new("Credit card", AccountKind::Liability, "USD", 0),
            OWNER,
        )
        .await?;
    for view in [&checking, &savings, &card] {
        println!(
            "  {} ({:?}) {} {}",
            view.account.name,
            view.account.kind,
            view.account.number_masked.as_deref().unwrap_or("-"),
            format_minor(view.current_balance_minor)
        );
    }
    println!();

    let (checking, savings, card) = (checking.account.id, savings.account.id, card.account.id);

    // 2. Move money around
    println!("Recording transactions...");
    let transfer = ledger
        .create_transaction(TransactionSpec::transfer(checking, savings, 40_000), OWNER)
        .await?;
    println!("  transfer {}", transfer.transaction.id);

    let payment = ledger
        .create_transaction(
            TransactionSpec {
                kind: "card_payment".to_string(),
                description: Some("Pay off card".to_string()),
                ..TransactionSpec::transfer(checking, card, 12_500)
            },
            OWNER,
        )
        .await?;
    println!("  card payment {}", payment.transaction.id);
    println!();

    // 3. Amend the transfer; old lines are compensated, never rewritten
    println!("Amending transfer to 45.00...");
    let amended = ledger
        .update_transaction(
            transfer.transaction.id,
            TransactionPatch {
                account_from: Some(Some(checking)),
                account_to: Some(Some(savings)),
                amount_minor: Some(4_500),
                ..TransactionPatch::default()
            },
            OWNER,
        )
        .await?;
    println!("  transfer now has {} lines", amended.lines.len());
    println!();

    // 4. Reverse the card payment
    println!("Reversing card payment...");
    let reversal = ledger
        .reverse_transaction(payment.transaction.id, OWNER)
        .await?;
    println!("  reversal {}", reversal.transaction.id);
    if let Err(err) = ledger
        .reverse_transaction(payment.transaction.id, OWNER)
        .await
    {
        println!("  second reversal refused: {err}");
    }
    println!();

    // 5. Reconcile savings to a bank statement
    println!("Reconciling savings to 50.00...");
    let update = ledger
        .update_account(
            savings,
            AccountPatch {
                balance_minor: Some(5_000),
                ..AccountPatch::default()
            },
            OWNER,
        )
        .await?;
    if let Some(adjustment) = &update.adjustment {
        println!(
            "  adjustment {} ({})",
            adjustment.transaction.id,
            adjustment.transaction.description.as_deref().unwrap_or("")
        );
    }
    println!();

    // 6. Final balances
    println!("Balances:");
    for view in ledger.list_accounts(OWNER).await? {
        println!(
            "  {:<12} {:>12}",
            view.account.name,
            format_minor(view.current_balance_minor)
        );
    }
    println!();

    println!("Recent transactions:");
    for txn in ledger.list_transactions_in_range(OWNER, 1, 5).await? {
        println!(
            "  {} {:<12} {} lines",
            txn.transaction.date,
            txn.transaction.kind,
            txn.lines.len()
        );
    }

    let report = ledger.verify_integrity(OWNER).await?;
    println!(
        "\nIntegrity: {} ({} transactions checked)",
        if report.is_clean() { "clean" } else { "issues found" },
        report.transactions_checked
    );

    println!("\nExample completed successfully!");
    Ok(())
}
