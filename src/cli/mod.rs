use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::{
    AppError, Caller, FaultInjection, LedgerService, NewTransaction, TransactionUpdate, WriteMode,
    parse_kind,
};
use crate::domain::{TransactionKind, format_cents, parse_cents};

/// Tally - balance ledger engine
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Record credits and debits against an account balance")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(long, default_value = "tally.db")]
    pub database: String,

    /// Account to act as (UUID printed by `account open`)
    #[arg(short, long, global = true)]
    pub account: Option<String>,

    /// Fail any transaction of exactly 999.99 after its row is written
    #[arg(long, global = true)]
    pub simulate_failures: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Add money to the account
    Credit(EntryArgs),

    /// Take money from the account
    Debit(EntryArgs),

    /// Change amount, kind and description of a transaction
    Update {
        /// Transaction ID
        id: String,

        /// New amount (e.g., "50.00" or "50")
        amount: String,

        /// New kind: credit or debit
        #[arg(short, long)]
        kind: String,

        /// New description
        #[arg(short, long)]
        description: String,
    },

    /// Permanently delete a transaction and undo its effect on the balance
    Delete {
        /// Transaction ID
        id: String,
    },

    /// List transactions, newest first
    List,

    /// Show one transaction as JSON
    Show {
        /// Transaction ID
        id: String,
    },

    /// Compare the stored balance with the transaction log
    Check,
}

#[derive(clap::Args)]
pub struct EntryArgs {
    /// Amount (e.g., "50.00" or "50")
    amount: String,

    /// Description of the transaction
    #[arg(short, long)]
    description: String,

    /// UNSAFE: write the transaction and the balance separately (demonstration only)
    #[arg(long)]
    inconsistent: bool,
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Account holder name
        name: String,

        /// Email address (must be unique)
        email: String,

        /// Opening balance (e.g., "100.00")
        #[arg(short, long, default_value = "0")]
        balance: String,
    },

    /// Show the account and its balance
    Show,
}

impl Cli {
    fn caller(&self) -> Result<Caller> {
        let raw = self
            .account
            .as_deref()
            .context("This command needs --account <ID>")?;
        let id = Uuid::parse_str(raw).context("Invalid account ID format (expected UUID)")?;
        Ok(Caller::authenticated(id))
    }

    async fn service(&self) -> Result<LedgerService> {
        let faults = if self.simulate_failures {
            FaultInjection::demo()
        } else {
            FaultInjection::disabled()
        };
        Ok(LedgerService::connect(&self.database)
            .await?
            .with_fault_injection(faults))
    }

    pub async fn run(self) -> Result<()> {
        match &self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Account(AccountCommands::Open {
                name,
                email,
                balance,
            }) => {
                let service = self.service().await?;
                let opening =
                    parse_cents(balance).context("Invalid balance format. Use '50.00' or '50'")?;
                let account = service.open_account(name, email, opening).await?;
                println!(
                    "Opened account: {} <{}> balance {} ({})",
                    account.name,
                    account.email,
                    format_cents(account.balance),
                    account.id
                );
            }

            Commands::Account(AccountCommands::Show) => {
                let service = self.service().await?;
                let account = service.get_account(&self.caller()?).await?;
                println!("Account: {}", account.name);
                println!("  ID:              {}", account.id);
                println!("  Email:           {}", account.email);
                println!("  Balance:         {}", format_cents(account.balance));
                println!("  Opening balance: {}", format_cents(account.opening_balance));
                println!(
                    "  Created:         {}",
                    account.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }

            Commands::Credit(args) => {
                self.run_entry(TransactionKind::Credit, args).await?;
            }

            Commands::Debit(args) => {
                self.run_entry(TransactionKind::Debit, args).await?;
            }

            Commands::Update {
                id,
                amount,
                kind,
                description,
            } => {
                let service = self.service().await?;
                let update = TransactionUpdate {
                    amount: parse_cents(amount)
                        .context("Invalid amount format. Use '50.00' or '50'")?,
                    kind: parse_kind(kind)?,
                    description: description.clone(),
                };
                let receipt = service
                    .update_transaction(&self.caller()?, parse_transaction_id(id)?, update)
                    .await?;
                println!(
                    "Updated transaction {}: {} {} (balance {})",
                    receipt.transaction.id,
                    receipt.transaction.kind,
                    format_cents(receipt.transaction.amount),
                    format_cents(receipt.balance())
                );
            }

            Commands::Delete { id } => {
                let service = self.service().await?;
                let receipt = service
                    .delete_transaction(&self.caller()?, parse_transaction_id(id)?)
                    .await?;
                println!(
                    "Transaction permanently deleted: {} (balance {})",
                    receipt.transaction_id,
                    format_cents(receipt.balance)
                );
            }

            Commands::List => {
                let service = self.service().await?;
                let transactions = service.list_transactions(&self.caller()?).await?;
                if transactions.is_empty() {
                    println!("No transactions found.");
                } else {
                    println!(
                        "{:<20} {:<7} {:>12} {:<36} DESCRIPTION",
                        "DATE", "KIND", "AMOUNT", "ID"
                    );
                    println!("{}", "-".repeat(90));
                    for tx in &transactions {
                        println!(
                            "{:<20} {:<7} {:>12} {:<36} {}",
                            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                            tx.kind,
                            format_cents(tx.amount),
                            tx.id,
                            truncate(&tx.description, 30)
                        );
                    }
                    println!("{} transaction(s)", transactions.len());
                }
            }

            Commands::Show { id } => {
                let service = self.service().await?;
                let view = service
                    .get_transaction(&self.caller()?, parse_transaction_id(id)?)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&view)?);
            }

            Commands::Check => {
                let service = self.service().await?;
                let report = service.reconcile(&self.caller()?).await?;
                println!("Transactions: {}", report.transaction_count);
                println!("Recorded:     {}", format_cents(report.recorded));
                println!("Expected:     {}", format_cents(report.expected));
                if report.is_consistent() {
                    println!("Balance is consistent.");
                } else {
                    anyhow::bail!(
                        "Balance drifted by {} from the transaction log",
                        format_cents(report.drift())
                    );
                }
            }
        }

        Ok(())
    }

    async fn run_entry(&self, kind: TransactionKind, args: &EntryArgs) -> Result<()> {
        let service = self.service().await?;
        let amount =
            parse_cents(&args.amount).context("Invalid amount format. Use '50.00' or '50'")?;
        let mode = if args.inconsistent {
            WriteMode::Inconsistent
        } else {
            WriteMode::Consistent
        };
        let input = NewTransaction {
            amount,
            kind,
            description: args.description.clone(),
        };

        match service.create_transaction(&self.caller()?, input, mode).await {
            Ok(receipt) => {
                println!(
                    "Recorded {}: {} ({}), balance {}",
                    kind,
                    format_cents(amount),
                    receipt.transaction.id,
                    format_cents(receipt.balance())
                );
                Ok(())
            }
            Err(AppError::Inconsistent(report)) => {
                eprintln!("{}", serde_json::to_string_pretty(&report)?);
                Err(AppError::Inconsistent(report).into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_transaction_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).context("Invalid transaction ID format (expected UUID)")
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
