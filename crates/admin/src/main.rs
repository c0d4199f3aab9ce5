//! Operator CLI for a Postgres-backed ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use fundledger_accounting::{AccountNode, LegacyAccountRow};
use fundledger_auth::Principal;
use fundledger_core::{BranchId, UserId};
use fundledger_infra::store::{Branch, ReportScope};
use fundledger_infra::{ChartOfAccounts, LedgerConfig, PostgresLedgerStore, StatementGenerator};

#[derive(Parser)]
#[command(name = "fundledger-admin")]
#[command(about = "Administration tool for the fund ledger")]
struct Cli {
    /// Database connection URL (defaults to FUNDLEDGER_DATABASE_URL / DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// User recorded as the actor of imports (a fresh id when omitted)
    #[arg(long)]
    actor: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or update the ledger schema
    Migrate,

    /// Register a branch, or rename an existing one with the same code
    UpsertBranch {
        code: String,
        name: String,
        #[arg(long)]
        id: Option<Uuid>,
    },

    /// Import a chart of accounts from a legacy JSON export
    ImportAccounts { file: PathBuf },

    /// Print the chart of accounts as a tree
    Tree,

    /// Print the trial balance as of a date
    TrialBalance {
        #[arg(long)]
        as_of: NaiveDate,

        /// Restrict to one branch
        #[arg(long)]
        branch: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fundledger_observability::init();
    let cli = Cli::parse();

    let mut config = LedgerConfig::from_env().context("loading configuration")?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }
    let Some(database_url) = config.database_url.clone() else {
        bail!("database URL not provided; use --database-url or set DATABASE_URL");
    };

    let store = Arc::new(
        PostgresLedgerStore::connect(&database_url, config.database_max_connections)
            .await
            .context("connecting to database")?,
    );
    let config = Arc::new(config);
    let actor = Principal::superuser(cli.actor.map(UserId::from).unwrap_or_default());

    match cli.command {
        Commands::Migrate => {
            store.migrate().await?;
            info!("schema up to date");
        }
        Commands::UpsertBranch { code, name, id } => {
            let branch = Branch {
                id: id.map(BranchId::from).unwrap_or_default(),
                code,
                name,
            };
            store.upsert_branch(&branch).await?;
            println!("{} {}", branch.id, branch.code);
        }
        Commands::ImportAccounts { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let rows: Vec<LegacyAccountRow> =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
            let chart = ChartOfAccounts::new(Arc::clone(&store), Arc::clone(&config));
            let imported = chart.import_legacy_rows(&actor, &rows).await?;
            println!("imported {} accounts", imported.len());
        }
        Commands::Tree => {
            let chart = ChartOfAccounts::new(Arc::clone(&store), Arc::clone(&config));
            for node in chart.tree().await? {
                print_node(&node, 0);
            }
        }
        Commands::TrialBalance { as_of, branch } => {
            let scope = match branch {
                Some(id) => ReportScope::branch(BranchId::from(id)),
                None => ReportScope::all(),
            };
            let statements = StatementGenerator::new(Arc::clone(&store), Arc::clone(&config));
            let tb = statements.trial_balance(as_of, &scope).await?;
            println!("Trial balance as of {}", tb.as_of);
            for line in &tb.lines {
                println!(
                    "{:<12} {:<40} {:>16} {:>16}",
                    line.code, line.name, line.debit, line.credit
                );
            }
            println!(
                "{:<53} {:>16} {:>16}",
                "Total", tb.total_debit, tb.total_credit
            );
            if !tb.is_balanced {
                bail!("trial balance is off by {}", tb.difference);
            }
        }
    }

    Ok(())
}

fn print_node(node: &AccountNode, depth: usize) {
    let account = &node.account;
    let marker = if account.is_active { "" } else { " (inactive)" };
    println!(
        "{:indent$}{} {}{}",
        "",
        account.code,
        account.name,
        marker,
        indent = depth * 2
    );
    for child in &node.children {
        print_node(child, depth + 1);
    }
}
