//! swap-settlement - operator CLI
//!
//! ```text
//! reconcile --url <return URL>   resolve one gateway return into an outcome
//! mark      --transaction-id ..  write the pending marker by hand
//! workflow  --transaction-id ..  interactive staff swap workflow on stdin
//! ```
//!
//! All three share one session (`--session`), so a marker written by
//! `workflow` is visible to a later `reconcile` in another process.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use url::Url;

use swap_settlement::config::AppConfig;
use swap_settlement::logging::init_logging;
use swap_settlement::settlement::{
    FileSessionStorage, HttpPageSource, HttpTransactionApi, OperatorPrompt, PaymentMethod,
    PaymentStep, PendingMarkerStore, PendingTransactionMarker, ReturnAction, ReturnReconciler,
    SwapTransactionWorkflow, TransactionId, WorkflowAction, WorkflowError,
};

const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

#[derive(Parser)]
#[command(about = "Battery-swap payment settlement", version = VERSION)]
struct Args {
    /// Loads config/<env>.yaml
    #[arg(short, long, default_value = "dev")]
    env: String,

    /// Explicit config file, overrides --env
    #[arg(short, long)]
    config: Option<String>,

    /// Session scope for the pending payment marker
    #[arg(short, long, default_value = "default")]
    session: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a gateway return URL
    Reconcile {
        #[arg(long)]
        url: Url,
    },
    /// Record a pending gateway payment for this session
    Mark {
        #[arg(long)]
        transaction_id: String,
        #[arg(long)]
        order_code: Option<String>,
    },
    /// Drive one transaction through the swap workflow
    Workflow {
        #[arg(long)]
        transaction_id: String,
    },
}

/// y/N confirmation on the terminal
struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn confirm(&self, question: &str) -> bool {
        eprint!("{question} [y/N] ");
        matches!(
            read_line().await.as_deref().map(str::trim),
            Some("y" | "Y" | "yes")
        )
    }
}

async fn read_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(&args.env),
    }
    .context("Failed to load configuration")?;
    let _log_guard = init_logging(&config);

    tracing::info!(version = VERSION, env = %args.env, session = %args.session, "Starting swap-settlement");

    let api = Arc::new(
        HttpTransactionApi::new(config.api_base_url()?, config.api_timeout())
            .context("Failed to build backend client")?,
    );
    let storage = FileSessionStorage::open(&config.storage.session_dir, &args.session)
        .context("Failed to open session storage")?;
    let markers = PendingMarkerStore::new(storage);

    match args.command {
        Command::Reconcile { url } => {
            let reconciler = ReturnReconciler::new(api, markers)
                .with_redirect_repair(config.redirect_repair()?)
                .with_messages(config.messages.clone());
            let client = reqwest::Client::builder()
                .timeout(config.api_timeout())
                .build()?;
            let page = HttpPageSource::new(client, url.clone());

            match reconciler.handle_return(&url, &page).await {
                ReturnAction::Navigate(target) => println!("navigate {target}"),
                ReturnAction::Outcome(outcome) => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?)
                }
            }
        }
        Command::Mark {
            transaction_id,
            order_code,
        } => {
            markers.write(&PendingTransactionMarker::new(transaction_id, order_code))?;
            println!("marker written for session {}", args.session);
        }
        Command::Workflow { transaction_id } => {
            let workflow = SwapTransactionWorkflow::new(api, markers, StdinPrompt);
            run_workflow(&workflow, TransactionId::from(transaction_id)).await?;
        }
    }

    Ok(())
}

async fn run_workflow(
    workflow: &SwapTransactionWorkflow<HttpTransactionApi, FileSessionStorage, StdinPrompt>,
    id: TransactionId,
) -> Result<()> {
    let active = workflow.lookup(&id).await?;
    eprintln!("{} is {}", active.code, active.stage);

    loop {
        let Some(current) = workflow.current() else {
            eprintln!("no active transaction");
            return Ok(());
        };
        let Some(next) = current.stage.next_action() else {
            return Ok(());
        };
        eprint!(
            "[{}] next: {} (enter = go, cash/gateway for payment, c = cancel, q = quit) ",
            current.stage, next
        );
        let Some(line) = read_line().await else {
            return Ok(());
        };

        let result = match line.trim() {
            "q" => return Ok(()),
            "c" => {
                workflow.cancel();
                return Ok(());
            }
            "" => match next {
                WorkflowAction::ConfirmArrival => {
                    workflow.confirm_arrival().await.map(|_| ())
                }
                WorkflowAction::TakePayment => {
                    eprintln!("choose cash or gateway");
                    Ok(())
                }
                WorkflowAction::StartSwap => {
                    workflow.start_swap().await.map(|_| ())
                }
                WorkflowAction::CompleteSwap => match workflow.complete_swap().await {
                    Ok(done) => {
                        println!("{} completed", done.code);
                        return Ok(());
                    }
                    Err(e) => Err(e),
                },
            },
            method => match method.parse::<PaymentMethod>() {
                Ok(method) => match workflow.take_payment(method).await {
                    Ok(PaymentStep::Completed { message }) => {
                        eprintln!("{}", message.unwrap_or_else(|| "payment recorded".into()));
                        Ok(())
                    }
                    Ok(PaymentStep::Redirect(url)) => {
                        println!("navigate {url}");
                        return Ok(());
                    }
                    Err(e) => Err(e),
                },
                Err(_) => {
                    eprintln!("unknown input: {method}");
                    Ok(())
                }
            },
        };

        if let Err(e) = result {
            report_step_error(e)?;
        }
    }
}

/// Retryable failures keep the loop at the same stage; the rest end it.
fn report_step_error(err: WorkflowError) -> Result<()> {
    match err {
        WorkflowError::Declined => eprintln!("declined"),
        e if e.is_retryable() => eprintln!("{e}"),
        e => bail!(e),
    }
    Ok(())
}
