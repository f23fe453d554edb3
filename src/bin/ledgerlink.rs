#![forbid(unsafe_code)]
use clap::{Parser, Subcommand};
use ledgerlink::account::AccountEvent;
use ledgerlink::config::load_config_from_env;
use ledgerlink::identity::Issue;
use ledgerlink::remote::{Remote, RemoteEvent};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prints the primary server's server_info
    ServerInfo,
    /// Prints ledger closes as they happen
    WatchLedgers {
        /// Stop after this many ledgers
        #[arg(long)]
        count: Option<usize>,
    },
    /// Prints an account's root entry, then its transactions
    Account {
        address: String,
        /// Stop after this many closed ledgers
        #[arg(long, default_value_t = 0)]
        ledgers: usize,
    },
    /// Prints the offers in a book, e.g. `XRP` `USD/r...`
    BookOffers { taker_gets: String, taker_pays: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let remote = Remote::new(load_config_from_env()?)?;
    remote.connect()?;
    tokio::time::timeout(REQUEST_TIMEOUT, remote.wait_online())
        .await
        .map_err(|_| "no server came online")?;

    match cli.command {
        Commands::ServerInfo => {
            let info = remote
                .request(remote.request_server_info())
                .timeout(REQUEST_TIMEOUT)
                .await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::WatchLedgers { count } => watch_ledgers(&remote, count).await,
        Commands::Account { address, ledgers } => watch_account(&remote, &address, ledgers).await?,
        Commands::BookOffers {
            taker_gets,
            taker_pays,
        } => {
            let book = remote.book(Issue::parse(&taker_gets)?, Issue::parse(&taker_pays)?)?;
            for offer in book.offers().await? {
                println!("{}", offer);
            }
        }
    }

    remote.disconnect();
    Ok(())
}

async fn watch_ledgers(remote: &Remote, count: Option<usize>) {
    let mut events = remote.events();
    let mut seen = 0;
    while count.map_or(true, |limit| seen < limit) {
        match events.recv().await {
            Ok(RemoteEvent::LedgerClosed(ledger)) => {
                println!("ledger {} {}", ledger.ledger_index, ledger.ledger_hash);
                seen += 1;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(_) => break,
        }
    }
}

async fn watch_account(
    remote: &Remote,
    address: &str,
    ledgers: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let account = remote.account(address)?;
    let mut updates = account.subscribe();
    let entry = account.entry().await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);

    let mut events = remote.events();
    let mut closed = 0;
    while closed < ledgers {
        tokio::select! {
            update = updates.recv() => match update {
                Some(AccountEvent::Transaction(notice)) => {
                    println!("transaction {}", notice.hash().unwrap_or("?"));
                }
                Some(AccountEvent::Entry(_)) => {}
                None => break,
            },
            event = events.recv() => match event {
                Ok(RemoteEvent::LedgerClosed(_)) => closed += 1,
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(_) => break,
            },
        }
    }
    Ok(())
}
