use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ledger_core::{
    chain::Chain,
    constants::DIFFICULTY,
    crypto::{Keypair, Signer},
    Transaction,
};
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the proof-of-work ledger node")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new keypair
    Keygen,
    /// Sign a transfer locally and submit it to a node
    Send {
        /// Node base URL (e.g. http://127.0.0.1:8080)
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        /// Id of the node whose mailbox receives the transaction
        #[arg(long, default_value = "node-0")]
        node_id: String,
        /// Hex encoded secret key of the sender
        #[arg(long, env = "LEDGER_SECRET_KEY")]
        secret: String,
        /// Recipient address
        #[arg(long)]
        to: String,
        /// Amount
        #[arg(long)]
        value: u64,
    },
    /// Fetch a node's published chain and validate it locally
    Chain {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        node: String,
        #[arg(long, default_value = "node-0")]
        node_id: String,
        /// Difficulty to validate against
        #[arg(long, default_value_t = DIFFICULTY)]
        difficulty: u32,
        /// Print every block
        #[arg(long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Keygen => {
            let kp = Keypair::generate();
            let out = serde_json::json!({
                "address": kp.address(),
                "secret": kp.secret_hex(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Command::Send {
            node,
            node_id,
            secret,
            to,
            value,
        } => {
            let kp = Keypair::from_secret_hex(&secret).context("invalid secret key")?;
            let tx = Transaction::new(kp.address(), to, value).sign(&kp);
            debug!(?tx, "signed transaction");
            let client = reqwest::Client::new();
            let res = client
                .post(format!("{node}/nodes/{node_id}/tx"))
                .json(&tx)
                .send()
                .await?;
            let status = res.status();
            let body = res.text().await?;
            println!("status: {}", status);
            println!("{body}");
        }
        Command::Chain {
            node,
            node_id,
            difficulty,
            verbose,
        } => {
            let body = reqwest::get(format!("{node}/nodes/{node_id}/chain"))
                .await?
                .error_for_status()?
                .text()
                .await?;
            let chain = Chain::from_json(&body).context("node returned a malformed chain")?;
            println!("height: {}", chain.len());
            println!("tip: {}", chain.tip_hash().unwrap_or_default());
            match chain.validate(difficulty) {
                Ok(()) => println!("valid: true"),
                Err(e) => println!("valid: false ({e})"),
            }
            if verbose {
                for (i, block) in chain.blocks().iter().enumerate() {
                    println!(
                        "#{i} {} nonce={} txs={}",
                        block.hash_hex(),
                        block.nonce,
                        block.transactions.len()
                    );
                }
            }
        }
    }
    Ok(())
}
