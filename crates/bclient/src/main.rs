mod cli;

use std::time::Duration;

use bclient_core::{ClientConfig, Event, NodeClient, Service, WalletClient};
use clap::Parser;
use eyre::{eyre, WrapErr};
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use cli::{Cli, Command, NodeCommand, WalletCommand};

const NODE_EVENTS: &[&str] = &[
    "connect",
    "disconnect",
    "error",
    "block connect",
    "block disconnect",
    "chain reset",
    "tx",
];

const WALLET_EVENTS: &[&str] = &[
    "connect",
    "disconnect",
    "error",
    "tx",
    "confirmed",
    "unconfirmed",
    "conflict",
    "balance",
    "address",
];

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    match &args.command {
        Command::Node { command } => run_node(&args, command).await,
        Command::Wallet { id, command } => run_wallet(&args, id, command).await,
    }
}

fn build_config(args: &Cli, service: Service) -> ClientConfig {
    let mut config = ClientConfig::new(args.network, service)
        .with_host(&args.host)
        .with_ssl(args.ssl)
        .with_path(&args.path)
        .with_timeout(Duration::from_millis(args.timeout_ms));
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    if let Some(key) = &args.api_key {
        config = config.with_api_key(key);
    }
    if let Some(token) = &args.token {
        config = config.with_token(token);
    }
    config
}

async fn run_node(args: &Cli, command: &NodeCommand) -> eyre::Result<()> {
    let config = build_config(args, Service::Node);
    let timeout = config.timeout();
    let node = NodeClient::new(config).wrap_err("build node client")?;

    match command {
        NodeCommand::Info => print_found(node.get_info().await.wrap_err("fetch node info")?, "node info"),
        NodeCommand::Mempool => {
            print_found(node.get_mempool().await.wrap_err("fetch mempool")?, "mempool")
        }
        NodeCommand::Block { id } => print_found(
            node.get_block(*id).await.wrap_err("fetch block")?,
            &format!("block {id}"),
        ),
        NodeCommand::Tx { txid } => print_found(
            node.get_tx(txid).await.wrap_err("fetch transaction")?,
            &format!("transaction {txid}"),
        ),
        NodeCommand::Fee { blocks } => print_found(
            node.estimate_fee(*blocks).await.wrap_err("estimate fee")?,
            "fee estimate",
        ),
        NodeCommand::Watch => {
            let (tx, rx) = mpsc::unbounded_channel();
            for name in NODE_EVENTS {
                let tx = tx.clone();
                node.on(name, move |event| {
                    let _ = tx.send(event.clone());
                    Ok(())
                });
            }

            node.open().wrap_err("open node socket")?;
            node.wait_ready(timeout)
                .await
                .wrap_err("wait for node socket")?;
            node.watch_chain().await.wrap_err("subscribe to chain events")?;
            node.watch_mempool()
                .await
                .wrap_err("subscribe to mempool events")?;
            tracing::info!("watching node events; press Ctrl-C to stop");

            let result = print_events(rx).await;
            node.close().await;
            result
        }
    }
}

async fn run_wallet(args: &Cli, id: &str, command: &WalletCommand) -> eyre::Result<()> {
    let config = build_config(args, Service::Wallet);
    let timeout = config.timeout();
    let wallet = WalletClient::new(config, id).wrap_err("build wallet client")?;

    match command {
        WalletCommand::Info => print_found(
            wallet.get_info().await.wrap_err("fetch wallet info")?,
            &format!("wallet `{id}`"),
        ),
        WalletCommand::Balance { account } => print_found(
            wallet
                .get_balance(account.as_deref())
                .await
                .wrap_err("fetch wallet balance")?,
            &format!("wallet `{id}`"),
        ),
        WalletCommand::History { account } => print_found(
            wallet
                .get_history(account.as_deref())
                .await
                .wrap_err("fetch wallet history")?,
            &format!("wallet `{id}`"),
        ),
        WalletCommand::Watch => {
            let (tx, rx) = mpsc::unbounded_channel();
            for name in WALLET_EVENTS {
                let tx = tx.clone();
                wallet.on(name, move |event| {
                    let _ = tx.send(event.clone());
                    Ok(())
                });
            }

            wallet.open().wrap_err("open wallet socket")?;
            wallet
                .wait_ready(timeout)
                .await
                .wrap_err("wait for wallet socket")?;
            tracing::info!(wallet = id, room = wallet.room(), "watching wallet events; press Ctrl-C to stop");

            let result = print_events(rx).await;
            wallet.close().await;
            result
        }
    }
}

fn print_found<T: Serialize>(value: Option<T>, what: &str) -> eyre::Result<()> {
    let value = value.ok_or_else(|| eyre!("{what} not found"))?;
    let rendered = serde_json::to_string_pretty(&value).wrap_err("render result as JSON")?;
    println!("{rendered}");
    Ok(())
}

/// One JSON line per event until Ctrl-C.
async fn print_events(mut events: mpsc::UnboundedReceiver<Event>) -> eyre::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.wrap_err("listen for Ctrl-C")?;
                tracing::info!("stopping");
                return Ok(());
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };
                let line = json!({ "event": event.name, "args": event.args });
                println!("{line}");
            }
        }
    }
}
