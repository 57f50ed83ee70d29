use bclient_core::{BlockId, Network};
use bitcoin::Txid;
use clap::{Parser, Subcommand};

/// bclient: query a full node and its wallet service over HTTP and WebSocket.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Network, which picks the default ports (main, testnet, regtest, simnet).
    #[arg(long, default_value = "main", env = "BCLIENT_NETWORK")]
    pub network: Network,

    /// Service host.
    #[arg(long, default_value = "localhost", env = "BCLIENT_HOST")]
    pub host: String,

    /// Service port. Defaults to the network's node or wallet port.
    #[arg(long, env = "BCLIENT_PORT")]
    pub port: Option<u16>,

    /// Use https:// and wss://.
    #[arg(long, env = "BCLIENT_SSL")]
    pub ssl: bool,

    /// Path prefix the service is mounted under.
    #[arg(long, default_value = "/", env = "BCLIENT_PATH")]
    pub path: String,

    /// API key, sent as HTTP basic auth and in the socket handshake.
    #[arg(long, env = "BCLIENT_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Wallet token for wallet-scoped requests and the wallet room.
    #[arg(long, env = "BCLIENT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Default request and call timeout in milliseconds.
    #[arg(long, default_value = "30000", env = "BCLIENT_TIMEOUT_MS")]
    pub timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Query the full node.
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },
    /// Query one wallet on the wallet service.
    Wallet {
        /// Wallet id.
        #[arg(long, default_value = "primary", env = "BCLIENT_WALLET_ID")]
        id: String,

        #[command(subcommand)]
        command: WalletCommand,
    },
}

#[derive(Subcommand)]
pub enum NodeCommand {
    /// Node and chain summary.
    Info,
    /// Txids in the mempool.
    Mempool,
    /// A block by height or hash.
    Block { id: BlockId },
    /// A transaction by txid.
    Tx { txid: Txid },
    /// Fee rate estimate.
    Fee {
        /// Confirmation target in blocks.
        #[arg(long, default_value = "1")]
        blocks: u32,
    },
    /// Print chain and mempool events until Ctrl-C.
    Watch,
}

#[derive(Subcommand)]
pub enum WalletCommand {
    /// Wallet summary.
    Info,
    /// Confirmed and unconfirmed balance.
    Balance {
        #[arg(long)]
        account: Option<String>,
    },
    /// Transaction history.
    History {
        #[arg(long)]
        account: Option<String>,
    },
    /// Print wallet events until Ctrl-C.
    Watch,
}
