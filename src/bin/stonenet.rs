use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use stonenet::message::PayloadWriter;
use stonenet::network::HandlerRef;
use stonenet::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Message, MessageHandler, Network,
    NetworkConfig,
};
use tracing::{error, info};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// write logs to an hourly rolling file in this directory as well
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    /// listen on a port and print every received message
    Listen {
        #[arg(short, long)]
        port: u16,
    },
    /// connect to a peer and send one message with a string payload
    Send {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long)]
        port: u16,
        #[arg(long, default_value_t = 1)]
        code: u64,
        #[arg(long, default_value = "")]
        text: String,
    },
    PrintConfig,
}

struct PrintMessages;

impl MessageHandler for PrintMessages {
    fn incoming_message(&self, message: Message) {
        let mut reader = message.reader();
        match reader.get_string() {
            Ok(text) if reader.is_empty() => {
                info!(code = message.code(), "received \"{}\"", text)
            }
            _ => info!(
                code = message.code(),
                "received {} payload bytes",
                message.payload().len()
            ),
        }
    }

    fn connection_error(&self, peer_addr: std::net::SocketAddr, error: &AppError) {
        error!(%peer_addr, "connection failed: {}", error);
    }
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();

    // keep the guard alive until exit so the file writer gets flushed
    let _log_guard = match &commandline.log_dir {
        Some(dir) => Some(setup_tracing(dir)?),
        None => {
            setup_local_tracing()?;
            None
        }
    };

    let config = match &commandline.conf {
        Some(path) => NetworkConfig::set_up_config(path)?,
        None => NetworkConfig::default(),
    };

    match commandline.command {
        Command::PrintConfig => {
            println!("{:#?}", config);
            Ok(())
        }
        Command::Listen { port } => listen(config, port),
        Command::Send {
            host,
            port,
            code,
            text,
        } => send(config, &host, port, code, &text),
    }
}

fn listen(config: NetworkConfig, port: u16) -> AppResult<()> {
    let handler: Arc<dyn MessageHandler> = Arc::new(PrintMessages);
    let mut network = Network::with_config(config);
    network.initialize()?;
    let local_addr = network.add_listener(port, Arc::downgrade(&handler) as HandlerRef)?;
    info!("listening on {}, ctrl-c to stop", local_addr);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(tokio::signal::ctrl_c())?;

    info!("get shutdown signal");
    network.release()
}

fn send(config: NetworkConfig, host: &str, port: u16, code: u64, text: &str) -> AppResult<()> {
    let mut network = Network::with_config(config);
    network.initialize()?;
    network.connect_to(host, port)?;

    let mut message = Message::new(code);
    message.payload_mut().put_string(text);
    network.send_message(host, port, message)?;

    // release flushes the queued message before closing the connection
    network.release()
}
