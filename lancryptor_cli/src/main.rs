use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lancryptor_core::config::AppConfig;
use lancryptor_core::confirm::ConfirmationBridge;
use lancryptor_core::keystore::KeyStore;
use lancryptor_core::transfer::{
    Acceptor, ReceiverContext, SendContext, SendOutcome, parse_target, send_and_report,
};
use lancryptor_core::{AppCommand, AppEvent, run_backend_with};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod console;

use console::{HELP, Input, PromptQueue, parse_answer, parse_input, print_event, spawn_stdin_lines};

#[derive(Parser)]
#[command(name = "lancryptor")]
#[command(about = "LANCryptor - encrypted LAN file transfer", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding private_key.pem / public_key.pem
    #[arg(long, global = true)]
    key_dir: Option<PathBuf>,

    /// Where received files are written
    #[arg(long, global = true)]
    received_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file over the network
    Send {
        /// IP address of receiver
        #[arg(long)]
        ip: String,
        /// File path to send
        #[arg(long)]
        file: PathBuf,
        /// Receiver port (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Receive files over the network
    Receive {
        /// Port to listen on (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // 0. Initialize logging; --verbose wins over RUST_LOG
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = AppConfig::load();
    if let Some(dir) = cli.key_dir {
        config.key_dir = dir;
    }
    if let Some(dir) = cli.received_dir {
        config.received_dir = dir;
    }

    match cli.command {
        Some(Commands::Send { ip, file, port }) => {
            if let Some(port) = port {
                config.port = port;
            }
            run_send(config, &ip, file).await
        }
        Some(Commands::Receive { port }) => {
            if let Some(port) = port {
                config.port = port;
            }
            run_receive(config).await.map(|_| ExitCode::SUCCESS)
        }
        None => run_interactive(config).await.map(|_| ExitCode::SUCCESS),
    }
}

async fn run_send(config: AppConfig, ip: &str, file: PathBuf) -> Result<ExitCode> {
    let target = parse_target(ip, config.port).with_context(|| format!("Bad --ip {:?}", ip))?;

    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(1000);
    let ctx = SendContext {
        keystore: KeyStore::from_config(&config),
        config,
        event_tx,
    };
    let cancel = CancellationToken::new();
    let task = tokio::spawn(send_and_report(target, file, ctx, cancel.clone()));

    // The channel closes once the send task drops its context
    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(event) => print_event("SEND", &event),
                None => break,
            },
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                println!("[SEND] Stopping transfer...");
                cancel.cancel();
            }
        }
    }

    let status = task.await.context("Send task panicked")?;
    if status == SendOutcome::Sent.status_message() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run_receive(config: AppConfig) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(1000);
    let bridge = ConfirmationBridge::new();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let ctx = ReceiverContext::from_config(config, bridge.clone(), event_tx);
    let acceptor = Acceptor::bind(addr, ctx)
        .await
        .with_context(|| format!("Failed to listen on {}", addr))?;
    let handle = acceptor.spawn();
    println!("[RECV] Press Ctrl+C to stop...");

    let mut stdin = spawn_stdin_lines();
    let mut prompts = PromptQueue::default();
    let mut stopping = false;

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(AppEvent::ConfirmationRequested(request)) => prompts.push(request),
                Some(AppEvent::ReceiverStopped) | None => break,
                Some(event) => print_event("RECV", &event),
            },
            Some(line) = stdin.recv() => {
                if prompts.is_empty() {
                    continue;
                }
                match parse_answer(&line) {
                    Some(accepted) => {
                        if let Some(request) = prompts.answer() {
                            if !bridge.respond(request.id, accepted).await {
                                println!("[RECV] Connection from {} is gone.", request.peer);
                            }
                        }
                    }
                    None => println!("Please type 'y' or 'n'."),
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                println!("[RECV] Stopping receiver...");
                handle.stop();
                stopping = true;
            }
        }
    }

    handle.join().await;
    Ok(())
}

async fn run_interactive(config: AppConfig) -> Result<()> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<AppCommand>(1000);
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(1000);

    let backend = tokio::spawn(run_backend_with(config, cmd_rx, event_tx));

    println!("LANCryptor interactive mode. Type 'help' for commands.");
    let mut stdin = spawn_stdin_lines();
    let mut prompts = PromptQueue::default();

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(AppEvent::ConfirmationRequested(request)) => prompts.push(request),
                Some(event @ AppEvent::ReceiverStopped) => {
                    if prompts.clear() > 0 {
                        println!("[LAN] Pending confirmation requests were withdrawn.");
                    }
                    print_event("LAN", &event);
                }
                Some(event) => print_event("LAN", &event),
                None => break,
            },
            line = stdin.recv() => {
                let Some(line) = line else { break };
                match parse_input(&line) {
                    Ok(Input::Command(cmd)) => {
                        cmd_tx.send(cmd).await.context("Backend stopped")?;
                    }
                    Ok(Input::Answer(accepted)) => match prompts.answer() {
                        Some(request) => {
                            cmd_tx
                                .send(AppCommand::RespondConfirmation {
                                    request_id: request.id,
                                    accepted,
                                })
                                .await
                                .context("Backend stopped")?;
                        }
                        None => println!("Nothing is waiting for confirmation."),
                    },
                    Ok(Input::Help) => println!("{}", HELP),
                    Ok(Input::Quit) => break,
                    Ok(Input::Empty) => {}
                    Err(msg) => println!("{}", msg),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // Closing the command channel makes the backend stop the receiver and return
    drop(cmd_tx);
    backend.await.context("Backend task panicked")?;
    while let Ok(event) = event_rx.try_recv() {
        print_event("LAN", &event);
    }
    Ok(())
}
