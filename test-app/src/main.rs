// ax25link command-line tool -- beacon, connect, listen and monitor over a
// KISS TNC on a serial port or a TCP socket (Direwolf, soundmodem, ...).
//
// Usage:
//   ax25link-cli --port /dev/ttyUSB0 --baud 9600 --mycall N0CALL-1 beacon APRS "hello"
//   ax25link-cli --host 127.0.0.1:8001 --mycall N0CALL-1 --via WIDE1-1 connect KO4LCM-2
//   ax25link-cli --host 127.0.0.1:8001 --mycall N0CALL-1 listen
//   ax25link-cli --host 127.0.0.1:8001 monitor --duration 60
//   ax25link-cli decode "96 70 9A 9A 9E 40 E0 ..."

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ax25link::transport::kiss::CMD_TXDELAY;
use ax25link::transport::{SerialTransport, TcpTransport};
use ax25link::{
    Address, Frame, Link, LinkBuilder, LinkEvent, Modulo, Session, SessionConfig,
};
use ax25link_test_harness::MockTransport;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// ax25link command-line tool -- AX.25 over a KISS TNC.
#[derive(Parser)]
#[command(name = "ax25link-cli", version, about)]
struct Cli {
    /// Serial port of a hardware KISS TNC (e.g. /dev/ttyUSB0, COM3).
    #[arg(long, conflicts_with = "host")]
    port: Option<String>,

    /// TCP KISS server as host:port (e.g. 127.0.0.1:8001).
    #[arg(long)]
    host: Option<String>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 9600)]
    baud: u32,

    /// Our station, CALL or CALL-SSID. Required for everything except
    /// `monitor` and `decode`.
    #[arg(long)]
    mycall: Option<String>,

    /// Digipeater to route through. Repeat for a longer path.
    #[arg(long)]
    via: Vec<String>,

    /// Use a mock transport instead of a real TNC.
    /// Useful for verifying CLI parsing and link wiring without hardware.
    #[arg(long)]
    mock: bool,

    /// Set the TNC's transmitter keyup delay, in 10 ms units.
    #[arg(long)]
    txdelay: Option<u8>,

    /// Verbose logging (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one UI frame.
    Beacon {
        /// Destination address (e.g. APRS, BEACON, CQ).
        dest: String,
        /// Text to send.
        text: String,
    },

    /// Connect to a station, send stdin lines and print what comes back.
    Connect {
        /// Remote station, CALL or CALL-SSID.
        dest: String,
        /// Request modulo-128 sequencing (SABME).
        #[arg(long)]
        extended: bool,
    },

    /// Accept incoming connections and echo their data back.
    Listen,

    /// Print every decoded frame heard on the channel.
    Monitor {
        /// Duration in seconds (0 = until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Decode a raw frame given as hex (spaces and 0x prefixes allowed).
    Decode {
        hex: String,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Parse hex like "C0 00 96 70" or "0x96,0x70" into bytes.
fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|tok| {
            tok.strip_prefix("0x")
                .or_else(|| tok.strip_prefix("0X"))
                .unwrap_or(tok)
        })
        .collect();
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn parse_address(s: &str) -> Result<Address> {
    s.parse::<Address>()
        .with_context(|| format!("invalid address {s:?}"))
}

fn mycall(cli: &Cli) -> Result<Address> {
    let call = cli
        .mycall
        .as_deref()
        .context("--mycall is required for this command")?;
    parse_address(call)
}

fn via(cli: &Cli) -> Result<Vec<Address>> {
    cli.via.iter().map(|s| parse_address(s)).collect()
}

// ---------------------------------------------------------------------------
// Link construction
// ---------------------------------------------------------------------------

async fn open_link(cli: &Cli, monitor: bool) -> Result<Link> {
    let builder = LinkBuilder::new().monitor(monitor);

    let link = if cli.mock {
        println!("Connected (mock transport)");
        builder
            .build(Box::new(MockTransport::new()))
            .context("failed to build link with mock transport")?
    } else if let Some(host) = &cli.host {
        let transport = TcpTransport::connect(host)
            .await
            .with_context(|| format!("failed to connect to KISS server {host}"))?;
        println!("Connected to {host}");
        builder
            .build(Box::new(transport))
            .context("failed to build link")?
    } else if let Some(port) = &cli.port {
        let transport = SerialTransport::open(port, cli.baud)
            .await
            .with_context(|| format!("failed to open serial port {port} at {} baud", cli.baud))?;
        println!("Connected to {port} at {} baud", cli.baud);
        builder
            .build(Box::new(transport))
            .context("failed to build link")?
    } else {
        bail!("one of --port, --host or --mock is required");
    };

    if let Some(txdelay) = cli.txdelay {
        link.set_kiss_parameter(CMD_TXDELAY, txdelay)
            .await
            .context("failed to set TXDELAY")?;
        debug!(txdelay, "TXDELAY set");
    }
    Ok(link)
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_decode(hex: &str) -> Result<()> {
    let bytes = parse_hex_bytes(hex)?;
    let frame = Frame::decode(&bytes).context("failed to decode frame")?;

    println!("{frame}");
    println!("  Type:         {} ({:?})", frame.frame_type(), frame.kind());
    println!("  Destination:  {}", frame.destination());
    println!("  Source:       {}", frame.source());
    for (i, repeater) in frame.repeaters().iter().enumerate() {
        let mark = if repeater.has_been_repeated() { " (repeated)" } else { "" };
        println!("  Via {}:        {repeater}{mark}", i + 1);
    }
    println!("  C/R:          {:?}", frame.command_response());
    println!("  Modulo:       {}", frame.modulo().value());
    println!("  P/F:          {}", frame.poll_final());
    if let Some(ns) = frame.send_sequence() {
        println!("  N(S):         {ns}");
    }
    if let Some(nr) = frame.received_sequence() {
        println!("  N(R):         {nr}");
    }
    if let Some(pid) = frame.pid() {
        println!("  PID:          0x{pid:02X}");
    }
    if !frame.payload().is_empty() {
        println!("  Payload:      {:02X?}", frame.payload());
        println!("  Text:         {}", String::from_utf8_lossy(frame.payload()));
    }
    Ok(())
}

async fn cmd_beacon(link: &Link, me: &Address, dest: &str, via: &[Address], text: &str) -> Result<()> {
    let dest = parse_address(dest)?;
    link.send_ui(me, &dest, via, text.as_bytes())
        .await
        .context("failed to send UI frame")?;
    println!("Sent UI {me} > {dest}: {text}");
    Ok(())
}

async fn cmd_connect(
    link: &Link,
    me: &Address,
    dest: &str,
    via: Vec<Address>,
    extended: bool,
) -> Result<()> {
    let remote = parse_address(dest)?;
    let modulo = if extended { Modulo::OneTwentyEight } else { Modulo::Eight };
    let config = SessionConfig::builder()
        .modulo(modulo)
        .repeaters(via)
        .build()?;

    println!("Connecting to {remote}...");
    let session = link
        .connect(me, &remote, config)
        .await
        .with_context(|| format!("failed to connect to {remote}"))?;
    println!(
        "Connected to {remote} (modulo {}). Type lines to send, Ctrl-D to disconnect.",
        session.modulo().value()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("failed to read stdin")? {
                    Some(mut line) => {
                        line.push('\r');
                        session.send(line.as_bytes()).await.context("send failed")?;
                    }
                    None => break,
                }
            }
            data = session.receive() => {
                match data? {
                    Some(data) => print_received(&data),
                    None => {
                        println!("*** Disconnected by {remote}");
                        return Ok(());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.disconnect().await?;
    println!("*** Disconnected");
    Ok(())
}

fn print_received(data: &[u8]) {
    let text = String::from_utf8_lossy(data).replace('\r', "\n");
    print!("{text}");
}

async fn cmd_listen(link: &Link, me: &Address, via: Vec<Address>) -> Result<()> {
    let mut events = link.subscribe();
    link.listen(me);
    println!("Listening as {me} (Ctrl-C to stop)...");

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Ok(LinkEvent::ConnectionOffer(offer)) => {
                let config = SessionConfig::builder()
                    .modulo(offer.modulo())
                    .repeaters(via.clone())
                    .build()?;
                match link.accept(&offer, config).await {
                    Ok(session) => {
                        println!("*** Connected from {}", offer.remote());
                        tokio::spawn(echo(session));
                    }
                    Err(e) => warn!(remote = %offer.remote(), error = %e, "accept failed"),
                }
            }
            Ok(LinkEvent::Datagram(frame)) => println!("[UI] {frame}"),
            Ok(LinkEvent::TransportClosed) => {
                println!("Transport closed.");
                break;
            }
            Ok(LinkEvent::Monitor(_)) => {}
            Err(RecvError::Lagged(n)) => println!("[warning] missed {n} events (consumer too slow)"),
            Err(RecvError::Closed) => break,
        }
    }

    link.unlisten(me);
    Ok(())
}

/// Send every received payload straight back until the peer leaves.
async fn echo(session: Session) {
    let remote = session.remote().clone();
    loop {
        match session.receive().await {
            Ok(Some(data)) => {
                print_received(&data);
                if let Err(e) = session.send(&data).await {
                    warn!(%remote, error = %e, "echo failed");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%remote, error = %e, "receive failed");
                break;
            }
        }
    }
    info!(%remote, "session ended");
    println!("*** {remote} disconnected");
}

async fn cmd_monitor(link: &Link, duration_secs: u64) -> Result<()> {
    let mut events = link.subscribe();

    println!("Monitoring channel (Ctrl-C to stop)...");

    let deadline = if duration_secs > 0 {
        Some(Instant::now() + Duration::from_secs(duration_secs))
    } else {
        None
    };

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        let event = tokio::select! {
            event = tokio::time::timeout(timeout, events.recv()) => event,
            _ = tokio::signal::ctrl_c() => break,
        };
        match event {
            Ok(Ok(LinkEvent::Monitor(frame))) => println!("{frame}"),
            Ok(Ok(LinkEvent::TransportClosed)) => {
                println!("Transport closed.");
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(n))) => {
                println!("[warning] missed {n} frames (consumer too slow)");
            }
            Ok(Err(RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                // Timeout expired (either deadline or the 1-hour fallback).
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                    break;
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // `decode` works offline.
    if let Command::Decode { hex } = &cli.command {
        return cmd_decode(hex);
    }

    let monitor = matches!(cli.command, Command::Monitor { .. });
    let link = open_link(&cli, monitor).await?;

    let result = match &cli.command {
        Command::Beacon { dest, text } => {
            let me = mycall(&cli)?;
            cmd_beacon(&link, &me, dest, &via(&cli)?, text).await
        }
        Command::Connect { dest, extended } => {
            let me = mycall(&cli)?;
            cmd_connect(&link, &me, dest, via(&cli)?, *extended).await
        }
        Command::Listen => {
            let me = mycall(&cli)?;
            cmd_listen(&link, &me, via(&cli)?).await
        }
        Command::Monitor { duration } => cmd_monitor(&link, *duration).await,
        Command::Decode { .. } => unreachable!("decode handled above"),
    };

    link.shutdown().await.ok();
    result
}
