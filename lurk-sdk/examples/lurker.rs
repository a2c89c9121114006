//! Minimal plain-text client driving a [`Session`] over TCP.
//!
//! Usage:
//!   cargo run --example lurker -- --server irc.libera.chat:6667 --nick lurker
//!   cargo run --example lurker -- --config lurk.toml
//!
//! Lines typed on stdin are sent as is (`PRIVMSG #chan :hi`), except
//! `/msg <target> <text>`, which goes through the line splitter.

use anyhow::{Context, Result, bail};
use clap::Parser;
use lurk_sdk::{Event, Message, Session, SessionConfig};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lurker", about = "Lurk on an IRC server")]
struct Args {
    /// Server address (host:port). Overrides the config file.
    #[arg(long)]
    server: Option<String>,
    #[arg(long, default_value = "lurker")]
    nick: String,
    /// Channels to join once registered.
    #[arg(long = "channel")]
    channels: Vec<String>,
    /// TOML session config.
    #[arg(long, env = "LURK_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lurk_sdk=info")),
        )
        .init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::new(&args.nick),
    };
    if args.server.is_some() {
        config.server = args.server;
    }
    config.channels.extend(args.channels);
    let Some(server) = config.server.clone() else {
        bail!("no server given, use --server or set one in the config");
    };
    let channels = std::mem::take(&mut config.channels);

    let stream = TcpStream::connect(&server)
        .await
        .with_context(|| format!("connecting to {server}"))?;
    tracing::info!(%server, "connected");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            tracing::trace!(%msg, "send");
            if writer.write_all(format!("{msg}\r\n").as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(out_tx, config.into_params());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("server closed the connection");
                    break;
                };
                let msg = match Message::parse(&line) {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::warn!(error = %e, line, "unparsable line");
                        continue;
                    }
                };
                match session.handle_message(&msg) {
                    Ok(Some(Event::Registered)) => {
                        tracing::info!(nick = session.nick(), "registered");
                        for channel in &channels {
                            session.join(channel, None);
                        }
                    }
                    Ok(Some(event)) => print_event(&event),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "dropped message"),
                }
                if session.is_closed() {
                    break;
                }
            }
            input = stdin.next_line() => {
                let Some(input) = input? else {
                    session.quit(None);
                    session.close();
                    break;
                };
                match input.strip_prefix("/msg ").and_then(|rest| rest.split_once(' ')) {
                    Some((target, text)) => session.privmsg(target, text),
                    None => session.send_raw(&input),
                }
            }
        }
    }

    session.close();
    drop(session);
    writer_task.await?;
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Message(m) => println!("[{}] <{}> {}", m.target, m.user, m.content),
        Event::SelfJoin { channel, topic, .. } => println!("joined {channel}: {topic}"),
        Event::Error { code, message, .. } => println!("! {code} {message}"),
        other => match serde_json::to_string(other) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "can't print event"),
        },
    }
}
