use std::{
    io::{self, BufRead},
    ops::ControlFlow,
    thread,
};

use clap::Parser;
use log::{LevelFilter, debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uart_accessory_comm::device::{DeviceNodeChannelFactory, DeviceNodeEnumerator};
use uart_accessory_core::{
    config::load_or_default, connection::AccessoryConnection, events::event_queue,
};

use crate::{
    command::{Command, HELP},
    config::{Args, ConsoleConfig},
    console::Console,
    prompt::PromptPermissions,
    watcher::watch_node,
};

mod command;
mod config;
mod console;
mod prompt;
mod watcher;

/// Reads stdin on a plain thread; a blocked read there never holds up exit.
fn spawn_stdin_lines() -> io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new()
        .name("console-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();
    let mut config: ConsoleConfig = load_or_default(args.config.as_deref());
    args.apply(&mut config);
    debug!("Using {:?}", config);

    let enumerator = DeviceNodeEnumerator::new(&config.accessory_node);
    let node = enumerator.node().clone();
    let permissions = PromptPermissions::new();
    if args.allow {
        permissions.grant(node.clone());
    }

    let (events, mut queue) = event_queue();
    let connection = AccessoryConnection::new(
        enumerator,
        permissions.clone(),
        DeviceNodeChannelFactory,
        events.clone(),
        config.reader.clone(),
    );
    let mut console = Console::new(connection, permissions);

    let token = CancellationToken::new();
    let watcher = tokio::spawn(watch_node(
        node,
        config.refresh_period(),
        events,
        token.clone(),
    ));

    let mut lines = spawn_stdin_lines()?;
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                match Command::parse(&line) {
                    Ok(Some(command)) => match console.execute(command) {
                        ControlFlow::Continue(Some(reply)) => println!("{reply}"),
                        ControlFlow::Continue(None) => {}
                        ControlFlow::Break(()) => break,
                    },
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            Some(event) = queue.recv() => {
                if let Some(reply) = console.on_event(event) {
                    println!("{reply}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Exiting");
    token.cancel();
    console.shutdown();
    watcher.await?;
    Ok(())
}
