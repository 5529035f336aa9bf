//! Interactive and one-shot command-line client.

use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use severn_client::KvClient;

#[derive(Debug, Parser)]
#[command(name = "severn-cli")]
#[command(about = "A command-line client for the Severn key-value store")]
struct Cli {
    /// Server address to connect to.
    #[arg(long, default_value = "localhost:8080")]
    server: String,

    /// Run a single command and exit, e.g. --command 'get mykey'.
    #[arg(long)]
    command: Option<String>,
}

fn print_usage() {
    println!();
    println!("Available commands:");
    println!("  set <key> <value> <ttl-seconds>   Store a value with TTL");
    println!("  get <key>                         Fetch a value");
    println!("  delete <key>                      Remove a value");
    println!("  ttl <key>                         Remaining TTL for a key");
    println!("  status                            Node role (leader/follower)");
    println!("  help                              Show this help");
    println!("  exit                              Quit");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut client = KvClient::connect(&cli.server)
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;

    if let Some(command) = &cli.command {
        let args = parse_input(command);
        process_command(&mut client, &args).await;
        return Ok(());
    }

    println!("Connected to {}. Type 'help' for commands, 'exit' to quit.", cli.server);

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("severn> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next() else { break };
        let line = line.context("failed to read input")?;
        let args = parse_input(&line);
        if args.is_empty() {
            continue;
        }

        match args[0].as_str() {
            "exit" => {
                println!("Goodbye!");
                break;
            }
            "help" => print_usage(),
            _ => process_command(&mut client, &args).await,
        }
    }

    Ok(())
}

/// Split an input line into arguments, honoring double quotes so values
/// may contain spaces.
fn parse_input(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        args.push(current);
    }
    args
}

async fn process_command(client: &mut KvClient, args: &[String]) {
    let Some(cmd) = args.first() else { return };

    match cmd.as_str() {
        "set" => {
            if args.len() < 4 {
                println!("Usage: set <key> <value> <ttl-seconds>");
                return;
            }
            let ttl = match args[3].parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(e) => {
                    println!("Error parsing TTL: {e}");
                    return;
                }
            };
            match client.set(&args[1], &args[2], ttl).await {
                Ok(()) => println!("Successfully set key '{}'", args[1]),
                Err(e) => println!("Error: {e}"),
            }
        }

        "get" => {
            if args.len() < 2 {
                println!("Usage: get <key>");
                return;
            }
            match client.get(&args[1]).await {
                Ok((value, ttl)) => {
                    println!("Key: {}", args[1]);
                    println!("Value: {value}");
                    println!("TTL: {ttl:?}");
                }
                Err(e) => println!("Error: {e}"),
            }
        }

        "delete" => {
            if args.len() < 2 {
                println!("Usage: delete <key>");
                return;
            }
            match client.delete(&args[1]).await {
                Ok(()) => println!("Successfully deleted key '{}'", args[1]),
                Err(e) => println!("Error: {e}"),
            }
        }

        "ttl" => {
            if args.len() < 2 {
                println!("Usage: ttl <key>");
                return;
            }
            match client.ttl(&args[1]).await {
                Ok(ttl) => println!("TTL for key '{}': {ttl:?}", args[1]),
                Err(e) => println!("Error: {e}"),
            }
        }

        "status" => match client.status().await {
            Ok(status) => println!("{status}"),
            Err(e) => println!("Error: {e}"),
        },

        other => {
            println!("Unknown command: {other}");
            print_usage();
        }
    }
}
