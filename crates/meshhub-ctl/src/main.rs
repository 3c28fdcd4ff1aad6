//! meshhub-ctl: command-line interface for the meshhub daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 17879;

fn print_usage() {
    println!("Usage: meshhub-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status             Show local hub status");
    println!("  hubs               List every known hub");
    println!("  hub <address>      Show one hub in detail");
    println!("  clients            List clients across the overlay");
    println!("  connections        List live hub and client connections");
    println!("  shutdown           Stop the daemon");
    println!();
    println!("Options:");
    println!("  --port <port>   Status API port (default: {})", DEFAULT_PORT);
}

/// Split `--port <n>` out of the arguments.
fn parse_args(args: &[String]) -> Result<(u16, Vec<&str>)> {
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }
    Ok((port, remaining))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (port, remaining) = parse_args(&args)?;

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["hubs"] => cmd::hubs::cmd_hubs(port).await,
        ["hub", address] => cmd::hubs::cmd_hub(port, address).await,
        ["clients"] => cmd::hubs::cmd_clients(port).await,
        ["connections"] => cmd::hubs::cmd_connections(port).await,
        ["shutdown"] => cmd::status::cmd_shutdown(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
