//! memgate CLI Client
//!
//! Small text-protocol client for poking a running gateway (or any
//! memcached-compatible server).

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use clap::{Parser, Subcommand};

/// memgate CLI
#[derive(Parser, Debug)]
#[command(name = "memgate-cli")]
#[command(about = "CLI for the memgate memcached gateway")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:11211")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Get a value with its CAS token
    Gets { key: String },

    /// Set a key-value pair
    Set {
        key: String,
        value: String,

        /// Opaque flags stored with the item
        #[arg(short, long, default_value = "0")]
        flags: u32,

        /// Expiry in seconds (0 = never)
        #[arg(short, long, default_value = "0")]
        exptime: i64,
    },

    /// Delete a key
    Del { key: String },

    /// Increment a counter
    Incr { key: String, delta: u64 },

    /// Decrement a counter
    Decr { key: String, delta: u64 },

    /// Report the server version
    Version,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> std::io::Result<()> {
    let stream = TcpStream::connect(&args.server)?;
    stream.set_nodelay(true)?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    match &args.command {
        Commands::Get { key } => {
            writeln_cmd(&mut writer, &format!("get {key}"))?;
            print_retrieval(&mut reader)?;
        }
        Commands::Gets { key } => {
            writeln_cmd(&mut writer, &format!("gets {key}"))?;
            print_retrieval(&mut reader)?;
        }
        Commands::Set {
            key,
            value,
            flags,
            exptime,
        } => {
            write!(
                writer,
                "set {key} {flags} {exptime} {}\r\n{value}\r\n",
                value.len()
            )?;
            writer.flush()?;
            print_line(&mut reader)?;
        }
        Commands::Del { key } => {
            writeln_cmd(&mut writer, &format!("delete {key}"))?;
            print_line(&mut reader)?;
        }
        Commands::Incr { key, delta } => {
            writeln_cmd(&mut writer, &format!("incr {key} {delta}"))?;
            print_line(&mut reader)?;
        }
        Commands::Decr { key, delta } => {
            writeln_cmd(&mut writer, &format!("decr {key} {delta}"))?;
            print_line(&mut reader)?;
        }
        Commands::Version => {
            writeln_cmd(&mut writer, "version")?;
            print_line(&mut reader)?;
        }
    }

    Ok(())
}

fn writeln_cmd<W: Write>(writer: &mut W, line: &str) -> std::io::Result<()> {
    write!(writer, "{line}\r\n")?;
    writer.flush()
}

fn print_line<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    print!("{line}");
    Ok(())
}

/// Print VALUE blocks until the END marker
fn print_retrieval<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header)? == 0 {
            return Ok(());
        }
        let trimmed = header.trim_end();
        println!("{trimmed}");
        // Anything that is not a VALUE header terminates the retrieval
        if !trimmed.starts_with("VALUE ") {
            return Ok(());
        }

        // VALUE <key> <flags> <bytes> [<cas>] followed by the data block
        let bytes: usize = trimmed
            .split_whitespace()
            .nth(3)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let mut data = vec![0u8; bytes + 2];
        reader.read_exact(&mut data)?;
        print!("{}", String::from_utf8_lossy(&data[..bytes]));
        println!();
    }
}
