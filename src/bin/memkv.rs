//! this binary starts an interactive memkv session
//! to see the list of options, type: `memkv --help`

use std::io::{self, BufRead, Write};

use anyhow::Context;
use clap::{crate_version, Arg, Command};
use memkv::{Config, Db};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

fn main() -> anyhow::Result<()> {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    let matches = Command::new("memkv")
        .version(crate_version!())
        .about("an in-memory multi-type key-value store")
        .arg(
            Arg::new("db-file")
                .long("db-file")
                .value_name("PATH")
                .help("sets the snapshot file the store loads from and saves to")
                .default_value("db.json"),
        )
        .arg(
            Arg::new("hash-seed")
                .long("hash-seed")
                .value_name("SEED")
                .help("sets the hash seed; 0 derives one from the clock")
                .default_value("0"),
        )
        .get_matches();

    let db_file = matches
        .get_one::<String>("db-file")
        .expect("has a default value");
    let hash_seed: u32 = matches
        .get_one::<String>("hash-seed")
        .expect("has a default value")
        .parse()
        .context("--hash-seed must be an unsigned 32-bit integer")?;

    let config = Config::new()
        .hash_seed(hash_seed)
        .persistence_filepath(db_file);
    let mut db = Db::start(config).context("could not start the database")?;

    println!("memkv {}", crate_version!());
    println!("Type commands to interact with the store; SHUTDOWN saves and exits.");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    while db.is_running() {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF: stop cleanly, saving on the way out
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        println!("{}", db.command(line));
    }

    db.stop().context("could not stop the database")?;
    Ok(())
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        // log to stderr so replies on stdout stay clean
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
