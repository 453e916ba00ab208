//! # CLI - CaskKV Interactive Shell
//!
//! A REPL-style command-line interface for the CaskKV storage engine.
//! Reads commands from stdin, executes them against the engine, and prints
//! results to stdout. Logs go to stderr so piped output stays clean.
//!
//! ## Commands
//!
//! ```text
//! SET key value        Insert or update a key-value pair
//! GET key              Look up a key (prints value or "(nil)")
//! DEL key              Delete a key
//! MSET k v [k v ...]   Write several pairs in one atomic batch
//! SCAN [prefix]        List pairs in ascending key order
//! RSCAN [prefix]       List pairs in descending key order
//! KEYS                 List live keys
//! MERGE                Compact sealed segments (adopted on next start)
//! SYNC                 Flush the active segment to disk
//! STATS                Print storage statistics
//! EXIT / QUIT          Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! ```text
//! CASKKV_DIR            data directory           (default: "data")
//! CASKKV_SEGMENT_KB     max segment size in KiB  (default: 262144 = 256 MiB)
//! CASKKV_SYNC           fsync every write        (default: "false")
//! CASKKV_BYTES_PER_SYNC periodic sync threshold  (default: 0 = off)
//! CASKKV_INDEX          btree | art | bptree     (default: "btree")
//! CASKKV_MMAP           mmap segments at startup (default: "true")
//! RUST_LOG              log filter               (default: "warn")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ cargo run -p cli
//! CaskKV started (dir=data, index=btree, segments=0, seq=0)
//! > SET name Alice
//! OK
//! > GET name
//! Alice
//! > SCAN
//! name -> Alice
//! (1 entries)
//! > EXIT
//! bye
//! ```

use anyhow::Result;
use config::{IndexType, IteratorOptions, Options, WriteBatchOptions};
use engine::{Engine, EngineError};
use std::io::{self, BufRead, Write};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Builds engine options from the `CASKKV_*` environment variables.
fn options_from_env() -> Result<Options> {
    let segment_kb: u64 = env_or("CASKKV_SEGMENT_KB", "262144").parse()?;
    let index_type: IndexType = env_or("CASKKV_INDEX", "btree").parse()?;
    Ok(Options::new(env_or("CASKKV_DIR", "data"))
        .max_segment_size(segment_kb * 1024)
        .sync_writes(env_or("CASKKV_SYNC", "false").parse()?)
        .bytes_per_sync(env_or("CASKKV_BYTES_PER_SYNC", "0").parse()?)
        .index_type(index_type)
        .mmap_at_startup(env_or("CASKKV_MMAP", "true").parse()?))
}

/// Runs one command line. Returns `false` when the shell should exit.
///
/// Engine failures are reported as `ERR` lines rather than ending the
/// session; only failures to write to `out` propagate.
fn execute(engine: &Engine, line: &str, out: &mut impl Write) -> io::Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(true);
    };

    match cmd.to_uppercase().as_str() {
        "SET" => match parts.next() {
            Some(k) => {
                let v = parts.collect::<Vec<&str>>().join(" ");
                if v.is_empty() {
                    writeln!(out, "ERR usage: SET key value")?;
                } else {
                    match engine.put(k.as_bytes(), v.as_bytes()) {
                        Ok(()) => writeln!(out, "OK")?,
                        Err(e) => writeln!(out, "ERR set failed: {e}")?,
                    }
                }
            }
            None => writeln!(out, "ERR usage: SET key value")?,
        },
        "GET" => match parts.next() {
            Some(k) => match engine.get(k.as_bytes()) {
                Ok(v) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
                Err(EngineError::KeyNotFound) => writeln!(out, "(nil)")?,
                Err(e) => writeln!(out, "ERR read failed: {e}")?,
            },
            None => writeln!(out, "ERR usage: GET key")?,
        },
        "DEL" => match parts.next() {
            Some(k) => match engine.delete(k.as_bytes()) {
                Ok(()) => writeln!(out, "OK")?,
                Err(e) => writeln!(out, "ERR del failed: {e}")?,
            },
            None => writeln!(out, "ERR usage: DEL key")?,
        },
        "MSET" => {
            let args: Vec<&str> = parts.collect();
            if args.is_empty() || args.len() % 2 != 0 {
                writeln!(out, "ERR usage: MSET key value [key value ...]")?;
            } else {
                match mset(engine, &args) {
                    Ok(()) => writeln!(out, "OK ({} keys)", args.len() / 2)?,
                    Err(e) => writeln!(out, "ERR mset failed: {e}")?,
                }
            }
        }
        "SCAN" | "RSCAN" => {
            let mut opts = IteratorOptions::with_prefix(parts.next().unwrap_or(""));
            if cmd.eq_ignore_ascii_case("RSCAN") {
                opts = opts.reversed();
            }
            match scan(engine, opts) {
                Ok(pairs) if pairs.is_empty() => writeln!(out, "(empty)")?,
                Ok(pairs) => {
                    for (k, v) in &pairs {
                        writeln!(
                            out,
                            "{} -> {}",
                            String::from_utf8_lossy(k),
                            String::from_utf8_lossy(v)
                        )?;
                    }
                    writeln!(out, "({} entries)", pairs.len())?;
                }
                Err(e) => writeln!(out, "ERR scan failed: {e}")?,
            }
        }
        "KEYS" => match engine.list_keys() {
            Ok(keys) if keys.is_empty() => writeln!(out, "(empty)")?,
            Ok(keys) => {
                for k in &keys {
                    writeln!(out, "{}", String::from_utf8_lossy(k))?;
                }
            }
            Err(e) => writeln!(out, "ERR keys failed: {e}")?,
        },
        "MERGE" => match engine.merge() {
            Ok(()) => writeln!(out, "OK (takes effect on next start)")?,
            Err(e) => writeln!(out, "ERR merge failed: {e}")?,
        },
        "SYNC" => match engine.sync() {
            Ok(()) => writeln!(out, "OK")?,
            Err(e) => writeln!(out, "ERR sync failed: {e}")?,
        },
        "STATS" => match engine.stat() {
            Ok(s) => writeln!(
                out,
                "keys={} segments={} reclaimable={}B disk={}B seq={}",
                s.key_count,
                s.segment_count,
                s.reclaimable_size,
                s.disk_size,
                engine.seq_no()
            )?,
            Err(e) => writeln!(out, "ERR stats failed: {e}")?,
        },
        "EXIT" | "QUIT" => {
            writeln!(out, "bye")?;
            return Ok(false);
        }
        other => writeln!(out, "unknown command: {other}")?,
    }
    Ok(true)
}

fn mset(engine: &Engine, args: &[&str]) -> engine::Result<()> {
    let mut batch = engine.new_write_batch(WriteBatchOptions::default());
    for pair in args.chunks(2) {
        batch.put(pair[0].as_bytes(), pair[1].as_bytes())?;
    }
    batch.commit()
}

fn scan(engine: &Engine, opts: IteratorOptions) -> engine::Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut it = engine.iter(opts)?;
    let mut pairs = Vec::new();
    while let Some(key) = it.key() {
        let key = key.to_vec();
        if let Some(value) = it.value()? {
            pairs.push((key, value));
        }
        it.next()?;
    }
    it.close();
    Ok(pairs)
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let options = options_from_env()?;
    debug!(?options, "starting shell");
    let engine = Engine::open(options)?;

    println!(
        "CaskKV started (dir={}, index={}, segments={}, seq={})",
        engine.dir_path().display(),
        engine.options().index_type,
        engine.segment_count(),
        engine.seq_no()
    );
    println!("Commands: SET key value | GET key | DEL key | MSET k v ...");
    println!("          SCAN [prefix] | RSCAN [prefix] | KEYS | MERGE | SYNC | STATS | EXIT");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        if !execute(&engine, &line, &mut stdout)? {
            break;
        }
        write!(stdout, "> ")?;
        stdout.flush()?;
    }

    engine.close()?;
    Ok(())
}
