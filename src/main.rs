//! Purpose: `portstash` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Commands emit stable JSON on stdout; the bridge command emits port events only.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Logs go to stderr through `tracing`, filtered by `RUST_LOG`.
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod origin_paths;
mod stdio_bridge;

use origin_paths::{OriginNameResolveError, default_origin_dir, resolve_named_origin_path};
use portstash::api::{
    BridgeConfig, DEFAULT_PEERS_KEY, DEFAULT_QUOTA_BYTES, DEFAULT_SESSION_KEY, Error, ErrorKind,
    KeyFilter, Origin, Quota, codec, to_exit_code,
};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `portstash --help` for usage."));
            }
        },
    };

    let origin_dir = cli.dir.unwrap_or_else(default_origin_dir);
    command_dispatch::dispatch_command(cli.command, origin_dir)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "portstash",
    version,
    about = "Key-value persistence bridge for port-driven application cores",
    long_about = None,
    after_help = r#"EXAMPLES
  $ portstash set app session '{"user": "ana"}'
  $ portstash get app session
  $ portstash bridge app --watch-all   # JSON port messages on stdin/stdout
    > {"port":"load","key":"session"}
    < {"port":"loaded","key":"session","value":{"user":"ana"}}"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        help = "Directory holding named origins (default: ~/.portstash/origins)",
        value_hint = ValueHint::DirPath
    )]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Print the decoded value stored under a key")]
    Get {
        #[arg(help = "Origin name or path")]
        origin: String,
        key: String,
    },
    #[command(about = "Store a JSON value under a key")]
    Set {
        #[arg(help = "Origin name or path")]
        origin: String,
        key: String,
        #[arg(help = "JSON value to store")]
        value: String,
        #[arg(long, default_value_t = DEFAULT_QUOTA_BYTES, help = "Origin capacity in bytes")]
        quota_bytes: usize,
    },
    #[command(about = "Remove a key (no error when it is already absent)")]
    Remove {
        #[arg(help = "Origin name or path")]
        origin: String,
        key: String,
    },
    #[command(about = "List the keys stored in an origin")]
    Keys {
        #[arg(help = "Origin name or path")]
        origin: String,
    },
    #[command(
        about = "Run a bridge context over JSON lines on stdin/stdout",
        long_about = r#"Run one execution context attached to an origin.

Reads one port request per stdin line and writes one port event per stdout
line. The first line written is {"port":"init","flags":...} carrying the
session value. Writes made by other processes to the same origin are picked up
every --poll-ms and reported as externalChange events for watched keys."#
    )]
    Bridge {
        #[arg(help = "Origin name or path")]
        origin: String,
        #[arg(long, default_value = DEFAULT_SESSION_KEY, help = "Key holding the startup flags")]
        session_key: String,
        #[arg(long, default_value = DEFAULT_PEERS_KEY, help = "Key holding the cached peer list")]
        peers_key: String,
        #[arg(long = "watch", help = "Extra key to report foreign changes for (repeatable)")]
        watch: Vec<String>,
        #[arg(long, conflicts_with = "watch", help = "Report foreign changes for every key")]
        watch_all: bool,
        #[arg(long, default_value_t = 200, help = "Minimum peersLoaded reply latency")]
        peer_latency_ms: u64,
        #[arg(long, help = "Acknowledge successful local saves with a stored event")]
        ack_local_save: bool,
        #[arg(long, default_value_t = 250, help = "Foreign-write poll interval; 0 disables")]
        poll_ms: u64,
        #[arg(long, default_value_t = DEFAULT_QUOTA_BYTES, help = "Origin capacity in bytes")]
        quota_bytes: usize,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version information")]
    Version,
}

fn resolve_origin(input: &str, origin_dir: &Path) -> Result<PathBuf, Error> {
    if input.contains('/') || input.contains('\\') {
        return Ok(PathBuf::from(input));
    }
    resolve_named_origin_path(input, origin_dir).map_err(map_origin_name_resolve_error)
}

fn map_origin_name_resolve_error(err: OriginNameResolveError) -> Error {
    match err {
        OriginNameResolveError::Empty => {
            Error::new(ErrorKind::Usage).with_message("origin name must not be empty")
        }
        OriginNameResolveError::ContainsPathSeparator => Error::new(ErrorKind::Usage)
            .with_message("origin name must not contain path separators"),
    }
}

fn open_origin(input: &str, origin_dir: &Path, quota: Quota) -> Result<Origin, Error> {
    let path = resolve_origin(input, origin_dir)?;
    Origin::open_file(&path, quota).map_err(|err| {
        if err.kind() == ErrorKind::Unavailable {
            err.with_hint("Check that the origin directory exists and is writable.")
        } else {
            err
        }
    })
}

fn parse_value_arg(input: &str) -> Result<Value, Error> {
    codec::decode(input).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("value must be valid JSON")
            .with_hint("Quote JSON strings, e.g. '\"text\"'.")
            .with_source(err)
    })
}

fn bridge_config(
    session_key: String,
    peers_key: String,
    watch: Vec<String>,
    watch_all: bool,
    peer_latency_ms: u64,
    ack_local_save: bool,
) -> BridgeConfig {
    let filter = if watch_all {
        KeyFilter::All
    } else {
        KeyFilter::keys(std::iter::once(session_key.clone()).chain(watch))
    };
    BridgeConfig::new()
        .with_session_key(session_key)
        .with_peers_key(peers_key)
        .with_watch(filter)
        .with_peer_latency(std::time::Duration::from_millis(peer_latency_ms))
        .with_acknowledge_local_save(ack_local_save)
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("{}", error_text(err));
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", err.kind()))
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut source = StdError::source(err);
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    json!({ "error": Value::Object(inner) })
}

fn error_text(err: &Error) -> String {
    let mut lines = vec![format!("error: {}", error_message(err))];
    if let Some(hint) = err.hint() {
        lines.push(format!("hint: {hint}"));
    }
    if let Some(key) = err.key() {
        lines.push(format!("key: {key}"));
    }
    if let Some(path) = err.path() {
        lines.push(format!("path: {}", path.display()));
    }
    for cause in error_causes(err) {
        lines.push(format!("caused by: {cause}"));
    }
    lines.join("\n")
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .next()
        .unwrap_or("invalid arguments")
        .trim_start_matches("error: ")
        .to_string()
}

fn print_completion(shell: Shell) {
    let mut cmd = Cli::command();
    clap_complete::aot::generate(shell, &mut cmd, "portstash", &mut io::stdout());
}
