//! Purpose: Hold top-level CLI command dispatch for `portstash`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: One-shot commands go through the same storage adapter and codec as the bridge.
//! Invariants: Absent keys exit with the `NotFound` code; corrupted values exit with `Decode`.

use super::*;

pub(super) fn dispatch_command(command: Command, origin_dir: PathBuf) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            print_completion(shell);
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_json(json!({
                "name": "portstash",
                "version": env!("CARGO_PKG_VERSION"),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Get { origin, key } => {
            let origin = open_origin(&origin, &origin_dir, Quota::default())?;
            let (area, _notifications) = origin.attach()?;
            let raw = area.get(&key)?.ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("key is not set")
                    .with_key(&key)
            })?;
            let value = codec::decode(&raw).map_err(|err| err.with_key(&key))?;
            emit_json(json!({ "key": key, "value": value }));
            Ok(RunOutcome::ok())
        }
        Command::Set {
            origin,
            key,
            value,
            quota_bytes,
        } => {
            let value = parse_value_arg(&value)?;
            let raw = codec::encode(&value).map_err(|err| err.with_key(&key))?;
            let origin = open_origin(&origin, &origin_dir, Quota::new(quota_bytes))?;
            let (area, _notifications) = origin.attach()?;
            area.set(&key, &raw)?;
            emit_json(json!({ "key": key, "value": value }));
            Ok(RunOutcome::ok())
        }
        Command::Remove { origin, key } => {
            let origin = open_origin(&origin, &origin_dir, Quota::default())?;
            let (area, _notifications) = origin.attach()?;
            area.remove(&key)?;
            emit_json(json!({ "removed": key }));
            Ok(RunOutcome::ok())
        }
        Command::Keys { origin } => {
            let origin = open_origin(&origin, &origin_dir, Quota::default())?;
            let (area, _notifications) = origin.attach()?;
            emit_json(json!({ "keys": area.keys()? }));
            Ok(RunOutcome::ok())
        }
        Command::Bridge {
            origin,
            session_key,
            peers_key,
            watch,
            watch_all,
            peer_latency_ms,
            ack_local_save,
            poll_ms,
            quota_bytes,
        } => {
            let path = resolve_origin(&origin, &origin_dir)?;
            let store = Origin::open_file_or_memory(&path, Quota::new(quota_bytes))?;
            let config = bridge_config(
                session_key,
                peers_key,
                watch,
                watch_all,
                peer_latency_ms,
                ack_local_save,
            );
            let bridge = stdio_bridge::StdioBridge {
                label: origin,
                origin: store,
                config,
                poll: std::time::Duration::from_millis(poll_ms),
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(stdio_bridge::serve(bridge))?;
            Ok(RunOutcome::ok())
        }
    }
}
