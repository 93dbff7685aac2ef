//! Purpose: Library crate behind the `portstash` CLI and embedding shells.
//! Exports: `api` (ports, bridge, storage handles), `core` (storage, codec, errors), `notice`.
//! Role: Lets a storage-ignorant application core persist state through typed ports.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod notice;
