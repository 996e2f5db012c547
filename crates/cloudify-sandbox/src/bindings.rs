//! Generated Rust bindings for the Cloudify edge WIT interface.
//!
//! Uses [`wasmtime::component::bindgen!`] to produce the typed `Host`
//! trait for the `cloudify:edge/host` interface. The host-side
//! implementation lives on [`crate::host::EdgeHostState`].
//!
//! The `edge-guest` world declares imports only; entry-point exports
//! are resolved dynamically by name (see [`crate::validate::EntryPoint`])
//! so a function may export `middleware`, `handler`, or
//! `default-handler` without a per-name world.

wasmtime::component::bindgen!({
    path: "wit",
    world: "edge-guest",
});
