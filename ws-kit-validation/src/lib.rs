//! Schema validation plugin for `ws-kit-core`.
//!
//! Installs an [`ext::RpcContextExt`]/[`ext::RpcRouterExt`]-shaped surface
//! for request/response RPC: `router.rpc::<M>(handler)` for registration,
//! `ctx.reply`/`ctx.progress`/`ctx.fail`/`ctx.send` for outbound traffic.
//! Everything here is gated behind the `validation` capability, granted by
//! installing [`plugin::ValidationPlugin`].

pub mod ext;
pub mod plugin;

pub use ext::{RpcContextExt, RpcRouterExt, RPC_ERROR_TYPE, RPC_PROGRESS_TYPE};
pub use plugin::ValidationPlugin;
