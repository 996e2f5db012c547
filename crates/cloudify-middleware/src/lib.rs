//! cloudify-middleware — the per-request edge orchestrator.
//!
//! Sits ahead of normal request routing. For each inbound request it
//! resolves which edge function (if any) matches the path, invokes the
//! sandbox, interprets the sentinel headers (`x-cloudify-next`,
//! `x-cloudify-rewrite`), and independently runs A/B assignment,
//! merging visitor/variant cookies onto whichever response wins.
//!
//! Edge function failures never take the site down: `error` and
//! `timeout` outcomes fall back to the origin response (and are still
//! recorded in the invocation audit trail by the sandbox).

pub mod http;
pub mod orchestrator;
pub mod sentinel;

pub use http::{Header, HeaderMap, Request, Response, SameSite, SetCookie};
pub use orchestrator::{BoxResponseFuture, EdgeOrchestrator, OriginHandler};
pub use sentinel::{
    json_response, next_response, redirect_response, rewrite_response, AB_ASSIGNMENTS_HEADER,
    AB_COOKIE_PREFIX, NEXT_HEADER, REWRITE_HEADER, VISITOR_COOKIE,
};
