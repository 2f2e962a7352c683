//! Bizhub action adapters - perform one action per request against a
//! connected provider, and create hosted payment checkouts.
//!
//! Credentials come from the bizhub credential store; this crate never
//! runs an OAuth flow itself, it only refreshes tokens that are about to
//! expire.
//!
//! # Architecture
//!
//! ```text
//!   POST /api/actions/:integration/:action
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       AdapterRegistry                    │
//! │  - find (integration, action)            │
//! │  - validate payload (400)                │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       AccountResolver                    │
//! │  - load connected record (403 if none)   │
//! │  - refresh near-expiry token, write back │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       ActionAdapter::execute             │
//! │  - one upstream call (502 on non-2xx)    │
//! └─────────────────────────────────────────┘
//!          ↓
//!   Twitter · LinkedIn · Gmail · Outlook · Google Calendar
//! ```
//!
//! Payments follow the same shape through [`payments::CheckoutProvider`]
//! (Stripe, PayPal, SumUp, Coinbase Commerce), keyed by process-level
//! configuration instead of per-user credentials.

mod adapter;
pub mod account;
pub mod api;
pub mod connectors;
pub mod payments;
pub mod registry;

pub use adapter::{
    parse_payload, require_text, send_upstream, upstream_json, ActionAdapter, ActionError,
    ConnectedAccount,
};
