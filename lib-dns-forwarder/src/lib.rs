//! A forwarding DNS proxy.
//!
//! Queries arriving on the listening socket are relayed, octet for
//! octet, to an upstream resolver; replies coming back are matched to
//! the client that asked by the 16-bit transaction ID and relayed, the
//! same octets again, to that client.  The proxy never rewrites a
//! datagram: whatever the client or the upstream put on the wire is
//! what the other side gets.
//!
//! Decoding (for classification and diagnostics) lives in `dns-wire`;
//! this crate is the concurrent part: the listener, the per-datagram
//! workers, and the transaction table they share.

pub mod server;
pub mod transactions;
