//! Hopper - bounded-queue media upload ingest
//!
//! One upload per TCP connection: a NUL-terminated `senderId|fileName`
//! header, then raw payload bytes until the peer closes. Accepted
//! connections flow through a capacity-bounded admission queue into a
//! fixed worker pool; each sender's files live under `thread{id}/` with a
//! hard cap on retained files. Work beyond capacity is dropped, not queued.

pub mod cli;
pub mod hook;
pub mod log;
pub mod net;
pub mod protocol;
pub mod queue;
pub mod scan;
pub mod store;
pub mod worker;
