//! rsync daemon wire protocol, version 30, sender-only.
//!
//! Connection lifecycle: [`handshake`] negotiates the banner and module
//! selection, [`args`] and [`filters`] read the client's argv and filter
//! blocks, [`flist`] and [`flist_codec`] synthesize and encode the file
//! list, [`transfer`] streams file content, and [`tail`] closes out the
//! session. [`session`] wires all of that together behind one
//! `Session::run`-style entry point. [`mux`] is the framing layer every
//! phase after the argument block reads and writes through.

pub mod args;
pub mod filters;
pub mod flist;
pub mod flist_codec;
pub mod handshake;
pub mod mux;
pub mod session;
pub mod tail;
pub mod transfer;
pub mod transport;
pub mod varint;
