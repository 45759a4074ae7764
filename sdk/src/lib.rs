//! # SignBridge SDK
//!
//! Implementation of the web HSM signing protocol: the native-messaging
//! frame codec, request validation and normalization, the per-object
//! signing pipeline, the HTTP download/upload/callback client, and the
//! PKCS#11 token stack.
//!
//! The host binary (`signbridge-host`) wires these pieces to stdio and
//! the operator console; everything in this crate is usable, and
//! tested, without a browser or token hardware.

pub mod conf;
pub mod engine;
pub mod framing;
pub mod net;
pub mod protocol;
pub mod sign;
pub mod token;

#[cfg(test)]
pub(crate) mod test_support;
