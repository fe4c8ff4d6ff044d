//! Wire types shared between the Payrail engine, its HTTP adapter and
//! webhook subscribers, plus the HMAC helpers used to sign and verify
//! webhook bodies.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod objects;
pub mod signature;
