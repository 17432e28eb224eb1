/*!
Rust implementation of the messenger core of the
[Tox protocol](https://zetok.github.io/tox-spec).

For each known peer ("friend") the core maintains identity, connection
lifecycle, presence and profile metadata, ordered in-band message delivery
with read receipts, and concurrent bidirectional file transfers. The
encrypted transport and the DHT/onion rendezvous are external collaborators
reached through the traits in [`net_crypto`]
(./toxcore/net_crypto/index.html) and [`friend_connection`]
(./toxcore/friend_connection/index.html).

Repo: https://github.com/tox-rs/tox
*/

#![cfg_attr(feature = "cargo-clippy", feature(plugin))]
#![cfg_attr(feature = "cargo-clippy", plugin(clippy))]

extern crate byteorder;
#[macro_use]
extern crate cookie_factory;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;
#[macro_use]
extern crate nom;
extern crate sodiumoxide;

#[cfg(test)]
extern crate env_logger;
#[cfg(test)]
extern crate quickcheck;

/** Core of the crate: identity, roster, messaging, file transfers and
state persistence.
*/
#[macro_use]
pub mod toxcore;
