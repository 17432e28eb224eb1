/*! Tox messenger core modules
*/

#[macro_use]
pub mod binary_io;
pub mod crypto_core;
pub mod time;
pub mod toxid;
pub mod packed_node;
pub mod net_crypto;
pub mod friend_connection;
pub mod messenger;
pub mod state_format;
