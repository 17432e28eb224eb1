/*! Interface to the friend-connection subsystem.

The subsystem behind this trait owns DHT/onion rendezvous and the TCP
relay fallback. It produces and destroys per-peer crypto connections and
reports connectivity transitions back into the messenger through
[`Messenger::handle_connection_status`]
(../messenger/struct.Messenger.html#method.handle_connection_status),
[`Messenger::handle_packet`]
(../messenger/struct.Messenger.html#method.handle_packet) and
[`Messenger::handle_lossy_packet`]
(../messenger/struct.Messenger.html#method.handle_lossy_packet), routed by
the `(friend, device)` pair registered with [`set_callbacks`]
(./trait.FriendConnections.html#tymethod.set_callbacks).
*/

use toxcore::crypto_core::PublicKey;
use toxcore::toxid::NoSpam;

/// Overall connectivity of a connection or of the whole core.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionKind {
    /// Not connected.
    None,
    /// Connected over a TCP relay.
    Tcp,
    /// Connected directly over UDP.
    Udp,
    /// Connected, path currently unknown.
    Unknown,
}

/// Errors of friend-connection operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum ConnectionError {
    /// The subsystem could not allocate a new connection.
    #[fail(display = "Failed to allocate a friend connection")]
    NoMem,
    /// The handle does not refer to a live connection.
    #[fail(display = "No such friend connection")]
    NoConnection,
    /// The packet could not be sent right now.
    #[fail(display = "Failed to send packet over friend connection")]
    SendFailed,
}

/** Per-peer connection pool of the rendezvous subsystem.
*/
pub trait FriendConnections {
    /// Create (or refcount) a connection to the peer with the given key.
    /// Returns an opaque handle.
    fn new_connection(&mut self, real_pk: &PublicKey) -> Result<usize, ConnectionError>;

    /// Drop the connection behind the handle.
    fn kill_connection(&mut self, conn: usize);

    /// Whether the connection is currently established.
    fn is_connected(&self, conn: usize) -> bool;

    /// Id of the underlying crypto connection, for use with
    /// [`NetCrypto`](../net_crypto/trait.NetCrypto.html).
    fn crypt_connection_id(&self, conn: usize) -> usize;

    /** Register which `(friend, device)` of the messenger the events of
    this connection should be routed to, or unregister with `None`.
    */
    fn set_callbacks(&mut self, conn: usize, target: Option<(u32, u32)>);

    /// Send a friend request over the connection.
    fn send_request_packet(&mut self, conn: usize, nospam: NoSpam, message: &[u8])
        -> Result<(), ConnectionError>;

    /// Connectivity of the onion client; drives the core connection
    /// callback.
    fn onion_connection_status(&self) -> ConnectionKind;

    /// Subsystem housekeeping, called once per messenger tick.
    fn poll(&mut self);
}
