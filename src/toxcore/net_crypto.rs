/*! Interface to the encrypted transport.

The messenger core never talks to the network itself. It multiplexes every
friend over authenticated packet connections provided by the `net_crypto`
subsystem, referenced here only through the [`NetCrypto`]
(./trait.NetCrypto.html) trait. Connections are identified by opaque ids
handed out by the friend-connection subsystem.
*/

use toxcore::crypto_core::PublicKey;
use toxcore::packed_node::TcpUdpPackedNode;
use toxcore::toxid::NoSpam;

/// Maximum payload the transport accepts in a single reliable or lossy
/// packet.
pub const MAX_CRYPTO_DATA_SIZE: usize = 1373;

/// Minimum length of the transport send queue per connection.
pub const CRYPTO_MIN_QUEUE_LENGTH: usize = 64;

/// Errors of sending a packet over the encrypted transport.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Fail)]
pub enum CryptoError {
    /// The bounded send queue of the connection has no room left.
    #[fail(display = "Connection send queue is full")]
    QueueFull,
    /// The connection id does not refer to an established connection.
    #[fail(display = "No such crypto connection")]
    NoConnection,
}

/** The encrypted transport the messenger runs on.

Implementations provide authenticated packet connections keyed by a
per-peer public key, with a bounded send queue, a free-slot counter and a
"max speed reached" congestion flag. All operations are non-blocking.
*/
pub trait NetCrypto {
    /// Our long-term `PublicKey`.
    fn self_public_key(&self) -> PublicKey;

    /// Current own `NoSpam`.
    fn nospam(&self) -> NoSpam;

    /// Replace own `NoSpam`, invalidating previously distributed
    /// addresses.
    fn set_nospam(&mut self, nospam: NoSpam);

    /** Queue a reliable packet on the connection.

    `congestion_control` marks bulk traffic (file data) that must yield to
    interactive packets. Returns the transport packet number used later to
    confirm the delivery via [`cryptpacket_received`]
    (#tymethod.cryptpacket_received).
    */
    fn write_cryptpacket(&mut self, conn_id: usize, packet: &[u8], congestion_control: bool)
        -> Result<u32, CryptoError>;

    /// Check whether the packet with the given number has been
    /// acknowledged by the other side.
    fn cryptpacket_received(&self, conn_id: usize, packet_num: u32) -> bool;

    /// Number of free slots in the send queue of the connection.
    fn num_free_sendqueue_slots(&self, conn_id: usize) -> usize;

    /// Whether the congestion control of the connection refuses more bulk
    /// data for now.
    fn max_speed_reached(&self, conn_id: usize) -> bool;

    /// Send a lossy (fire and forget) packet on the connection.
    fn send_lossy_cryptpacket(&mut self, conn_id: usize, packet: &[u8]) -> Result<(), CryptoError>;

    /// `(direct_connected, num_online_relays)` of the connection.
    fn crypto_connection_status(&self, conn_id: usize) -> (bool, u32);

    /// Hand a cached TCP relay to the transport.
    fn add_tcp_relay(&mut self, node: &TcpUdpPackedNode);

    /// Relays the transport is currently connected to, at most `max` of
    /// them. Used when saving state.
    fn connected_tcp_relays(&self, max: usize) -> Vec<TcpUdpPackedNode>;

    /// Time in milliseconds until the transport wants to run again.
    fn run_interval(&self) -> u64;

    /// Transport housekeeping, called once per messenger tick.
    fn poll(&mut self);
}
