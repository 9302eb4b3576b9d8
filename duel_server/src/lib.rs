// duel_server — two-player matchmaking and key-relay server.
//
// Clients connect over TCP, pick a character, wait for an opponent, then
// exchange per-tick key tokens that the server relays. The server never
// simulates the game; a key is an opaque string passed from one player to
// the other.
//
// Module overview:
// - `relay.rs`:    `InputQueue`, the bounded drop-oldest queue of one
//                  player's outgoing keys.
// - `room.rs`:     `Room` (the single two-slot registry behind one mutex)
//                  and `PlayerRecord` (per-player state readable without the
//                  room lock).
// - `session.rs`:  The per-connection state machine, its transition table,
//                  and the local/forwarding play modes.
// - `server.rs`:   TCP listener, thread-per-connection workers, opening-frame
//                  dispatch (admission vs. relay binding).
// - `client.rs`:   A blocking client used by the integration tests.
//
// Dependencies: `duel_protocol` (message types and framing), `tracing` for
// logs. The binary (`main.rs`) adds `clap` and `tracing-subscriber`.

pub mod client;
pub mod relay;
pub mod room;
pub mod server;
pub mod session;

pub use server::{ServerConfig, ServerHandle, start_server};
