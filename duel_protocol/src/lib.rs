// duel_protocol — wire protocol for the two-player duel server.
//
// This crate defines the message shapes, value types, and framing used by
// the server (`duel_server`) and by clients to talk over TCP. It is shared by
// both sides and knows nothing about rooms or sessions.
//
// Module overview:
// - `types.rs`:    `Character`, `StatusCode`, `Role`, and the selection error.
// - `message.rs`:  One struct per message shape, the untagged `OpeningMessage`
//                  and `ServerReply` enums, and JSON send/receive helpers.
// - `framing.rs`:  Newline-delimited framing over any `BufRead`/`Write`.
//
// Design decisions:
// - **Flat JSON objects, no type tag.** Field names are the contract with
//   existing clients; shapes are told apart by which fields are present.
// - **Input tokens are opaque strings.** The server never interprets a key.
// - **No async runtime.** Uses `std::io` traits, compatible with blocking TCP
//   streams and buffered wrappers.

pub mod framing;
pub mod message;
pub mod types;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{
    BindRequest, ConnectRequest, ConnectResponse, KeyMessage, OpeningMessage, SelectRequest,
    SelectResponse, ServerReply, StatusMessage, recv_message, send_message,
};
pub use types::{Character, Role, SelectionError, StatusCode, character_label};
