// TCP listener and connection dispatch for the duel server.
//
// Architecture: thread-per-connection over blocking `std::net` sockets.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts connections
//   and spawns one worker thread per connection. The listener is
//   non-blocking so it can notice `ServerHandle::stop`; any accept error
//   other than `WouldBlock`/`Interrupted` ends the listener and is returned
//   from `ServerHandle::wait`.
// - **Worker threads**: read the opening frame and dispatch on its shape:
//   - `{"name": ..}` asks for a seat. `Room::try_admit` decides; on success
//     the worker replies with `left` (host flag) and runs a local
//     `Session`. A full room gets `TooManyPlayers` and the socket is closed.
//   - `{"player": .., "action": ..}` opens a relay channel for the named
//     player's keys. The worker runs a forwarding `Session` on behalf of the
//     other occupant, so the channel drains the named player's input queue.
//
// Workers share only the `Room` (and, through it, the players' input
// queues). There is no session-to-session reference. A worker's failure ends
// that worker only.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use duel_protocol::framing::read_message;
use duel_protocol::message::{
    BindRequest, ConnectRequest, ConnectResponse, OpeningMessage, StatusMessage, send_message,
};
use duel_protocol::types::StatusCode;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::relay::DEFAULT_QUEUE_CAPACITY;
use crate::room::{Room, RoomError};
use crate::session::{Session, SessionOptions};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default pause between empty forwarding rounds.
pub const DEFAULT_FORWARD_INTERVAL: Duration = Duration::from_millis(500);

/// Default limit on how long a new connection may take to send its opening
/// frame.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<io::Result<()>>>,
    room: Arc<Room>,
}

impl ServerHandle {
    /// The room shared by all connections.
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Stop accepting connections and wait for the listener to exit.
    /// Established sessions run until their sockets close.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        let _ = self.join();
    }

    /// Block until the listener exits. Returns the accept error that stopped
    /// it, if any.
    pub fn wait(mut self) -> io::Result<()> {
        self.join()
    }

    fn join(&mut self) -> io::Result<()> {
        match self.thread.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::other("listener thread panicked"))?,
            None => Ok(()),
        }
    }
}

/// Configuration for starting a server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub queue_capacity: usize,
    pub forward_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            forward_interval: DEFAULT_FORWARD_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            forward_interval: self.forward_interval,
        }
    }
}

/// Bind the listener and start accepting on a background thread. Returns a
/// handle for stopping it and the actual bound address (useful when port 0
/// is used to let the OS pick a free port).
pub fn start_server(config: ServerConfig) -> io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind(SocketAddr::new(config.bind, config.port))?;
    let addr = listener.local_addr()?;
    // Non-blocking so the accept loop can check keep_running periodically.
    listener.set_nonblocking(true)?;

    let room = Arc::new(Room::new(config.queue_capacity));
    let keep_running = Arc::new(AtomicBool::new(true));

    let thread = {
        let room = room.clone();
        let keep_running = keep_running.clone();
        thread::spawn(move || accept_loop(listener, config, room, keep_running))
    };

    info!(%addr, "listening");
    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
            room,
        },
        addr,
    ))
}

/// Accept connections until stopped or until accept fails.
fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    room: Arc<Room>,
    keep_running: Arc<AtomicBool>,
) -> io::Result<()> {
    let config = Arc::new(config);
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let room = room.clone();
                let config = config.clone();
                thread::spawn(move || handle_connection(stream, peer, &room, &config));
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                error!(error = %e, "accept failed");
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Worker entry point: read the opening frame and run the matching session.
fn handle_connection(stream: TcpStream, peer: SocketAddr, room: &Arc<Room>, config: &ServerConfig) {
    let span = info_span!("conn", %peer);
    let _enter = span.enter();
    info!("connection established");

    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(config.handshake_timeout)))
    {
        warn!(error = %e, "failed to configure socket");
        return;
    }

    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to clone socket");
            return;
        }
    });
    let mut writer = BufWriter::new(stream);

    let opening = match read_message(&mut reader) {
        Ok(bytes) => {
            debug!(frame = %String::from_utf8_lossy(&bytes), "received");
            serde_json::from_slice::<OpeningMessage>(&bytes)
        }
        Err(e) => {
            info!(error = %e, "connection closed before opening frame");
            return;
        }
    };

    let opening = match opening {
        Ok(opening) => opening,
        Err(e) => {
            warn!(error = %e, "malformed opening frame");
            reply(
                &mut writer,
                &StatusMessage::new(StatusCode::InternalError, "malformed connect request"),
            );
            return;
        }
    };

    // Clear the handshake timeout for the long-lived session.
    if let Err(e) = reader.get_ref().set_read_timeout(None) {
        warn!(error = %e, "failed to clear read timeout");
        return;
    }

    match opening {
        OpeningMessage::Connect(request) => admit_player(reader, writer, room, config, request),
        OpeningMessage::Bind(request) => bind_forwarding(reader, writer, room, config, request),
    }
}

/// Admission path: seat a new player and run its local session.
fn admit_player(
    reader: BufReader<TcpStream>,
    mut writer: BufWriter<TcpStream>,
    room: &Arc<Room>,
    config: &ServerConfig,
    request: ConnectRequest,
) {
    let (player, role) = match room.try_admit(&request.name) {
        Ok(admitted) => admitted,
        Err(RoomError::Capacity) => {
            info!(player = %request.name, "room full, rejecting player");
            reply(&mut writer, &StatusMessage::too_many_players());
            return;
        }
        Err(e) => {
            warn!(player = %request.name, error = %e, "admission refused");
            reply(
                &mut writer,
                &StatusMessage::new(StatusCode::InternalError, e.to_string()),
            );
            return;
        }
    };

    info!(player = %request.name, %role, "player connected");
    if !reply(&mut writer, &ConnectResponse::connected(role.is_host())) {
        return;
    }

    let session = Session::local(
        reader,
        writer,
        room.clone(),
        player,
        config.session_options(),
    );
    let reason = session.run();
    info!(player = %request.name, reason = %reason, "session ended");
}

/// Relay-binding path: stream the named player's keys to the other
/// occupant's relay connection.
fn bind_forwarding(
    reader: BufReader<TcpStream>,
    mut writer: BufWriter<TcpStream>,
    room: &Arc<Room>,
    config: &ServerConfig,
    request: BindRequest,
) {
    let source = match room.lookup(&request.player) {
        Ok(source) => source,
        Err(e) => {
            warn!(player = %request.player, error = %e, "relay binding refused");
            reply(
                &mut writer,
                &StatusMessage::new(StatusCode::InternalError, "player not found"),
            );
            return;
        }
    };

    let Some(receiver) = room.other_occupant(source.identity()) else {
        info!(player = %request.player, "relay binding before the room is full");
        reply(&mut writer, &StatusMessage::not_ready());
        return;
    };

    info!(
        player = %request.player,
        receiver = receiver.identity(),
        action = %request.action,
        "relay channel bound"
    );
    let session = Session::forwarding(
        reader,
        writer,
        room.clone(),
        receiver,
        config.session_options(),
    );
    let reason = session.run();
    info!(player = %request.player, reason = %reason, "relay channel ended");
}

/// Best-effort write of a reply. Returns false if the write failed, in which
/// case the connection is simply dropped.
fn reply<W: Write, T: Serialize + std::fmt::Debug>(writer: &mut W, msg: &T) -> bool {
    debug!(message = ?msg, "sending");
    match send_message(writer, msg) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "failed to send reply");
            false
        }
    }
}
