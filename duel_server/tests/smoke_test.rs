// Integration smoke test for the duel server.
//
// Starts a server on localhost and drives it with plain TCP clients
// (`DuelClient`) through the full protocol: admission and roles, character
// selection, the readiness poll, key submission on the primary connections,
// and key relay on the relay channels (a channel bound to a name carries
// that player's keys). Also covers the refusal paths: a full room, an
// unknown or premature relay binding, and a malformed opening frame.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use duel_protocol::message::{ServerReply, StatusMessage};
use duel_protocol::types::{Character, Role, StatusCode};
use duel_server::client::{ClientError, DuelClient};
use duel_server::server::{ServerConfig, ServerHandle, start_server};
use duel_server::session::SessionState;

fn start() -> (ServerHandle, SocketAddr) {
    let config = ServerConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0, // OS picks a free port
        forward_interval: Duration::from_millis(20),
        ..ServerConfig::default()
    };
    start_server(config).unwrap()
}

/// Read relayed keys until `count` non-empty ones arrive.
fn collect_keys(client: &mut DuelClient, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut keys = Vec::new();
    while keys.len() < count {
        assert!(Instant::now() < deadline, "only got {keys:?}");
        let key = client.recv_key().unwrap();
        if !key.is_empty() {
            keys.push(key);
        }
    }
    keys
}

fn wait_for_state(handle: &ServerHandle, name: &str, state: SessionState) {
    let player = handle.room().lookup(name).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while player.state() != state {
        assert!(Instant::now() < deadline, "{name} never reached {state}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn full_match_lifecycle() {
    let (handle, addr) = start();

    // 1. Arrival order decides the roles.
    let (mut alice, role) = DuelClient::join(addr, "alice").unwrap();
    assert_eq!(role, Role::Host);
    let (mut bob, role) = DuelClient::join(addr, "bob").unwrap();
    assert_eq!(role, Role::Remote);
    assert_eq!(handle.room().occupancy(), 2);

    // 2. Alice selects and polls; Bob has not selected yet.
    let ack = alice.select("max").unwrap();
    assert_eq!(ack.code, StatusCode::Success);
    assert!(alice.poll_ready().unwrap().is_none());

    // 3. Bob selects; now both see each other.
    let ack = bob.select("drax").unwrap();
    assert_eq!(ack.code, StatusCode::Success);

    let opponent = alice.poll_ready().unwrap().expect("bob should be ready");
    assert_eq!(opponent.player, "bob");
    assert_eq!(opponent.character, "drax");
    assert_eq!(opponent.code, StatusCode::Success);

    let opponent = bob.poll_ready().unwrap().expect("alice should be ready");
    assert_eq!(opponent.player, "alice");
    assert_eq!(opponent.character, "max");

    wait_for_state(&handle, "alice", SessionState::Playing);
    wait_for_state(&handle, "bob", SessionState::Playing);
    let room = handle.room();
    assert_eq!(
        room.lookup("alice").unwrap().character(),
        Some(Character::Max)
    );

    // 4. Each player opens a relay channel named after the opponent. Play
    // is under way, so keys stream without a readiness round.
    let mut bobs_keys = DuelClient::bind(addr, "bob", "listen").unwrap();
    let mut alices_keys = DuelClient::bind(addr, "alice", "listen").unwrap();

    // Nothing queued yet: the relay sends explicit empty keys.
    assert_eq!(bobs_keys.recv_key().unwrap(), "");

    // 5. A channel bound to a name carries that player's own keys.
    for key in ["up", "up", "jump"] {
        bob.send_key(key).unwrap();
    }
    alice.send_key("left").unwrap();

    assert_eq!(collect_keys(&mut bobs_keys, 3), vec!["up", "up", "jump"]);
    assert_eq!(collect_keys(&mut alices_keys, 1), vec!["left"]);

    // Relay connections do not count as players.
    assert_eq!(handle.room().occupancy(), 2);

    handle.stop();
}

#[test]
fn third_player_is_turned_away() {
    let (handle, addr) = start();
    let (_alice, _) = DuelClient::join(addr, "alice").unwrap();
    let (_bob, _) = DuelClient::join(addr, "bob").unwrap();

    let mut carol = DuelClient::connect(addr).unwrap();
    carol
        .send(&duel_protocol::ConnectRequest {
            name: "carol".into(),
        })
        .unwrap();
    assert_eq!(
        carol.recv().unwrap(),
        ServerReply::Status(StatusMessage::too_many_players())
    );
    // The server closes the socket after refusing.
    assert!(matches!(carol.recv(), Err(ClientError::Io(_))));

    match DuelClient::join(addr, "dave") {
        Err(ClientError::Refused(status)) => assert_eq!(status.code, StatusCode::TooManyPlayers),
        Err(e) => panic!("expected refusal, got {e}"),
        Ok(_) => panic!("a third player was admitted"),
    }

    assert_eq!(handle.room().occupancy(), 2);
    assert!(handle.room().lookup("carol").is_err());
    handle.stop();
}

#[test]
fn disconnected_player_keeps_slot() {
    let (handle, addr) = start();
    let (alice, _) = DuelClient::join(addr, "alice").unwrap();
    drop(alice);
    let (_bob, role) = DuelClient::join(addr, "bob").unwrap();
    assert_eq!(role, Role::Remote);

    assert!(matches!(
        DuelClient::join(addr, "alice"),
        Err(ClientError::Refused(_))
    ));
    handle.stop();
}

#[test]
fn invalid_selection_is_reported_and_retryable() {
    let (handle, addr) = start();
    let (mut alice, _) = DuelClient::join(addr, "alice").unwrap();

    let reply = alice.select("").unwrap();
    assert_eq!(reply.code, StatusCode::SelectError);
    let reply = alice.select("DRAX").unwrap();
    assert_eq!(reply.code, StatusCode::SelectError);
    assert_eq!(handle.room().lookup("alice").unwrap().character(), None);

    let reply = alice.select("drax").unwrap();
    assert_eq!(reply.code, StatusCode::Success);
    assert!(alice.poll_ready().unwrap().is_none());
    handle.stop();
}

#[test]
fn relay_binding_for_unknown_player_is_refused() {
    let (handle, addr) = start();
    let mut ghost = DuelClient::bind(addr, "nobody", "listen").unwrap();
    match ghost.recv().unwrap() {
        ServerReply::Status(status) => {
            assert_eq!(status.code, StatusCode::InternalError);
            assert_eq!(status.status, "player not found");
        }
        other => panic!("expected status, got {other:?}"),
    }
    assert_eq!(handle.room().occupancy(), 0);
    handle.stop();
}

#[test]
fn relay_bound_before_play_polls_first() {
    let (handle, addr) = start();
    let (mut alice, _) = DuelClient::join(addr, "alice").unwrap();
    let (mut bob, _) = DuelClient::join(addr, "bob").unwrap();
    assert_eq!(alice.select("max").unwrap().code, StatusCode::Success);

    // Bob's channel for Alice's keys, opened while Bob is still selecting.
    let mut alices_keys = DuelClient::bind(addr, "alice", "listen").unwrap();
    let opponent = alices_keys.poll_ready().unwrap().expect("alice has selected");
    assert_eq!(opponent.player, "alice");
    assert_eq!(opponent.character, "max");

    assert_eq!(bob.select("drax").unwrap().code, StatusCode::Success);
    assert!(alice.poll_ready().unwrap().is_some());
    wait_for_state(&handle, "alice", SessionState::Playing);

    alice.send_key("up").unwrap();
    assert_eq!(collect_keys(&mut alices_keys, 1), vec!["up"]);
    handle.stop();
}

#[test]
fn relay_binding_before_room_is_full_is_not_ready() {
    let (handle, addr) = start();
    let (_alice, _) = DuelClient::join(addr, "alice").unwrap();

    let mut early = DuelClient::bind(addr, "alice", "listen").unwrap();
    assert_eq!(
        early.recv().unwrap(),
        ServerReply::Status(StatusMessage::not_ready())
    );
    assert!(matches!(early.recv(), Err(ClientError::Io(_))));
    assert_eq!(handle.room().occupancy(), 1);
    handle.stop();
}

#[test]
fn malformed_opening_frame_is_refused() {
    let (handle, addr) = start();
    let mut client = DuelClient::connect(addr).unwrap();
    client.send(&serde_json::json!({"hello": "world"})).unwrap();
    assert_eq!(
        client.recv().unwrap().code(),
        Some(StatusCode::InternalError)
    );
    assert_eq!(handle.room().occupancy(), 0);
    handle.stop();
}
