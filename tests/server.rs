mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{Call, FakeFactory};
use wolfconf::peer::{Command, Participant, ParticipantEvent, SignalClient};
use wolfconf::signal::{ClientMessage, ServerMessage};
use wolfconf::{build_router, AppState, ParticipantConfig};

async fn spawn_hub() -> SocketAddr {
    spawn_hub_with(AppState::default()).await
}

async fn spawn_hub_with(state: AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    addr
}

async fn next(client: &mut SignalClient) -> ServerMessage {
    timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("connection closed")
}

async fn connect(addr: SocketAddr, path: &str) -> (SignalClient, String) {
    let mut client = SignalClient::connect(&format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    match next(&mut client).await {
        ServerMessage::Welcome { client_id, .. } => (client, client_id),
        other => panic!("expected welcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_join_and_targeted_relay_over_websocket() {
    let addr = spawn_hub().await;

    let (mut a, a_id) = connect(addr, "/ws").await;
    a.send(ClientMessage::Join {
        room: "r1".to_string(),
    })
    .unwrap();
    assert_eq!(
        next(&mut a).await,
        ServerMessage::RoomMembers {
            room: "r1".to_string(),
            members: vec![],
        }
    );

    let (mut b, b_id) = connect(addr, "/ws").await;
    assert_ne!(a_id, b_id);
    b.send(ClientMessage::Join {
        room: "r1".to_string(),
    })
    .unwrap();
    assert_eq!(
        next(&mut b).await,
        ServerMessage::RoomMembers {
            room: "r1".to_string(),
            members: vec![a_id.clone()],
        }
    );
    assert_eq!(
        next(&mut a).await,
        ServerMessage::PeerJoined {
            room: "r1".to_string(),
            peer_id: b_id.clone(),
        }
    );

    let description = json!({ "type": "offer", "sdp": "v=0" });
    a.send(ClientMessage::Offer {
        room: None,
        target: Some(b_id.clone()),
        description: description.clone(),
    })
    .unwrap();
    assert_eq!(
        next(&mut b).await,
        ServerMessage::Offer {
            from: a_id.clone(),
            description,
        }
    );

    // joining through the path puts the client straight into the room
    let (mut c, c_id) = connect(addr, "/ws/r1").await;
    assert_eq!(
        next(&mut c).await,
        ServerMessage::RoomMembers {
            room: "r1".to_string(),
            members: vec![a_id.clone(), b_id.clone()],
        }
    );
    for client in [&mut a, &mut b] {
        assert_eq!(
            next(client).await,
            ServerMessage::PeerJoined {
                room: "r1".to_string(),
                peer_id: c_id.clone(),
            }
        );
    }

    drop(b);
    for client in [&mut a, &mut c] {
        assert_eq!(
            next(client).await,
            ServerMessage::PeerLeft {
                room: "r1".to_string(),
                peer_id: b_id.clone(),
            }
        );
    }
}

#[tokio::test]
async fn test_bad_frames_get_error_replies() {
    let addr = spawn_hub().await;
    let (mut a, _) = connect(addr, "/ws").await;

    a.send(ClientMessage::Join {
        room: String::new(),
    })
    .unwrap();
    assert!(matches!(next(&mut a).await, ServerMessage::Error { .. }));

    // relays outside a room go nowhere and the socket stays usable
    a.send(ClientMessage::IceCandidate {
        room: None,
        target: None,
        candidate: json!({ "candidate": "c1" }),
    })
    .unwrap();
    a.send(ClientMessage::Join {
        room: "r2".to_string(),
    })
    .unwrap();
    assert!(matches!(
        next(&mut a).await,
        ServerMessage::RoomMembers { members, .. } if members.is_empty()
    ));
}

async fn wait_for(factory: &FakeFactory, peer: &str, check: impl Fn(&[Call]) -> bool) {
    timeout(Duration::from_secs(5), async {
        loop {
            if check(&factory.calls(peer)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("negotiation did not complete");
}

struct Running {
    id: String,
    factory: Arc<FakeFactory>,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<ParticipantEvent>,
}

/// Connect a participant to `path` and run it until welcomed
async fn start_participant(addr: SocketAddr, path: &str, name: &str) -> Running {
    let client = SignalClient::connect(&format!("ws://{}{}", addr, path))
        .await
        .unwrap();
    let (outbound, inbound) = client.split();
    let factory = FakeFactory::new(name);
    let (participant, mut events) =
        Participant::new(ParticipantConfig::default(), factory.clone(), outbound);
    let (commands, cmd_rx) = mpsc::unbounded_channel();
    tokio::spawn(participant.run(inbound, cmd_rx));

    let id = match next_event(&mut events).await {
        ParticipantEvent::Welcomed { client_id, .. } => client_id,
        other => panic!("expected welcome, got {:?}", other),
    };
    Running {
        id,
        factory,
        commands,
        events,
    }
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ParticipantEvent>) -> ParticipantEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("participant stopped")
}

fn answer_applied(calls: &[Call]) -> bool {
    calls
        .iter()
        .any(|c| matches!(c, Call::SetRemote(sdp) if sdp.starts_with("answer")))
}

#[tokio::test]
async fn test_participants_negotiate_through_hub() {
    let addr = spawn_hub().await;

    let mut a = start_participant(addr, "/ws", "A").await;
    a.commands.send(Command::Join("r1".to_string())).unwrap();
    // A must be in the room before B arrives
    match next_event(&mut a.events).await {
        ParticipantEvent::Joined { room, .. } => assert_eq!(room, "r1"),
        other => panic!("expected joined, got {:?}", other),
    }
    let mut b = start_participant(addr, "/ws", "B").await;
    b.commands.send(Command::Join("r1".to_string())).unwrap();

    // A offered, B answered, A applied the answer
    wait_for(&a.factory, &b.id, answer_applied).await;
    wait_for(&b.factory, &a.id, |calls| {
        calls.iter().any(|c| matches!(c, Call::CreateAnswer(_)))
            && calls.iter().any(|c| matches!(c, Call::AddCandidate(_)))
    })
    .await;
    assert_eq!(
        next_event(&mut a.events).await,
        ParticipantEvent::PeerJoined(b.id.clone())
    );

    b.commands.send(Command::Leave).unwrap();
    assert_eq!(
        next_event(&mut a.events).await,
        ParticipantEvent::PeerLeft(b.id.clone())
    );
    wait_for(&a.factory, &b.id, |calls| calls.last() == Some(&Call::Close)).await;
}

#[tokio::test]
async fn test_participant_placed_in_room_by_path_negotiates() {
    let addr = spawn_hub().await;

    let mut a = start_participant(addr, "/ws", "A").await;
    a.commands.send(Command::Join("r1".to_string())).unwrap();
    assert!(matches!(
        next_event(&mut a.events).await,
        ParticipantEvent::Joined { .. }
    ));

    // no join command: the hub put B into r1
    let mut b = start_participant(addr, "/ws/r1", "B").await;
    assert_eq!(
        next_event(&mut b.events).await,
        ParticipantEvent::Joined {
            room: "r1".to_string(),
            members: vec![a.id.clone()],
        }
    );

    wait_for(&a.factory, &b.id, answer_applied).await;
    wait_for(&b.factory, &a.id, |calls| {
        calls.iter().any(|c| matches!(c, Call::CreateAnswer(_)))
    })
    .await;

    // and leaving works without an explicit join
    b.commands.send(Command::Leave).unwrap();
    assert_eq!(
        next_event(&mut a.events).await,
        ParticipantEvent::PeerJoined(b.id.clone())
    );
    assert_eq!(
        next_event(&mut a.events).await,
        ParticipantEvent::PeerLeft(b.id.clone())
    );
}

#[tokio::test]
async fn test_socket_closes_when_hub_drops_client() {
    let state = AppState::default();
    let addr = spawn_hub_with(state.clone()).await;
    let (mut a, a_id) = connect(addr, "/ws").await;

    state.hub.write().await.disconnect(&a_id);

    let closed = timeout(Duration::from_secs(5), a.recv())
        .await
        .expect("socket stayed open after disconnect");
    assert!(closed.is_none());
    assert_eq!(state.hub.read().await.client_count(), 0);
}
