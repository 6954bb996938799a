use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::element::{Element, ElementUpdate};
use crate::protocol::{Point, Presence, Viewport};
use crate::state::test_helpers;

/// One simulated connection: a connection id, its joined-board slot, and
/// the handle/receiver pair the socket loop would hold. Drives dispatch
/// directly, no socket.
struct TestClient {
    connection_id: Uuid,
    current_board: Option<Uuid>,
    handle: ClientHandle,
    rx: mpsc::Receiver<ServerMessage>,
}

impl TestClient {
    fn new() -> Self {
        Self::with_capacity(CLIENT_QUEUE_CAPACITY)
    }

    fn with_capacity(capacity: usize) -> Self {
        let (handle, rx) = test_helpers::client_handle(capacity);
        Self { connection_id: Uuid::new_v4(), current_board: None, handle, rx }
    }

    async fn send(&mut self, state: &AppState, msg: &ClientMessage) -> Vec<ServerMessage> {
        let text = serde_json::to_string(msg).unwrap();
        self.send_raw(state, &text).await
    }

    async fn send_raw(&mut self, state: &AppState, text: &str) -> Vec<ServerMessage> {
        process_inbound_text(state, &mut self.current_board, self.connection_id, &self.handle, text)
            .await
    }

    async fn join(&mut self, state: &AppState, board_id: Uuid) -> ServerMessage {
        let replies = self.send(state, &ClientMessage::JoinBoard { board_id }).await;
        only(replies)
    }

    async fn recv(&mut self) -> ServerMessage {
        timeout(Duration::from_millis(500), self.rx.recv())
            .await
            .expect("timed out waiting for a broadcast")
            .expect("event channel closed")
    }

    async fn assert_silent(&mut self) {
        let result = timeout(Duration::from_millis(50), self.rx.recv()).await;
        assert!(result.is_err(), "expected no broadcast, got {:?}", result.unwrap());
    }

    /// Mirror the socket loop's teardown: notify peers, then part.
    async fn disconnect(&mut self, state: &AppState) {
        if let Some(board_id) = self.current_board.take() {
            board::broadcast(
                state,
                board_id,
                &ServerMessage::ParticipantLeft { participant_id: self.connection_id },
                Some(self.connection_id),
            )
            .await;
            board::part_board(state, board_id, self.connection_id).await;
        }
    }
}

fn only(mut replies: Vec<ServerMessage>) -> ServerMessage {
    assert_eq!(replies.len(), 1, "expected exactly one reply, got {replies:?}");
    replies.remove(0)
}

// =============================================================================
// JOIN
// =============================================================================

#[tokio::test]
async fn join_replies_with_a_full_snapshot() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();

    let reply = client.join(&state, board_id).await;
    let ServerMessage::BoardData { participant_id, elements, participants, viewport } = reply
    else {
        panic!("expected board-data, got {reply:?}");
    };
    assert_eq!(participant_id, client.connection_id);
    assert!(elements.is_empty());
    assert_eq!(participants[&client.connection_id].display_name, "User1");
    assert_eq!(viewport, Viewport::default());
    assert_eq!(client.current_board, Some(board_id));
}

#[tokio::test]
async fn join_notifies_peers_but_not_the_joiner() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut first = TestClient::new();
    let mut second = TestClient::new();

    first.join(&state, board_id).await;
    let reply = second.join(&state, board_id).await;

    let event = first.recv().await;
    let ServerMessage::ParticipantJoined { participant_id, presence } = event else {
        panic!("expected participant-joined, got {event:?}");
    };
    assert_eq!(participant_id, second.connection_id);
    assert_eq!(presence, Presence { display_name: "User2".into(), cursor: Point::default() });

    // The joiner's snapshot already lists both participants; it gets no
    // participant-joined for itself.
    let ServerMessage::BoardData { participants, .. } = reply else {
        panic!("expected board-data");
    };
    assert_eq!(participants.len(), 2);
    second.assert_silent().await;
}

#[tokio::test]
async fn join_hydrates_the_stored_snapshot() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    state
        .store
        .save(board_id, &[test_helpers::rectangle(1)], time::OffsetDateTime::now_utc())
        .await
        .unwrap();

    let mut client = TestClient::new();
    let ServerMessage::BoardData { elements, .. } = client.join(&state, board_id).await else {
        panic!("expected board-data");
    };
    assert_eq!(elements, vec![test_helpers::rectangle(1)]);
}

#[tokio::test]
async fn rejoin_parts_the_previous_board() {
    let state = test_helpers::memory_app_state();
    let board_a = Uuid::new_v4();
    let board_b = Uuid::new_v4();
    let mut mover = TestClient::new();
    let mut stayer = TestClient::new();

    mover.join(&state, board_a).await;
    stayer.join(&state, board_a).await;
    mover.recv().await; // participant-joined for stayer

    mover.join(&state, board_b).await;

    let event = stayer.recv().await;
    assert_eq!(event, ServerMessage::ParticipantLeft { participant_id: mover.connection_id });

    let boards = state.boards.read().await;
    assert!(!boards.get(&board_a).unwrap().clients.contains_key(&mover.connection_id));
    assert!(boards.get(&board_b).unwrap().clients.contains_key(&mover.connection_id));
}

// =============================================================================
// GUARDS
// =============================================================================

#[tokio::test]
async fn invalid_json_is_dropped_without_teardown() {
    let state = test_helpers::memory_app_state();
    let mut client = TestClient::new();

    assert!(client.send_raw(&state, "{not json").await.is_empty());
    assert!(client.send_raw(&state, r#"{"event": "board-explode"}"#).await.is_empty());

    // The connection is still usable afterwards.
    let board_id = Uuid::new_v4();
    let reply = client.join(&state, board_id).await;
    assert!(matches!(reply, ServerMessage::BoardData { .. }));
}

#[tokio::test]
async fn events_before_join_are_dropped() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();

    let replies = client
        .send(
            &state,
            &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) },
        )
        .await;
    assert!(replies.is_empty());

    // No session materialized as a side effect.
    let boards = state.boards.read().await;
    assert!(!boards.contains_key(&board_id));
}

#[tokio::test]
async fn events_for_an_unjoined_board_are_dropped() {
    let state = test_helpers::memory_app_state();
    let joined = Uuid::new_v4();
    let other = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();

    client.join(&state, joined).await;
    peer.join(&state, joined).await;
    client.recv().await; // participant-joined for peer

    client
        .send(
            &state,
            &ClientMessage::ElementCreate { board_id: other, element: test_helpers::rectangle(1) },
        )
        .await;

    peer.assert_silent().await;
    let boards = state.boards.read().await;
    assert!(boards.get(&joined).unwrap().elements.is_empty());
    assert!(!boards.contains_key(&other));
}

#[tokio::test]
async fn duplicate_create_is_not_rebroadcast() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();
    client.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    client.recv().await;

    let create =
        ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) };
    client.send(&state, &create).await;
    assert_eq!(
        peer.recv().await,
        ServerMessage::ElementCreated { element: test_helpers::rectangle(1) }
    );

    // Replay of the same id is dropped at the session, so peers see nothing.
    client.send(&state, &create).await;
    peer.assert_silent().await;
}

#[tokio::test]
async fn update_for_a_deleted_element_is_not_rebroadcast() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();
    client.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    client.recv().await;

    let updates = ElementUpdate { x: Some(99.0), ..ElementUpdate::default() };
    client
        .send(&state, &ClientMessage::ElementUpdate { board_id, element_id: 7, updates })
        .await;
    peer.assert_silent().await;
}

// =============================================================================
// DELTAS
// =============================================================================

#[tokio::test]
async fn cursor_move_reaches_peers_but_not_the_sender() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();
    client.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    client.recv().await;

    let cursor = Point { x: 42.0, y: 17.0 };
    client.send(&state, &ClientMessage::CursorMove { board_id, cursor }).await;

    assert_eq!(
        peer.recv().await,
        ServerMessage::CursorMoved { participant_id: client.connection_id, cursor }
    );
    client.assert_silent().await;

    let boards = state.boards.read().await;
    let presence = &boards.get(&board_id).unwrap().participants[&client.connection_id];
    assert_eq!(presence.cursor, cursor);
}

#[tokio::test]
async fn viewport_change_excludes_the_originator() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();
    client.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    client.recv().await;

    let viewport = Viewport { x: 120.0, y: -40.0, zoom: 2.0 };
    client.send(&state, &ClientMessage::ViewportChange { board_id, viewport }).await;

    assert_eq!(
        peer.recv().await,
        ServerMessage::ViewportChanged { participant_id: client.connection_id, viewport }
    );
    client.assert_silent().await;

    let boards = state.boards.read().await;
    assert_eq!(boards.get(&board_id).unwrap().viewport, viewport);
}

#[tokio::test]
async fn delete_broadcasts_once_and_replays_silently() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut client = TestClient::new();
    let mut peer = TestClient::new();
    client.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    client.recv().await;

    client
        .send(
            &state,
            &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) },
        )
        .await;
    peer.recv().await;

    let delete = ClientMessage::ElementDelete { board_id, element_id: 1 };
    client.send(&state, &delete).await;
    assert_eq!(peer.recv().await, ServerMessage::ElementDeleted { element_id: 1 });

    client.send(&state, &delete).await;
    peer.assert_silent().await;
}

#[tokio::test]
async fn evicted_connection_is_signaled_and_stops_mutating() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    // The laggard's queue holds one event and is never drained.
    let mut laggard = TestClient::with_capacity(1);
    let mut peer = TestClient::new();
    laggard.join(&state, board_id).await;
    peer.join(&state, board_id).await;
    // participant-joined for the peer fills the laggard's queue.

    // The next structural delta overflows it, which evicts the laggard.
    peer.send(
        &state,
        &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) },
    )
    .await;

    // The dispatch side still holds its own sender, so the channel cannot
    // close; the socket loop must be woken through the shutdown signal.
    assert!(
        timeout(Duration::from_millis(50), laggard.handle.shutdown.notified()).await.is_ok(),
        "eviction should wake the socket task"
    );
    {
        let boards = state.boards.read().await;
        assert!(!boards.get(&board_id).unwrap().clients.contains_key(&laggard.connection_id));
    }

    // It saw the last event it had room for and none of the missed deltas.
    assert!(matches!(laggard.recv().await, ServerMessage::ParticipantJoined { .. }));
    laggard.assert_silent().await;

    // The woken socket task tears down exactly as on a client close: peers
    // get one participant-left, and further events from the connection are
    // dropped before dispatch.
    laggard.disconnect(&state).await;
    assert_eq!(
        peer.recv().await,
        ServerMessage::ParticipantLeft { participant_id: laggard.connection_id }
    );

    let replies = laggard
        .send(
            &state,
            &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(3) },
        )
        .await;
    assert!(replies.is_empty());
    peer.assert_silent().await;
    let boards = state.boards.read().await;
    let session = boards.get(&board_id).unwrap();
    assert!(!session.contains_element(3));
    assert_eq!(session.elements.len(), 1);
}

// =============================================================================
// FULL SESSION
// =============================================================================

#[tokio::test]
async fn two_client_session_syncs_edits_and_persists_on_exit() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();
    let mut alice = TestClient::new();
    let mut bob = TestClient::new();

    alice.join(&state, board_id).await;
    bob.join(&state, board_id).await;
    alice.recv().await; // bob joined

    // Alice draws; bob sees the identical element.
    alice
        .send(
            &state,
            &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) },
        )
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::ElementCreated { element: test_helpers::rectangle(1) }
    );

    // Bob drags it; alice receives only the changed fields.
    let drag = ElementUpdate { x: Some(20.0), y: Some(20.0), ..ElementUpdate::default() };
    bob.send(
        &state,
        &ClientMessage::ElementUpdate { board_id, element_id: 1, updates: drag.clone() },
    )
    .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::ElementUpdated { element_id: 1, updates: drag }
    );

    // Alice leaves; bob is told. Bob leaves; the session flushes and evicts.
    alice.disconnect(&state).await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::ParticipantLeft { participant_id: alice.connection_id }
    );
    bob.disconnect(&state).await;

    {
        let boards = state.boards.read().await;
        assert!(boards.is_empty());
    }

    // A later participant gets the merged final state back from the store.
    let mut carol = TestClient::new();
    let ServerMessage::BoardData { elements, participants, .. } =
        carol.join(&state, board_id).await
    else {
        panic!("expected board-data");
    };
    assert_eq!(elements.len(), 1);
    let Element::Rectangle(shape) = &elements[0] else {
        panic!("expected the rectangle to survive");
    };
    assert!((shape.x - 20.0).abs() < f64::EPSILON);
    assert!((shape.y - 20.0).abs() < f64::EPSILON);
    assert!((shape.width - 50.0).abs() < f64::EPSILON);
    // Fresh session, fresh name counter.
    assert_eq!(participants[&carol.connection_id].display_name, "User1");
}

// =============================================================================
// END TO END
// =============================================================================

type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn ws_send(socket: &mut WsClient, msg: &ClientMessage) {
    use futures::SinkExt;
    let text = serde_json::to_string(msg).unwrap();
    socket
        .send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
        .await
        .expect("ws send failed");
}

async fn ws_recv(socket: &mut WsClient) -> ServerMessage {
    use futures::StreamExt;
    loop {
        let msg = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("socket closed")
            .expect("ws error");
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("valid server event");
        }
    }
}

#[tokio::test]
async fn end_to_end_over_a_real_socket() {
    let state = test_helpers::memory_app_state();
    let board_id = Uuid::new_v4();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = crate::routes::app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = format!("ws://{addr}/api/ws");
    let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    ws_send(&mut alice, &ClientMessage::JoinBoard { board_id }).await;
    let ServerMessage::BoardData { elements, .. } = ws_recv(&mut alice).await else {
        panic!("expected board-data");
    };
    assert!(elements.is_empty());

    let (mut bob, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    ws_send(&mut bob, &ClientMessage::JoinBoard { board_id }).await;
    let ServerMessage::BoardData { participants, .. } = ws_recv(&mut bob).await else {
        panic!("expected board-data");
    };
    assert_eq!(participants.len(), 2);
    assert!(matches!(ws_recv(&mut alice).await, ServerMessage::ParticipantJoined { .. }));

    ws_send(
        &mut alice,
        &ClientMessage::ElementCreate { board_id, element: test_helpers::rectangle(1) },
    )
    .await;
    assert_eq!(
        ws_recv(&mut bob).await,
        ServerMessage::ElementCreated { element: test_helpers::rectangle(1) }
    );

    let drag = ElementUpdate { x: Some(20.0), y: Some(20.0), ..ElementUpdate::default() };
    ws_send(
        &mut bob,
        &ClientMessage::ElementUpdate { board_id, element_id: 1, updates: drag.clone() },
    )
    .await;
    assert_eq!(
        ws_recv(&mut alice).await,
        ServerMessage::ElementUpdated { element_id: 1, updates: drag }
    );

    alice.close(None).await.unwrap();
    assert!(matches!(ws_recv(&mut bob).await, ServerMessage::ParticipantLeft { .. }));
    bob.close(None).await.unwrap();

    // Disconnect handling is asynchronous; poll for the eviction flush.
    let mut record = None;
    for _ in 0..100 {
        record = state.store.load(board_id).await.unwrap();
        if record.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let record = record.expect("final state flushed on last disconnect");
    assert_eq!(record.elements.len(), 1);
    let Element::Rectangle(shape) = &record.elements[0] else {
        panic!("expected the rectangle");
    };
    assert!((shape.x - 20.0).abs() < f64::EPSILON);
}
