use super::*;
use crate::frame::Status;
use crate::services::room::SAVE_STATUS_SYSCALL;
use crate::state::test_helpers;
use serde_json::json;
use tokio::time::{Duration, Instant, timeout, timeout_at};

fn request_text(syscall: &str, data: serde_json::Value) -> String {
    let data: Data = serde_json::from_value(data).expect("data must be an object");
    serde_json::to_string(&Frame::request(syscall, data)).expect("frame should encode")
}

fn create_block(id: &str, parent: Option<&str>) -> String {
    request_text(
        "mutation:createBlock",
        json!({
            "id": id,
            "location": {"x": 0, "y": 0, "width": 100, "height": 100},
            "parentBlockId": parent,
        }),
    )
}

/// Next room frame that is not a save-status push.
async fn recv_board_broadcast(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    loop {
        let frame = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("broadcast receive timed out")
            .expect("broadcast channel closed unexpectedly");
        if frame.syscall != SAVE_STATUS_SYSCALL {
            return frame;
        }
    }
}

async fn assert_no_board_broadcast(rx: &mut mpsc::Receiver<Frame>) {
    let deadline = Instant::now() + Duration::from_millis(80);
    loop {
        match timeout_at(deadline, rx.recv()).await {
            Err(_) => return,
            Ok(Some(frame)) if frame.syscall == SAVE_STATUS_SYSCALL => {}
            Ok(other) => panic!("expected no broadcast frame, got {other:?}"),
        }
    }
}

struct Client {
    id: Uuid,
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    board: Option<BoardId>,
}

impl Client {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self { id: Uuid::new_v4(), tx, rx, board: None }
    }

    async fn send(&mut self, state: &AppState, text: &str) -> Vec<Frame> {
        process_inbound_text(state, &mut self.board, self.id, &self.tx, text).await
    }

    async fn join(&mut self, state: &AppState, board_id: &str) -> Frame {
        let mut replies = self.send(state, &request_text("board:join", json!({"boardId": board_id}))).await;
        assert_eq!(replies.len(), 1);
        replies.remove(0)
    }
}

/// Two clients joined to `plan`, with join notifications drained.
async fn two_clients(state: &AppState) -> (Client, Client) {
    let mut a = Client::new();
    let mut b = Client::new();
    a.join(state, "plan").await;
    b.join(state, "plan").await;
    assert_eq!(recv_board_broadcast(&mut a.rx).await.syscall, "board:joined");
    (a, b)
}

#[tokio::test]
async fn invalid_json_returns_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let mut client = Client::new();

    let reply = client.send(&state, "{not json").await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].status, Status::Error);
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BAD_REQUEST)));
}

#[tokio::test]
async fn board_join_requires_board_id() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let mut client = Client::new();

    let reply = client.send(&state, &request_text("board:join", json!({}))).await;
    assert_eq!(reply[0].syscall, "board:join");
    assert_eq!(reply[0].status, Status::Error);
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BAD_REQUEST)));

    let reply = client.send(&state, &request_text("board:join", json!({"boardId": "../etc"}))).await;
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BAD_REQUEST)));
    assert_eq!(reply[0].data["kind"], json!("E_INVALID_BOARD_ID"));
    assert!(client.board.is_none());
}

#[tokio::test]
async fn unknown_prefix_and_board_op_return_errors() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let mut client = Client::new();

    let reply = client.send(&state, &request_text("cursor:moved", json!({}))).await;
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BAD_REQUEST)));

    let reply = client.send(&state, &request_text("board:rename", json!({}))).await;
    assert!(reply[0].data["message"].as_str().unwrap_or_default().contains("unknown board op"));
}

#[tokio::test]
async fn mutation_requires_joined_board() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let mut client = Client::new();

    let reply = client.send(&state, &create_block("a", None)).await;
    assert_eq!(reply[0].status, Status::Error);
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BOARD_UNAVAILABLE)));
}

#[tokio::test]
async fn join_replies_with_snapshot_and_notifies_peers() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let mut a = Client::new();
    let mut b = Client::new();

    let reply = a.join(&state, "plan").await;
    assert_eq!(reply.status, Status::Done);
    assert_eq!(reply.data["saveStatus"], json!("clean"));
    assert_eq!(reply.data["members"], json!(1));
    assert!(reply.data["board"]["blocks"].as_object().is_some_and(serde_json::Map::is_empty));
    assert_eq!(a.board.as_deref(), Some("plan"));

    let reply = b.join(&state, "plan").await;
    assert_eq!(reply.data["members"], json!(2));

    let joined = recv_board_broadcast(&mut a.rx).await;
    assert_eq!(joined.syscall, "board:joined");
    assert_eq!(joined.status, Status::Request);
    assert_eq!(joined.data["clientId"], json!(b.id));
    assert_no_board_broadcast(&mut b.rx).await;
}

#[tokio::test]
async fn create_block_confirms_to_sender_and_notifies_peer() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;

    let reply = a.send(&state, &create_block("x", None)).await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].status, Status::Done);
    assert_eq!(reply[0].syscall, "mutation:createBlock");
    assert_eq!(reply[0].data["block"]["id"], json!("x"));

    let notif = recv_board_broadcast(&mut b.rx).await;
    assert_eq!(notif.syscall, "mutation:createBlock");
    assert_eq!(notif.from.as_deref(), Some(a.id.to_string().as_str()));
    assert_eq!(notif.data["block"]["id"], json!("x"));
    assert_no_board_broadcast(&mut a.rx).await;

    let boards = state.boards.read().await;
    assert!(boards["plan"].engine.board().blocks.contains_key("x"));
}

#[tokio::test]
async fn positions_go_to_peers_only() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;
    a.send(&state, &create_block("x", None)).await;
    recv_board_broadcast(&mut b.rx).await;

    let text = request_text(
        "mutation:setBlockPositions",
        json!({"blocksAndPositions": [{"blockId": "x", "location": {"x": 40, "y": 50, "width": 100, "height": 100}}]}),
    );
    let reply = a.send(&state, &text).await;
    assert!(reply.is_empty());

    let notif = recv_board_broadcast(&mut b.rx).await;
    assert_eq!(notif.syscall, "mutation:setBlockPositions");
    assert_eq!(notif.data["blocksAndPositions"][0]["blockId"], json!("x"));
    assert_no_board_broadcast(&mut a.rx).await;
}

#[tokio::test]
async fn load_view_replies_to_caller_only() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;

    let save = request_text(
        "mutation:saveView",
        json!({"viewConfig": {"id": "v1", "name": "Grid", "type": "table", "filters": []}}),
    );
    a.send(&state, &save).await;
    assert_eq!(recv_board_broadcast(&mut b.rx).await.syscall, "mutation:saveView");

    let reply = a.send(&state, &request_text("mutation:loadView", json!({"viewId": "v1"}))).await;
    assert_eq!(reply[0].status, Status::Done);
    assert_eq!(reply[0].data["viewConfig"]["name"], json!("Grid"));
    assert_no_board_broadcast(&mut b.rx).await;
}

#[tokio::test]
async fn rejected_mutation_goes_to_originator_with_operation_code() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;
    a.send(&state, &create_block("p", None)).await;
    a.send(&state, &create_block("c", Some("p"))).await;
    recv_board_broadcast(&mut b.rx).await;
    recv_board_broadcast(&mut b.rx).await;

    let cycle = request_text("mutation:setBlockParent", json!({"blockId": "p", "parentBlockId": "c"}));
    let reply = a.send(&state, &cycle).await;
    assert_eq!(reply.len(), 1);
    assert_eq!(reply[0].status, Status::Error);
    assert_eq!(reply[0].error_code(), Some(5));
    assert_eq!(reply[0].data["kind"], json!("E_CIRCULAR_DEPENDENCY"));
    assert!(reply[0].parent_id.is_some());
    assert_no_board_broadcast(&mut b.rx).await;

    let reply = a.send(&state, &request_text("mutation:teleport", json!({}))).await;
    assert_eq!(reply[0].error_code(), Some(u64::from(CODE_BAD_REQUEST)));
}

#[tokio::test]
async fn board_part_broadcasts_immediately_to_peers() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;

    let reply = a.send(&state, &request_text("board:part", json!({}))).await;
    assert_eq!(reply[0].status, Status::Done);
    assert!(a.board.is_none());

    let notif = recv_board_broadcast(&mut b.rx).await;
    assert_eq!(notif.syscall, "board:part");
    assert_eq!(notif.data["clientId"], json!(a.id.to_string()));

    let boards = state.boards.read().await;
    assert_eq!(boards["plan"].clients.len(), 1);
}

#[tokio::test]
async fn joining_another_board_leaves_the_first() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_helpers::test_app_state(dir.path());
    let (mut a, mut b) = two_clients(&state).await;

    a.join(&state, "other").await;
    assert_eq!(a.board.as_deref(), Some("other"));
    assert_eq!(recv_board_broadcast(&mut b.rx).await.syscall, "board:part");

    let boards = state.boards.read().await;
    assert!(!boards["plan"].clients.contains_key(&a.id));
    assert!(boards["other"].clients.contains_key(&a.id));
}

// =============================================================================
// END TO END
// =============================================================================

mod e2e {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use super::*;

    type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    async fn next_frame(socket: &mut Socket) -> Frame {
        loop {
            let msg = timeout(Duration::from_secs(2), socket.next())
                .await
                .expect("socket receive timed out")
                .expect("socket closed")
                .expect("socket error");
            if let WsMessage::Text(text) = msg {
                let frame: Frame = serde_json::from_str(text.as_str()).expect("server sent a frame");
                if frame.syscall != SAVE_STATUS_SYSCALL {
                    return frame;
                }
            }
        }
    }

    async fn send(socket: &mut Socket, syscall: &str, data: serde_json::Value) -> Uuid {
        let text = request_text(syscall, data);
        let frame: Frame = serde_json::from_str(&text).unwrap();
        socket.send(WsMessage::Text(text.into())).await.expect("send should succeed");
        frame.id
    }

    #[tokio::test]
    async fn two_sockets_share_a_board() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_helpers::test_app_state(dir.path());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::routes::app(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = format!("ws://{addr}/api/ws");
        let (mut alice, _) = connect_async(url.as_str()).await.expect("alice connects");
        let (mut bob, _) = connect_async(url.as_str()).await.expect("bob connects");

        let welcome = next_frame(&mut alice).await;
        assert_eq!(welcome.syscall, "session:connected");
        assert!(welcome.data.contains_key("clientId"));
        next_frame(&mut bob).await;

        let join = send(&mut alice, "board:join", json!({"boardId": "live"})).await;
        let reply = next_frame(&mut alice).await;
        assert_eq!(reply.parent_id, Some(join));
        assert_eq!(reply.status, Status::Done);

        send(&mut bob, "board:join", json!({"boardId": "live"})).await;
        assert_eq!(next_frame(&mut bob).await.status, Status::Done);
        assert_eq!(next_frame(&mut alice).await.syscall, "board:joined");

        let create = send(
            &mut alice,
            "mutation:createBlock",
            json!({"id": "n1", "location": {"x": 0, "y": 0, "width": 10, "height": 10}}),
        )
        .await;
        let confirm = next_frame(&mut alice).await;
        assert_eq!(confirm.parent_id, Some(create));
        assert_eq!(confirm.data["block"]["id"], json!("n1"));

        let notif = next_frame(&mut bob).await;
        assert_eq!(notif.syscall, "mutation:createBlock");
        assert_eq!(notif.data["block"]["id"], json!("n1"));

        alice.close(None).await.unwrap();
        let part = next_frame(&mut bob).await;
        assert_eq!(part.syscall, "board:part");
    }
}
