//! Upload channel integration tests
//!
//! Exercises the newline-delimited JSON transport against a local TCP
//! listener: frame round trips, skipping of undecodable frames, reconnect
//! after a server drop, and bounded connect retries.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use mcb_common::config::ChannelConfig;
use mcb_common::messages::{ClientMessage, ServerMessage};
use mcb_common::Result;
use mcb_up::channel;

struct Client {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    task: JoinHandle<Result<()>>,
}

async fn start(config: ChannelConfig) -> Client {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        channel::run_channel(&config, outbound_rx, inbound_tx).await
    });
    Client {
        outbound: outbound_tx,
        inbound: inbound_rx,
        task,
    }
}

fn config_for(listener: &TcpListener) -> ChannelConfig {
    let addr = listener.local_addr().unwrap();
    ChannelConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        reconnect_attempts: 3,
        reconnect_delay_ms: 20,
    }
}

#[tokio::test]
async fn frames_round_trip_in_both_directions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = start(config_for(&listener)).await;

    let (socket, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    client.outbound.send(ClientMessage::CreateBatch).unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    assert_eq!(line, r#"{"type":"CREATE_BATCH"}"#);

    client
        .outbound
        .send(ClientMessage::SubscribeBatch { batchid: 7 })
        .unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    assert_eq!(line, r#"{"type":"SUBSCRIBE_BATCH","data":{"batchid":7}}"#);

    write_half
        .write_all(b"{\"type\":\"BATCH_CREATED\",\"data\":{\"batchid\":5}}\n")
        .await
        .unwrap();
    assert_eq!(
        client.inbound.recv().await,
        Some(ServerMessage::BatchCreated { batchid: 5 })
    );

    // Closing the outbound side shuts the channel down cleanly
    drop(client.outbound);
    client.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn undecodable_frames_are_skipped_not_fatal() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = start(config_for(&listener)).await;

    let (mut socket, _) = listener.accept().await.unwrap();
    socket.write_all(b"this is not json\n").await.unwrap();
    socket
        .write_all(b"{\"type\":\"NO_SUCH_TAG\",\"data\":{}}\n")
        .await
        .unwrap();
    socket
        .write_all(b"{\"type\":\"UPLOADS_COMPLETE\",\"data\":{\"batchid\":3}}\n")
        .await
        .unwrap();

    assert_eq!(
        client.inbound.recv().await,
        Some(ServerMessage::UploadsComplete { batchid: 3 })
    );

    drop(client.outbound);
    client.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn reconnects_after_a_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = start(config_for(&listener)).await;

    let (socket, _) = listener.accept().await.unwrap();
    drop(socket);

    // Second accept is the reconnected transport
    let (mut socket, _) = listener.accept().await.unwrap();
    socket
        .write_all(b"{\"type\":\"TRY_BATCH_RETRIEVAL\"}\n")
        .await
        .unwrap();
    assert_eq!(
        client.inbound.recv().await,
        Some(ServerMessage::TryBatchRetrieval)
    );

    drop(client.outbound);
    client.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversized_frames_drop_the_connection_instead_of_buffering() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = start(config_for(&listener)).await;

    let (mut socket, _) = listener.accept().await.unwrap();
    // One unterminated line past the frame cap; the write may fail partway
    // once the client side hangs up
    let blob = vec![b'a'; 9 * 1024 * 1024];
    let _ = socket.write_all(&blob).await;
    drop(socket);

    // The client treats it as a dropped transport and reconnects
    let (mut socket, _) = listener.accept().await.unwrap();
    socket
        .write_all(b"{\"type\":\"UPLOADS_COMPLETE\",\"data\":{\"batchid\":3}}\n")
        .await
        .unwrap();
    assert_eq!(
        client.inbound.recv().await,
        Some(ServerMessage::UploadsComplete { batchid: 3 })
    );

    drop(client.outbound);
    client.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn gives_up_after_bounded_connect_attempts() {
    // Bind then drop to get a port with nothing listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = ChannelConfig {
        reconnect_attempts: 2,
        reconnect_delay_ms: 10,
        ..config_for(&listener)
    };
    drop(listener);

    let client = start(config).await;
    let result = client.task.await.unwrap();
    assert!(result.is_err());
}
