//! # Failure Tests
//!
//! Fatal conditions move the connection to `Failed` and resolve every
//! outstanding waiter exactly once with the same failure.

#[cfg(test)]
mod tests {
    use crate::harness::{connected_pair, terminal_state, STEP_TIMEOUT};
    use nodetree_client::{
        ClientError, ConnectionFailure, ConnectionState, NodeId, PendingCounts, RemoteError, Value,
    };
    use nodetree_proto::{CodecError, Message};
    use std::collections::BTreeMap;
    use tokio::time::timeout;

    // =============================================================================
    // TRANSPORT LOSS
    // =============================================================================

    /// Every pending waiter, of every family, sees the transport loss exactly once.
    #[tokio::test]
    async fn test_transport_loss_drains_all_waiters() {
        let (conn, mut server) = connected_pair().await;
        let mut calls = Vec::new();

        for _ in 0..3 {
            let conn = conn.clone();
            calls.push(tokio::spawn(async move {
                conn.get(NodeId::random()).await.map(|_| ())
            }));
        }
        for _ in 0..3 {
            server.recv().await;
        }

        let request = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.delete(NodeId::random()).await })
        };
        let method = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.run_method(NodeId::ROOT, "m", Value::Nil).await.map(|_| ())
            })
        };
        let broadcast = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.run_broadcast("b", Value::Nil).await.map(|_| ())
            })
        };
        for _ in 0..3 {
            server.recv().await;
        }
        calls.push(request);
        calls.push(method);
        calls.push(broadcast);

        let mut sub = conn.get_sub(NodeId::random()).await.unwrap();
        server.recv().await;

        assert_eq!(conn.pending_counts().operations(), 7);
        drop(server);

        match timeout(STEP_TIMEOUT, sub.next()).await.unwrap() {
            Some(Err(ClientError::Connection(ConnectionFailure::TransportLost(_)))) => {}
            other => panic!("expected transport loss on subscription, got {:?}", other),
        }
        assert!(timeout(STEP_TIMEOUT, sub.next()).await.unwrap().is_none());

        for call in calls {
            let result = timeout(STEP_TIMEOUT, call).await.unwrap().unwrap();
            match result {
                Err(ClientError::Connection(ConnectionFailure::TransportLost(_))) => {}
                other => panic!("expected transport loss, got {:?}", other),
            }
        }

        assert!(matches!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::TransportLost(_))
        ));
        assert_eq!(conn.pending_counts(), PendingCounts::default());
        assert_eq!(conn.stats().operations_failed, 7);
    }

    /// Calls made after the connection ended fail without touching the wire.
    #[tokio::test]
    async fn test_calls_after_close_fail_fast() {
        let (conn, mut server) = connected_pair().await;

        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);

        let err = timeout(STEP_TIMEOUT, conn.get(NodeId::ROOT))
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, ClientError::Connection(ConnectionFailure::Closed));
        let err = timeout(STEP_TIMEOUT, conn.set_attr(NodeId::ROOT, "k", Value::Nil))
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_connection_failure());

        assert!(server
            .recv_within(std::time::Duration::from_millis(100))
            .await
            .is_none());
        assert_eq!(conn.pending_counts().operations(), 0);
    }

    // =============================================================================
    // PEER-REPORTED ERRORS
    // =============================================================================

    /// `proto_error` from the server is fatal.
    #[tokio::test]
    async fn test_proto_error_is_fatal() {
        let (conn, mut server) = connected_pair().await;
        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.get(NodeId::ROOT).await })
        };
        server.recv().await;

        let err = RemoteError::new("invalid_packet", "bad field");
        server.send(Message::ProtoError { err: err.clone() }).await;

        assert_eq!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::PeerProtocolError(err.clone()))
        );
        assert_eq!(
            timeout(STEP_TIMEOUT, pending).await.unwrap().unwrap(),
            Err(ClientError::Connection(ConnectionFailure::PeerProtocolError(err)))
        );
    }

    // =============================================================================
    // PROTOCOL VIOLATIONS
    // =============================================================================

    /// A `request_ack` for a rid nobody is waiting on is fatal.
    #[tokio::test]
    async fn test_unknown_rid_is_fatal() {
        let (conn, mut server) = connected_pair().await;

        server.send(Message::RequestAck { rid: 12 }).await;

        assert!(matches!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::ProtocolViolation(_))
        ));
    }

    /// A reply of the wrong kind for a pending qid is fatal.
    #[tokio::test]
    async fn test_reply_kind_mismatch_is_fatal() {
        let (conn, mut server) = connected_pair().await;
        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.get(NodeId::ROOT).await })
        };
        let Message::Get { qid, .. } = server.recv().await else {
            panic!("expected get");
        };

        server
            .send(Message::GetDataReply {
                qid,
                data: Value::from(1),
            })
            .await;

        assert!(matches!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::ProtocolViolation(_))
        ));
        assert!(timeout(STEP_TIMEOUT, pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap_err()
            .is_connection_failure());
    }

    /// A client-side message arriving from the server is fatal.
    #[tokio::test]
    async fn test_client_side_tag_from_server_is_fatal() {
        let (conn, mut server) = connected_pair().await;

        server
            .send(Message::MethodRun {
                mid: 1,
                node: NodeId::ROOT,
                method: "m".into(),
                params: Value::Nil,
            })
            .await;

        assert!(matches!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::ProtocolViolation(_))
        ));
    }

    /// An unknown `object_type` is a schema error.
    #[tokio::test]
    async fn test_unknown_tag_is_codec_failure() {
        let (conn, mut server) = connected_pair().await;

        let mut record = BTreeMap::new();
        record.insert("object_type", "register_mthd");
        let bytes = rmp_serde::to_vec_named(&record).unwrap();
        server.send_raw(&bytes).await;

        assert!(matches!(
            terminal_state(&conn).await,
            ConnectionState::Failed(ConnectionFailure::Codec(CodecError::Schema(_)))
        ));
    }

    /// A second `connected` is tolerated and counted.
    #[tokio::test]
    async fn test_duplicate_connected_is_tolerated() {
        let (conn, mut server) = connected_pair().await;

        server.send(crate::harness::connected()).await;
        crate::harness::eventually(|| conn.stats().protocol_anomalies == 1).await;

        assert_eq!(conn.state(), ConnectionState::Active);
    }
}
