//! # Subscription Tests
//!
//! A subscription stays registered under its qid until the server confirms
//! cancellation. Errors arrive interleaved with updates and never end it.

#[cfg(test)]
mod tests {
    use crate::harness::{connected_pair, eventually, STEP_TIMEOUT};
    use nodetree_client::{
        ClientError, ConnectionFailure, IdSpace, Node, NodeId, QueryReply, QueryRequest,
        RemoteError, Value,
    };
    use nodetree_proto::Message;
    use std::time::Duration;
    use tokio::time::timeout;

    // =============================================================================
    // UPDATES
    // =============================================================================

    /// Two replies under a caller-chosen qid arrive in order; the entry stays.
    #[tokio::test]
    async fn test_subscription_with_chosen_qid_receives_updates_in_order() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let mut sub = conn
            .subscribe_with_qid(2, QueryRequest::Node { id })
            .await
            .unwrap();
        assert_eq!(sub.qid(), 2);
        assert_eq!(server.recv().await, Message::Get { qid: 2, id, sub: true });

        let mut first = Node::new(id);
        first.tags.insert("v1".into());
        let mut second = Node::new(id);
        second.tags.insert("v2".into());
        server.send(Message::GetReply { qid: 2, obj: first.clone() }).await;
        server.send(Message::GetReply { qid: 2, obj: second.clone() }).await;

        let got = timeout(STEP_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, QueryReply::Node(first));
        let got = timeout(STEP_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, QueryReply::Node(second));

        assert_eq!(conn.pending_counts().queries, 1);
    }

    /// Reusing an outstanding qid fails before anything is sent.
    #[tokio::test]
    async fn test_outstanding_qid_is_rejected_before_send() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let _sub = conn
            .subscribe_with_qid(2, QueryRequest::Node { id })
            .await
            .unwrap();
        server.recv().await;

        let err = conn
            .subscribe_with_qid(2, QueryRequest::Data { id, key: "k".into() })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ClientError::IdInUse {
                space: IdSpace::Query,
                id: 2
            }
        );

        assert!(server.recv_within(Duration::from_millis(100)).await.is_none());
        assert_eq!(conn.pending_counts().queries, 1);
    }

    /// A `query_error` is delivered as an item and the subscription goes on.
    #[tokio::test]
    async fn test_query_error_keeps_subscription() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let mut sub = conn.get_data_sub(id, "temp").await.unwrap();
        let Message::GetData { qid, sub: true, .. } = server.recv().await else {
            panic!("expected subscribed get_data");
        };

        server
            .send(Message::QueryError {
                qid,
                err: RemoteError::new("object_gone", "not yet"),
                checks: Vec::new(),
            })
            .await;
        server
            .send(Message::GetDataReply {
                qid,
                data: Value::from(21),
            })
            .await;

        let err = timeout(STEP_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap_err();
        assert_eq!(err.remote_code(), Some("object_gone"));
        let value = timeout(STEP_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(value, Value::from(21));

        assert_eq!(conn.pending_counts().queries, 1);
    }

    /// The handle is a `Stream` of typed updates.
    #[tokio::test]
    async fn test_subscription_as_stream() {
        let (conn, mut server) = connected_pair().await;
        let parent = NodeId::random();
        let child = NodeId::random();

        let mut sub = conn
            .list_sub(parent, Default::default(), Default::default())
            .await
            .unwrap();
        let Message::GetList { qid, parent: asked, .. } = server.recv().await else {
            panic!("expected get_list");
        };
        assert_eq!(asked, parent);

        server
            .send(Message::GetListReply {
                qid,
                objs: vec![Node::new(child)],
                gone: Vec::new(),
            })
            .await;
        server
            .send(Message::GetListReply {
                qid,
                objs: Vec::new(),
                gone: vec![child],
            })
            .await;

        let added = timeout(STEP_TIMEOUT, tokio_stream::StreamExt::next(&mut sub))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(added.objs.len(), 1);
        let removed = timeout(STEP_TIMEOUT, tokio_stream::StreamExt::next(&mut sub))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(removed.gone, vec![child]);
    }

    // =============================================================================
    // CANCELLATION
    // =============================================================================

    /// Updates sent before `subscription_cancelled` stay readable; later ones
    /// are dropped as anomalies.
    #[tokio::test]
    async fn test_cancel_drains_updates_then_ends() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let mut sub = conn.get_sub(id).await.unwrap();
        let qid = sub.qid();
        server.recv().await;

        let script = async {
            assert_eq!(server.recv().await, Message::CancelSubscription { qid });
            server.send(Message::GetReply { qid, obj: Node::new(id) }).await;
            server.send(Message::SubscriptionCancelled { qid }).await;
        };
        let (cancelled, ()) = tokio::join!(timeout(STEP_TIMEOUT, sub.cancel()), script);
        cancelled.unwrap().unwrap();

        let last = timeout(STEP_TIMEOUT, sub.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(last.id, id);
        assert!(timeout(STEP_TIMEOUT, sub.next()).await.unwrap().is_none());
        assert_eq!(conn.pending_counts().queries, 0);

        server.send(Message::GetReply { qid, obj: Node::new(id) }).await;
        eventually(|| conn.stats().protocol_anomalies == 1).await;
        assert_eq!(conn.state(), nodetree_client::ConnectionState::Active);
    }

    /// Cancelling an unknown qid fails locally.
    #[tokio::test]
    async fn test_cancel_unknown_qid() {
        let (conn, _server) = connected_pair().await;
        assert_eq!(
            conn.cancel_subscription(77).await,
            Err(ClientError::NotSubscribed(77))
        );
    }

    /// Dropping the handle sends one cancellation in the background.
    #[tokio::test]
    async fn test_drop_sends_background_cancel() {
        let (conn, mut server) = connected_pair().await;

        let sub = conn.get_sub(NodeId::random()).await.unwrap();
        let qid = sub.qid();
        server.recv().await;

        drop(sub);
        assert_eq!(server.recv().await, Message::CancelSubscription { qid });
        assert!(server.recv_within(Duration::from_millis(100)).await.is_none());

        server.send(Message::SubscriptionCancelled { qid }).await;
        eventually(|| conn.pending_counts().queries == 0).await;
    }

    /// A failing connection ends every subscription with the failure.
    #[tokio::test]
    async fn test_connection_failure_ends_subscription() {
        let (conn, server) = connected_pair().await;
        let mut sub = conn.get_sub(NodeId::random()).await.unwrap();

        drop(server);

        match timeout(STEP_TIMEOUT, sub.next()).await.unwrap() {
            Some(Err(ClientError::Connection(ConnectionFailure::TransportLost(_)))) => {}
            other => panic!("expected transport loss, got {:?}", other),
        }
        assert!(timeout(STEP_TIMEOUT, sub.next()).await.unwrap().is_none());
    }

    /// A handle whose subscription the server ended on its own does not
    /// cancel a later subscription that reuses the qid.
    #[tokio::test]
    async fn test_ended_handle_leaves_reused_qid_alone() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let mut old = conn
            .subscribe_with_qid(5, QueryRequest::Node { id })
            .await
            .unwrap();
        server.recv().await;
        server.send(Message::SubscriptionCancelled { qid: 5 }).await;
        assert!(timeout(STEP_TIMEOUT, old.next()).await.unwrap().is_none());

        let mut live = conn
            .subscribe_with_qid(5, QueryRequest::Node { id })
            .await
            .unwrap();
        assert_eq!(server.recv().await, Message::Get { qid: 5, id, sub: true });

        assert_eq!(old.cancel().await, Err(ClientError::NotSubscribed(5)));
        drop(old);
        assert!(server.recv_within(Duration::from_millis(100)).await.is_none());
        assert_eq!(conn.pending_counts().queries, 1);

        server.send(Message::GetReply { qid: 5, obj: Node::new(id) }).await;
        let got = timeout(STEP_TIMEOUT, live.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(got, QueryReply::Node(Node::new(id)));
    }

    /// An unread handle dropped after its qid was reused leaves the new
    /// subscription alone too.
    #[tokio::test]
    async fn test_unread_stale_handle_drop_leaves_reused_qid_alone() {
        let (conn, mut server) = connected_pair().await;
        let id = NodeId::random();

        let old = conn
            .subscribe_with_qid(6, QueryRequest::Node { id })
            .await
            .unwrap();
        server.recv().await;
        server.send(Message::SubscriptionCancelled { qid: 6 }).await;
        eventually(|| conn.pending_counts().queries == 0).await;

        let _live = conn
            .subscribe_with_qid(6, QueryRequest::Node { id })
            .await
            .unwrap();
        server.recv().await;

        drop(old);
        assert!(server.recv_within(Duration::from_millis(100)).await.is_none());
        assert_eq!(conn.pending_counts().queries, 1);
    }
}
