//! Outbound request/call facade.
//!
//! Every call follows the same steps: wait for `Active`, open a pending
//! entry (allocating its id), queue the request carrying that id, then
//! await the entry's completion. The table lock is never held across an
//! await.

use crate::connection::Connection;
use crate::domain::error::{ClientError, ClientResult};
use crate::domain::ids::IdSpace;
use crate::domain::pending::Completion;
use crate::domain::reply::{FromReply, ListUpdate, QueryReply, QueryRequest, QueryResult};
use crate::domain::stats::ConnectionStats;
use crate::plugin::PluginHandler;
use crate::subscription::Subscription;
use bytes::Bytes;
use nodetree_proto::{Message, Node, NodeId, Phid, PosFilter, Qid, Rid, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// A node to create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewNode {
    /// Generated when `None`.
    pub id: Option<NodeId>,
    pub parent: NodeId,
    pub pos_start: Option<i64>,
    pub pos_end: Option<i64>,
    pub tags: BTreeSet<String>,
    pub attr: BTreeMap<String, Value>,
    pub data: BTreeMap<String, Value>,
    pub bindata: BTreeMap<String, Bytes>,
}

impl NewNode {
    pub fn new(parent: NodeId) -> Self {
        Self {
            parent,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: NodeId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_pos(mut self, pos_start: Option<i64>, pos_end: Option<i64>) -> Self {
        self.pos_start = pos_start;
        self.pos_end = pos_end;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attr.insert(key.into(), value.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_bindata(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.bindata.insert(key.into(), value.into());
        self
    }
}

impl Connection {
    // =========================================================================
    // Queries
    // =========================================================================

    /// One-shot query.
    pub async fn query(&self, request: QueryRequest) -> ClientResult<QueryReply> {
        self.wait_active().await?;
        let kind = request.kind();
        let (qid, completion) = self.with_tables(|t| t.open_query(kind))?;
        self.registered();
        self.send_tracked(IdSpace::Query, qid, &request.into_message(qid, false))
            .await?;
        self.complete(completion).await
    }

    /// Subscribed query under a fresh qid.
    pub async fn subscribe(&self, request: QueryRequest) -> ClientResult<Subscription<QueryReply>> {
        self.open_subscription(request, None).await
    }

    /// Subscribed query under a caller-chosen qid.
    ///
    /// Fails with [`ClientError::IdInUse`] before sending anything if the
    /// qid is still outstanding.
    pub async fn subscribe_with_qid(
        &self,
        qid: Qid,
        request: QueryRequest,
    ) -> ClientResult<Subscription<QueryReply>> {
        self.open_subscription(request, Some(qid)).await
    }

    async fn open_subscription<T: FromReply>(
        &self,
        request: QueryRequest,
        qid: Option<Qid>,
    ) -> ClientResult<Subscription<T>> {
        self.wait_active().await?;
        let kind = request.kind();
        let opened = self.with_tables(|t| t.open_subscription(kind, qid))?;
        let qid = opened.qid;
        self.registered();
        self.send_tracked(IdSpace::Query, qid, &request.into_message(qid, true))
            .await?;
        Ok(Subscription::new(self.clone(), opened))
    }

    async fn query_as<T: FromReply>(&self, request: QueryRequest) -> ClientResult<T> {
        T::from_reply(self.query(request).await?)
    }

    pub async fn get(&self, id: NodeId) -> ClientResult<Node> {
        self.query_as(QueryRequest::Node { id }).await
    }

    pub async fn get_sub(&self, id: NodeId) -> ClientResult<Subscription<Node>> {
        self.open_subscription(QueryRequest::Node { id }, None).await
    }

    pub async fn get_data(&self, id: NodeId, key: impl Into<String>) -> ClientResult<Value> {
        self.query_as(QueryRequest::Data {
            id,
            key: key.into(),
        })
        .await
    }

    pub async fn get_data_sub(
        &self,
        id: NodeId,
        key: impl Into<String>,
    ) -> ClientResult<Subscription<Value>> {
        let request = QueryRequest::Data {
            id,
            key: key.into(),
        };
        self.open_subscription(request, None).await
    }

    /// Read `[start, end)` of a bindata blob; `end = None` reads to the end.
    pub async fn get_bindata(
        &self,
        id: NodeId,
        key: impl Into<String>,
        start: u64,
        end: Option<u64>,
    ) -> ClientResult<Bytes> {
        self.query_as(QueryRequest::BinData {
            id,
            key: key.into(),
            start,
            end,
        })
        .await
    }

    pub async fn get_bindata_sub(
        &self,
        id: NodeId,
        key: impl Into<String>,
        start: u64,
        end: Option<u64>,
    ) -> ClientResult<Subscription<Bytes>> {
        let request = QueryRequest::BinData {
            id,
            key: key.into(),
            start,
            end,
        };
        self.open_subscription(request, None).await
    }

    /// Children of `parent` carrying all of `tags`, within `pos_filter`.
    pub async fn list(
        &self,
        parent: NodeId,
        tags: BTreeSet<String>,
        pos_filter: PosFilter,
    ) -> ClientResult<ListUpdate> {
        self.query_as(QueryRequest::List {
            parent,
            tags,
            pos_filter,
        })
        .await
    }

    pub async fn list_sub(
        &self,
        parent: NodeId,
        tags: BTreeSet<String>,
        pos_filter: PosFilter,
    ) -> ClientResult<Subscription<ListUpdate>> {
        let request = QueryRequest::List {
            parent,
            tags,
            pos_filter,
        };
        self.open_subscription(request, None).await
    }

    /// Run a server-side plugin query on `node`.
    pub async fn get_query(
        &self,
        node: NodeId,
        query: impl Into<String>,
        params: Value,
    ) -> ClientResult<QueryResult> {
        self.query_as(QueryRequest::Query {
            node,
            query: query.into(),
            params,
        })
        .await
    }

    pub async fn get_query_sub(
        &self,
        node: NodeId,
        query: impl Into<String>,
        params: Value,
    ) -> ClientResult<Subscription<QueryResult>> {
        let request = QueryRequest::Query {
            node,
            query: query.into(),
            params,
        };
        self.open_subscription(request, None).await
    }

    /// Send `cancel_subscription` (once) and wait for the confirmation.
    pub async fn cancel_subscription(&self, qid: Qid) -> ClientResult<()> {
        self.cancel_generation(qid, None).await
    }

    /// Cancel the entry under `qid`, provided it is still `generation`.
    pub(crate) async fn cancel_generation(&self, qid: Qid, generation: Option<u64>) -> ClientResult<()> {
        let ticket = self.with_tables(|t| t.request_cancel(qid, generation))?;
        if ticket.send {
            self.send(&Message::CancelSubscription { qid }).await?;
        }
        ticket
            .confirmed
            .await
            .map_err(|_| self.failure_error())?
    }

    /// Fire-and-forget cancellation used when a handle is dropped.
    pub(crate) fn cancel_detached(&self, qid: Qid, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Ok(ticket) = self.with_tables(|t| t.request_cancel(qid, Some(generation))) else {
            return;
        };
        if !ticket.send {
            return;
        }
        let conn = self.clone();
        runtime.spawn(async move {
            if let Err(e) = conn.send(&Message::CancelSubscription { qid }).await {
                debug!(qid, error = %e, "Background cancellation not sent");
            }
        });
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a node; returns its id.
    pub async fn create(&self, node: NewNode) -> ClientResult<NodeId> {
        let id = node.id.unwrap_or_else(NodeId::random);
        self.request("create", |rid| Message::Create {
            rid,
            id,
            parent: node.parent,
            pos_start: node.pos_start,
            pos_end: node.pos_end,
            tags: node.tags,
            attr: node.attr,
            data: node.data,
            bindata: node.bindata,
        })
        .await?;
        Ok(id)
    }

    pub async fn delete(&self, id: NodeId) -> ClientResult<()> {
        self.request("delete", |rid| Message::Delete { rid, id }).await
    }

    /// Move `id` under a new parent.
    pub async fn set_parent(&self, id: NodeId, parent: NodeId) -> ClientResult<()> {
        self.request("set_parent", |rid| Message::SetParent { rid, id, parent })
            .await
    }

    pub async fn set_pos(
        &self,
        id: NodeId,
        pos_start: Option<i64>,
        pos_end: Option<i64>,
    ) -> ClientResult<()> {
        self.request("set_pos", |rid| Message::SetPos {
            rid,
            id,
            pos_start,
            pos_end,
        })
        .await
    }

    pub async fn add_tag(&self, id: NodeId, tag: impl Into<String>) -> ClientResult<()> {
        let tag = tag.into();
        self.request("add_tag", |rid| Message::AddTag { rid, id, tag }).await
    }

    pub async fn del_tag(&self, id: NodeId, tag: impl Into<String>) -> ClientResult<()> {
        let tag = tag.into();
        self.request("del_tag", |rid| Message::DelTag { rid, id, tag }).await
    }

    /// Set an attribute; `Value::Nil` removes it.
    pub async fn set_attr(
        &self,
        id: NodeId,
        key: impl Into<String>,
        data: Value,
    ) -> ClientResult<()> {
        let key = key.into();
        self.request("set_attr", |rid| Message::SetAttr { rid, id, key, data })
            .await
    }

    /// Set a data value; `Value::Nil` removes it.
    pub async fn set_data(
        &self,
        id: NodeId,
        key: impl Into<String>,
        data: Value,
    ) -> ClientResult<()> {
        let key = key.into();
        self.request("set_data", |rid| Message::SetData { rid, id, key, data })
            .await
    }

    /// Write `data` at `start`; `truncate` cuts the blob after the write.
    pub async fn set_bindata(
        &self,
        id: NodeId,
        key: impl Into<String>,
        start: u64,
        data: impl Into<Bytes>,
        truncate: bool,
    ) -> ClientResult<()> {
        let key = key.into();
        let data = data.into();
        self.request("set_bindata", |rid| Message::SetBinData {
            rid,
            id,
            key,
            start,
            data,
            truncate,
        })
        .await
    }

    async fn request(&self, op: &'static str, build: impl FnOnce(Rid) -> Message) -> ClientResult<()> {
        self.wait_active().await?;
        let (rid, completion) = self.with_tables(|t| t.open_request(op))?;
        self.registered();
        self.send_tracked(IdSpace::Request, rid, &build(rid)).await?;
        self.complete(completion).await
    }

    // =========================================================================
    // Remote calls
    // =========================================================================

    /// Call `method` on `node` and wait for its result.
    pub async fn run_method(
        &self,
        node: NodeId,
        method: impl Into<String>,
        params: Value,
    ) -> ClientResult<Value> {
        self.wait_active().await?;
        let (mid, completion) = self.with_tables(|t| t.open_method("run_method"))?;
        self.registered();
        let msg = Message::MethodRun {
            mid,
            node,
            method: method.into(),
            params,
        };
        self.send_tracked(IdSpace::Method, mid, &msg).await?;
        self.complete(completion).await
    }

    /// Run a broadcast; partial failures are encoded in the results.
    pub async fn run_broadcast(
        &self,
        broadcast: impl Into<String>,
        params: Value,
    ) -> ClientResult<Vec<Value>> {
        self.wait_active().await?;
        let (bid, completion) = self.with_tables(|t| t.open_broadcast("run_broadcast"))?;
        self.registered();
        let msg = Message::BroadcastRun {
            bid,
            broadcast: broadcast.into(),
            params,
        };
        self.send_tracked(IdSpace::Broadcast, bid, &msg).await?;
        self.complete(completion).await
    }

    // =========================================================================
    // Plugin handlers
    // =========================================================================

    /// Bind `handler` to the server-assigned `phid`.
    ///
    /// Returns the handler previously bound to that id, if any.
    pub fn register_handler(
        &self,
        phid: Phid,
        handler: Arc<dyn PluginHandler>,
    ) -> Option<Arc<dyn PluginHandler>> {
        info!(phid, "Plugin handler registered");
        self.with_tables(|t| t.register_handler(phid, handler))
    }

    /// Drop local bookkeeping for `phid`. In-flight invocations finish.
    pub fn unregister_handler(&self, phid: Phid) -> bool {
        self.with_tables(|t| t.unregister_handler(phid)).is_some()
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn registered(&self) {
        ConnectionStats::incr(&self.stats_handle().operations_registered);
    }

    /// Send, or remove the pending entry if the message never left.
    async fn send_tracked(&self, space: IdSpace, id: u64, msg: &Message) -> ClientResult<()> {
        if let Err(e) = self.send(msg).await {
            self.with_tables(|t| t.abandon(space, id));
            return Err(e);
        }
        Ok(())
    }

    async fn complete<T>(&self, completion: Completion<T>) -> ClientResult<T> {
        let result = completion.await.map_err(|_| self.failure_error())?;
        if !matches!(result, Err(ClientError::Connection(_))) {
            ConnectionStats::incr(&self.stats_handle().operations_completed);
        }
        result
    }
}
