//! # Protocol Messages
//!
//! Closed taxonomy of every record exchanged between client and server.
//! On the wire each record is a msgpack map whose `object_type` field
//! carries the tag; the remaining fields depend on the tag.
//!
//! ## Families
//!
//! | Family          | Client → Server                        | Server → Client                                   |
//! |-----------------|----------------------------------------|---------------------------------------------------|
//! | Handshake       | `connect`                              | `connected`, `connection_error`, `proto_error`    |
//! | Query           | `get*`, `cancel_subscription`          | `*_reply`, `query_error`, `subscription_cancelled`|
//! | Mutation        | `create`, `delete`, `set_*`, `*_tag`   | `request_ack`, `request_error`                    |
//! | Remote call out | `method_run`, `broadcast_run`          | `method_result`, `method_error`, `broadcast_result`|
//! | Plugin callback | `plugin_*_result/error/done`           | `plugin_*_run`, `plugin_query_get`, `plugin_handler_unregistered` |

use crate::errors::{Check, RemoteError};
use crate::node::{Node, NodeId, PosFilter, Value};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Query id: correlates a query or subscription with its replies.
pub type Qid = u64;
/// Request id: correlates a mutation with its ack or error.
pub type Rid = u64;
/// Method id: correlates an outbound method call with its result.
pub type Mid = u64;
/// Broadcast id: correlates an outbound broadcast with its results.
pub type Bid = u64;
/// Plugin handler id, assigned by the server.
pub type Phid = u64;

fn nil() -> Value {
    Value::Nil
}

/// Which correlation family an identifier carried by a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Correlation {
    Query(Qid),
    Request(Rid),
    Method(Mid),
    Broadcast(Bid),
    /// Server-assigned ids of a plugin invocation (`pmid`/`pqid`/`pbid`/`ptid`).
    PluginInvocation(u64),
    PluginHandler(Phid),
}

/// Every message of the protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "object_type", rename_all = "snake_case")]
pub enum Message {
    // ---------------------------------------------------------------------
    // Handshake
    // ---------------------------------------------------------------------
    Connect {
        proto_version: u16,
        #[serde(default)]
        client_name: Option<String>,
        #[serde(default)]
        client_version: Option<String>,
        #[serde(default)]
        client_description: Option<String>,
        #[serde(default)]
        client_type: Option<String>,
    },
    Connected {
        proto_version: u16,
        server_name: String,
        server_version: String,
    },
    ConnectionError {
        err: RemoteError,
    },
    ProtoError {
        err: RemoteError,
    },

    // ---------------------------------------------------------------------
    // Queries and subscriptions
    // ---------------------------------------------------------------------
    Get {
        qid: Qid,
        id: NodeId,
        #[serde(default)]
        sub: bool,
    },
    GetReply {
        qid: Qid,
        obj: Node,
    },
    GetData {
        qid: Qid,
        id: NodeId,
        key: String,
        #[serde(default)]
        sub: bool,
    },
    GetDataReply {
        qid: Qid,
        #[serde(default = "nil")]
        data: Value,
    },
    #[serde(rename = "get_bindata")]
    GetBinData {
        qid: Qid,
        id: NodeId,
        key: String,
        #[serde(default)]
        start: u64,
        #[serde(default)]
        end: Option<u64>,
        #[serde(default)]
        sub: bool,
    },
    #[serde(rename = "get_bindata_reply")]
    GetBinDataReply {
        qid: Qid,
        data: Bytes,
    },
    GetList {
        qid: Qid,
        parent: NodeId,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(default)]
        pos_filter: PosFilter,
        #[serde(default)]
        sub: bool,
    },
    GetListReply {
        qid: Qid,
        #[serde(default)]
        objs: Vec<Node>,
        #[serde(default)]
        gone: Vec<NodeId>,
    },
    GetQuery {
        qid: Qid,
        node: NodeId,
        query: String,
        #[serde(default = "nil")]
        params: Value,
        #[serde(default)]
        sub: bool,
    },
    GetQueryReply {
        qid: Qid,
        #[serde(default = "nil")]
        result: Value,
        #[serde(default)]
        checks: Vec<Check>,
    },
    QueryError {
        qid: Qid,
        err: RemoteError,
        #[serde(default)]
        checks: Vec<Check>,
    },
    CancelSubscription {
        qid: Qid,
    },
    SubscriptionCancelled {
        qid: Qid,
    },

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------
    Create {
        rid: Rid,
        id: NodeId,
        parent: NodeId,
        #[serde(default)]
        pos_start: Option<i64>,
        #[serde(default)]
        pos_end: Option<i64>,
        #[serde(default)]
        tags: BTreeSet<String>,
        #[serde(default)]
        attr: BTreeMap<String, Value>,
        #[serde(default)]
        data: BTreeMap<String, Value>,
        #[serde(default)]
        bindata: BTreeMap<String, Bytes>,
    },
    Delete {
        rid: Rid,
        id: NodeId,
    },
    SetParent {
        rid: Rid,
        id: NodeId,
        parent: NodeId,
    },
    SetPos {
        rid: Rid,
        id: NodeId,
        #[serde(default)]
        pos_start: Option<i64>,
        #[serde(default)]
        pos_end: Option<i64>,
    },
    AddTag {
        rid: Rid,
        id: NodeId,
        tag: String,
    },
    DelTag {
        rid: Rid,
        id: NodeId,
        tag: String,
    },
    SetAttr {
        rid: Rid,
        id: NodeId,
        key: String,
        #[serde(default = "nil")]
        data: Value,
    },
    SetData {
        rid: Rid,
        id: NodeId,
        key: String,
        #[serde(default = "nil")]
        data: Value,
    },
    #[serde(rename = "set_bindata")]
    SetBinData {
        rid: Rid,
        id: NodeId,
        key: String,
        #[serde(default)]
        start: u64,
        data: Bytes,
        #[serde(default)]
        truncate: bool,
    },
    RequestAck {
        rid: Rid,
    },
    RequestError {
        rid: Rid,
        err: RemoteError,
    },

    // ---------------------------------------------------------------------
    // Remote calls issued by the client
    // ---------------------------------------------------------------------
    MethodRun {
        mid: Mid,
        node: NodeId,
        method: String,
        #[serde(default = "nil")]
        params: Value,
    },
    MethodResult {
        mid: Mid,
        #[serde(default = "nil")]
        result: Value,
    },
    MethodError {
        mid: Mid,
        err: RemoteError,
    },
    BroadcastRun {
        bid: Bid,
        broadcast: String,
        #[serde(default = "nil")]
        params: Value,
    },
    BroadcastResult {
        bid: Bid,
        #[serde(default)]
        results: Vec<Value>,
    },

    // ---------------------------------------------------------------------
    // Plugin callbacks issued by the server
    // ---------------------------------------------------------------------
    PluginMethodRun {
        phid: Phid,
        pmid: u64,
        node: NodeId,
        #[serde(default = "nil")]
        params: Value,
    },
    PluginMethodResult {
        pmid: u64,
        #[serde(default = "nil")]
        result: Value,
    },
    PluginMethodError {
        pmid: u64,
        err: RemoteError,
    },
    PluginQueryGet {
        phid: Phid,
        pqid: u64,
        node: NodeId,
        #[serde(default = "nil")]
        params: Value,
    },
    PluginQueryResult {
        pqid: u64,
        #[serde(default = "nil")]
        result: Value,
        #[serde(default)]
        checks: Vec<Check>,
    },
    PluginQueryError {
        pqid: u64,
        err: RemoteError,
        #[serde(default)]
        checks: Vec<Check>,
    },
    PluginBroadcastRun {
        phid: Phid,
        pbid: u64,
        #[serde(default = "nil")]
        params: Value,
    },
    PluginBroadcastResult {
        pbid: u64,
        #[serde(default)]
        results: Vec<Value>,
    },
    PluginTriggerRun {
        phid: Phid,
        ptid: u64,
        node: NodeId,
    },
    PluginTriggerDone {
        ptid: u64,
        #[serde(default)]
        checks: Vec<Check>,
    },
    PluginTriggerError {
        ptid: u64,
        err: RemoteError,
        #[serde(default)]
        checks: Vec<Check>,
    },
    PluginHandlerUnregistered {
        phid: Phid,
    },
}

impl Message {
    /// Wire tag of this message (the `object_type` field).
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Message::Connect { .. } => "connect",
            Message::Connected { .. } => "connected",
            Message::ConnectionError { .. } => "connection_error",
            Message::ProtoError { .. } => "proto_error",
            Message::Get { .. } => "get",
            Message::GetReply { .. } => "get_reply",
            Message::GetData { .. } => "get_data",
            Message::GetDataReply { .. } => "get_data_reply",
            Message::GetBinData { .. } => "get_bindata",
            Message::GetBinDataReply { .. } => "get_bindata_reply",
            Message::GetList { .. } => "get_list",
            Message::GetListReply { .. } => "get_list_reply",
            Message::GetQuery { .. } => "get_query",
            Message::GetQueryReply { .. } => "get_query_reply",
            Message::QueryError { .. } => "query_error",
            Message::CancelSubscription { .. } => "cancel_subscription",
            Message::SubscriptionCancelled { .. } => "subscription_cancelled",
            Message::Create { .. } => "create",
            Message::Delete { .. } => "delete",
            Message::SetParent { .. } => "set_parent",
            Message::SetPos { .. } => "set_pos",
            Message::AddTag { .. } => "add_tag",
            Message::DelTag { .. } => "del_tag",
            Message::SetAttr { .. } => "set_attr",
            Message::SetData { .. } => "set_data",
            Message::SetBinData { .. } => "set_bindata",
            Message::RequestAck { .. } => "request_ack",
            Message::RequestError { .. } => "request_error",
            Message::MethodRun { .. } => "method_run",
            Message::MethodResult { .. } => "method_result",
            Message::MethodError { .. } => "method_error",
            Message::BroadcastRun { .. } => "broadcast_run",
            Message::BroadcastResult { .. } => "broadcast_result",
            Message::PluginMethodRun { .. } => "plugin_method_run",
            Message::PluginMethodResult { .. } => "plugin_method_result",
            Message::PluginMethodError { .. } => "plugin_method_error",
            Message::PluginQueryGet { .. } => "plugin_query_get",
            Message::PluginQueryResult { .. } => "plugin_query_result",
            Message::PluginQueryError { .. } => "plugin_query_error",
            Message::PluginBroadcastRun { .. } => "plugin_broadcast_run",
            Message::PluginBroadcastResult { .. } => "plugin_broadcast_result",
            Message::PluginTriggerRun { .. } => "plugin_trigger_run",
            Message::PluginTriggerDone { .. } => "plugin_trigger_done",
            Message::PluginTriggerError { .. } => "plugin_trigger_error",
            Message::PluginHandlerUnregistered { .. } => "plugin_handler_unregistered",
        }
    }

    /// The correlation identifier this message carries, if any.
    #[must_use]
    pub fn correlation(&self) -> Option<Correlation> {
        match self {
            Message::Connect { .. }
            | Message::Connected { .. }
            | Message::ConnectionError { .. }
            | Message::ProtoError { .. } => None,

            Message::Get { qid, .. }
            | Message::GetReply { qid, .. }
            | Message::GetData { qid, .. }
            | Message::GetDataReply { qid, .. }
            | Message::GetBinData { qid, .. }
            | Message::GetBinDataReply { qid, .. }
            | Message::GetList { qid, .. }
            | Message::GetListReply { qid, .. }
            | Message::GetQuery { qid, .. }
            | Message::GetQueryReply { qid, .. }
            | Message::QueryError { qid, .. }
            | Message::CancelSubscription { qid }
            | Message::SubscriptionCancelled { qid } => Some(Correlation::Query(*qid)),

            Message::Create { rid, .. }
            | Message::Delete { rid, .. }
            | Message::SetParent { rid, .. }
            | Message::SetPos { rid, .. }
            | Message::AddTag { rid, .. }
            | Message::DelTag { rid, .. }
            | Message::SetAttr { rid, .. }
            | Message::SetData { rid, .. }
            | Message::SetBinData { rid, .. }
            | Message::RequestAck { rid }
            | Message::RequestError { rid, .. } => Some(Correlation::Request(*rid)),

            Message::MethodRun { mid, .. }
            | Message::MethodResult { mid, .. }
            | Message::MethodError { mid, .. } => Some(Correlation::Method(*mid)),

            Message::BroadcastRun { bid, .. } | Message::BroadcastResult { bid, .. } => {
                Some(Correlation::Broadcast(*bid))
            }

            Message::PluginMethodRun { pmid, .. }
            | Message::PluginMethodResult { pmid, .. }
            | Message::PluginMethodError { pmid, .. } => {
                Some(Correlation::PluginInvocation(*pmid))
            }
            Message::PluginQueryGet { pqid, .. }
            | Message::PluginQueryResult { pqid, .. }
            | Message::PluginQueryError { pqid, .. } => {
                Some(Correlation::PluginInvocation(*pqid))
            }
            Message::PluginBroadcastRun { pbid, .. }
            | Message::PluginBroadcastResult { pbid, .. } => {
                Some(Correlation::PluginInvocation(*pbid))
            }
            Message::PluginTriggerRun { ptid, .. }
            | Message::PluginTriggerDone { ptid, .. }
            | Message::PluginTriggerError { ptid, .. } => {
                Some(Correlation::PluginInvocation(*ptid))
            }
            Message::PluginHandlerUnregistered { phid } => Some(Correlation::PluginHandler(*phid)),
        }
    }
}
