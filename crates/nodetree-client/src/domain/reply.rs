//! Query requests and the replies they produce.

use crate::domain::error::ClientError;
use bytes::Bytes;
use nodetree_proto::{Check, Message, Node, NodeId, PosFilter, Qid, Value};
use std::collections::BTreeSet;

/// Shape of a query; replies must match the kind that was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Node,
    Data,
    BinData,
    List,
    Query,
}

impl QueryKind {
    pub fn reply_tag(self) -> &'static str {
        match self {
            QueryKind::Node => "get_reply",
            QueryKind::Data => "get_data_reply",
            QueryKind::BinData => "get_bindata_reply",
            QueryKind::List => "get_list_reply",
            QueryKind::Query => "get_query_reply",
        }
    }
}

/// A read against the tree, one-shot or subscribed.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    /// Full node snapshot.
    Node { id: NodeId },
    /// One data value.
    Data { id: NodeId, key: String },
    /// A byte range of a bindata blob. `end = None` reads to the end.
    BinData {
        id: NodeId,
        key: String,
        start: u64,
        end: Option<u64>,
    },
    /// Children of `parent`, filtered by tags and position.
    List {
        parent: NodeId,
        tags: BTreeSet<String>,
        pos_filter: PosFilter,
    },
    /// Server-side plugin query addressed at a node.
    Query {
        node: NodeId,
        query: String,
        params: Value,
    },
}

impl QueryRequest {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryRequest::Node { .. } => QueryKind::Node,
            QueryRequest::Data { .. } => QueryKind::Data,
            QueryRequest::BinData { .. } => QueryKind::BinData,
            QueryRequest::List { .. } => QueryKind::List,
            QueryRequest::Query { .. } => QueryKind::Query,
        }
    }

    pub(crate) fn into_message(self, qid: Qid, sub: bool) -> Message {
        match self {
            QueryRequest::Node { id } => Message::Get { qid, id, sub },
            QueryRequest::Data { id, key } => Message::GetData { qid, id, key, sub },
            QueryRequest::BinData { id, key, start, end } => Message::GetBinData {
                qid,
                id,
                key,
                start,
                end,
                sub,
            },
            QueryRequest::List {
                parent,
                tags,
                pos_filter,
            } => Message::GetList {
                qid,
                parent,
                tags,
                pos_filter,
                sub,
            },
            QueryRequest::Query {
                node,
                query,
                params,
            } => Message::GetQuery {
                qid,
                node,
                query,
                params,
                sub,
            },
        }
    }
}

/// Result of a child listing: present children and ids that went away.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListUpdate {
    pub objs: Vec<Node>,
    pub gone: Vec<NodeId>,
}

/// Result of a plugin query, with the checks the plugin recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub result: Value,
    pub checks: Vec<Check>,
}

/// One successful reply on a qid.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryReply {
    Node(Node),
    Data(Value),
    BinData(Bytes),
    List(ListUpdate),
    Query(QueryResult),
}

impl QueryReply {
    pub fn kind(&self) -> QueryKind {
        match self {
            QueryReply::Node(_) => QueryKind::Node,
            QueryReply::Data(_) => QueryKind::Data,
            QueryReply::BinData(_) => QueryKind::BinData,
            QueryReply::List(_) => QueryKind::List,
            QueryReply::Query(_) => QueryKind::Query,
        }
    }

    /// Split a reply-family message into its qid and payload.
    /// Returns the message back if it is not a reply.
    pub(crate) fn from_message(msg: Message) -> Result<(Qid, QueryReply), Message> {
        match msg {
            Message::GetReply { qid, obj } => Ok((qid, QueryReply::Node(obj))),
            Message::GetDataReply { qid, data } => Ok((qid, QueryReply::Data(data))),
            Message::GetBinDataReply { qid, data } => Ok((qid, QueryReply::BinData(data))),
            Message::GetListReply { qid, objs, gone } => {
                Ok((qid, QueryReply::List(ListUpdate { objs, gone })))
            }
            Message::GetQueryReply {
                qid,
                result,
                checks,
            } => Ok((qid, QueryReply::Query(QueryResult { result, checks }))),
            other => Err(other),
        }
    }
}

/// Typed projection of a [`QueryReply`].
pub trait FromReply: Sized {
    fn from_reply(reply: QueryReply) -> Result<Self, ClientError>;
}

impl FromReply for QueryReply {
    fn from_reply(reply: QueryReply) -> Result<Self, ClientError> {
        Ok(reply)
    }
}

macro_rules! from_reply {
    ($ty:ty, $variant:ident, $kind:ident) => {
        impl FromReply for $ty {
            fn from_reply(reply: QueryReply) -> Result<Self, ClientError> {
                match reply {
                    QueryReply::$variant(inner) => Ok(inner),
                    other => Err(ClientError::UnexpectedReply {
                        expected: QueryKind::$kind.reply_tag(),
                        actual: other.kind().reply_tag(),
                    }),
                }
            }
        }
    };
}

from_reply!(Node, Node, Node);
from_reply!(Value, Data, Data);
from_reply!(Bytes, BinData, BinData);
from_reply!(ListUpdate, List, List);
from_reply!(QueryResult, Query, Query);
