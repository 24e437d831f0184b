//! Plugin handlers: server-initiated calls into the client.
//!
//! The server invokes a registered handler by its `phid`. Each invocation
//! runs on its own task so the read loop keeps decoding, and produces
//! exactly one response carrying the invocation's own id, even if the
//! handler panics.

use crate::connection::Connection;
use crate::domain::stats::ConnectionStats;
use async_trait::async_trait;
use nodetree_proto::{codes, Check, Message, NodeId, Phid, RemoteError, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Client-side callback target.
///
/// Every capability defaults to "unsupported", so a handler implements
/// only what it serves.
#[async_trait]
pub trait PluginHandler: Send + Sync + 'static {
    /// Run a method on `node`.
    async fn run_method(
        &self,
        _conn: &Connection,
        _node: NodeId,
        _params: Value,
    ) -> Result<Value, RemoteError> {
        Err(RemoteError::unsupported("methods"))
    }

    /// Answer a query on `node`, recording what the answer depended on.
    async fn get_query(
        &self,
        _conn: &Connection,
        _node: NodeId,
        _params: Value,
        _checks: &mut Vec<Check>,
    ) -> Result<Value, RemoteError> {
        Err(RemoteError::unsupported("queries"))
    }

    /// Run a broadcast. Partial failures belong inside the results.
    async fn run_broadcast(&self, _conn: &Connection, _params: Value) -> Vec<Value> {
        Vec::new()
    }

    /// Run a trigger on `node`.
    async fn run_trigger(
        &self,
        _conn: &Connection,
        _node: NodeId,
        _checks: &mut Vec<Check>,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::unsupported("triggers"))
    }
}

/// An inbound plugin call, stripped of its handler id.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Invocation {
    Method { pmid: u64, node: NodeId, params: Value },
    Query { pqid: u64, node: NodeId, params: Value },
    Broadcast { pbid: u64, params: Value },
    Trigger { ptid: u64, node: NodeId },
}

impl Invocation {
    /// Split a plugin-run message into handler id and invocation.
    pub(crate) fn from_message(msg: Message) -> Result<(Phid, Invocation), Message> {
        match msg {
            Message::PluginMethodRun {
                phid,
                pmid,
                node,
                params,
            } => Ok((phid, Invocation::Method { pmid, node, params })),
            Message::PluginQueryGet {
                phid,
                pqid,
                node,
                params,
            } => Ok((phid, Invocation::Query { pqid, node, params })),
            Message::PluginBroadcastRun { phid, pbid, params } => {
                Ok((phid, Invocation::Broadcast { pbid, params }))
            }
            Message::PluginTriggerRun { phid, ptid, node } => {
                Ok((phid, Invocation::Trigger { ptid, node }))
            }
            other => Err(other),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        match self {
            Invocation::Method { pmid, .. } => *pmid,
            Invocation::Query { pqid, .. } => *pqid,
            Invocation::Broadcast { pbid, .. } => *pbid,
            Invocation::Trigger { ptid, .. } => *ptid,
        }
    }

    pub(crate) fn capability(&self) -> &'static str {
        match self {
            Invocation::Method { .. } => "method",
            Invocation::Query { .. } => "query",
            Invocation::Broadcast { .. } => "broadcast",
            Invocation::Trigger { .. } => "trigger",
        }
    }
}

fn panicked(capability: &str) -> RemoteError {
    RemoteError::new(
        codes::PLUGIN_PANICKED,
        format!("plugin {} handler panicked", capability),
    )
}

/// Run the handler and build the single response message.
///
/// The handler body runs on a nested task so a panic surfaces as a
/// `JoinError` instead of unwinding through the caller.
pub(crate) async fn invoke(
    conn: &Connection,
    handler: Arc<dyn PluginHandler>,
    invocation: Invocation,
) -> Message {
    let inner_conn = conn.clone();
    match invocation {
        Invocation::Method { pmid, node, params } => {
            let joined = tokio::spawn(async move {
                handler.run_method(&inner_conn, node, params).await
            })
            .await;
            match joined {
                Ok(Ok(result)) => Message::PluginMethodResult { pmid, result },
                Ok(Err(err)) => Message::PluginMethodError { pmid, err },
                Err(_) => Message::PluginMethodError {
                    pmid,
                    err: panicked("method"),
                },
            }
        }
        Invocation::Query { pqid, node, params } => {
            let joined = tokio::spawn(async move {
                let mut checks = Vec::new();
                let result = handler
                    .get_query(&inner_conn, node, params, &mut checks)
                    .await;
                (result, checks)
            })
            .await;
            match joined {
                Ok((Ok(result), checks)) => Message::PluginQueryResult {
                    pqid,
                    result,
                    checks,
                },
                Ok((Err(err), checks)) => Message::PluginQueryError { pqid, err, checks },
                Err(_) => Message::PluginQueryError {
                    pqid,
                    err: panicked("query"),
                    checks: Vec::new(),
                },
            }
        }
        Invocation::Broadcast { pbid, params } => {
            let joined = tokio::spawn(async move {
                handler.run_broadcast(&inner_conn, params).await
            })
            .await;
            match joined {
                Ok(results) => Message::PluginBroadcastResult { pbid, results },
                Err(_) => {
                    warn!(pbid, "Plugin broadcast handler panicked, sending empty results");
                    Message::PluginBroadcastResult {
                        pbid,
                        results: Vec::new(),
                    }
                }
            }
        }
        Invocation::Trigger { ptid, node } => {
            let joined = tokio::spawn(async move {
                let mut checks = Vec::new();
                let result = handler.run_trigger(&inner_conn, node, &mut checks).await;
                (result, checks)
            })
            .await;
            match joined {
                Ok((Ok(()), checks)) => Message::PluginTriggerDone { ptid, checks },
                Ok((Err(err), checks)) => Message::PluginTriggerError { ptid, err, checks },
                Err(_) => Message::PluginTriggerError {
                    ptid,
                    err: panicked("trigger"),
                    checks: Vec::new(),
                },
            }
        }
    }
}

/// Start an invocation on its own task. The dispatcher does not wait.
pub(crate) fn spawn_invocation(
    conn: &Connection,
    phid: Phid,
    handler: Arc<dyn PluginHandler>,
    invocation: Invocation,
) {
    let stats = conn.stats_handle();
    ConnectionStats::incr(&stats.plugin_invocations_started);
    debug!(
        phid,
        id = invocation.id(),
        capability = invocation.capability(),
        "Dispatching plugin invocation"
    );

    let conn = conn.clone();
    tokio::spawn(async move {
        let response = invoke(&conn, handler, invocation).await;
        let tag = response.tag();
        if let Err(e) = conn.send(&response).await {
            error!(phid, tag, error = %e, "Failed to send plugin response");
            return;
        }
        ConnectionStats::incr(&stats.plugin_invocations_completed);
    });
}
