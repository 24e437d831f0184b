//! Inbound message routing.
//!
//! The read loop hands every decoded message to [`dispatch`], in wire
//! order. Bookkeeping (table lookups, waking waiters) happens inline under
//! the table lock; plugin invocations are spawned and never awaited here.
//!
//! An `Err` return is fatal: the caller fails the connection with it.
//! Tolerated anomalies are logged, counted and dropped.

use crate::connection::Connection;
use crate::domain::error::ConnectionFailure;
use crate::domain::lifecycle::{Activation, ConnectionState};
use crate::domain::pending::Delivery;
use crate::domain::reply::QueryReply;
use crate::domain::stats::ConnectionStats;
use crate::plugin::{self, Invocation};
use nodetree_proto::Message;
use tracing::{debug, error, info, warn};

/// Route one inbound message.
pub(crate) fn dispatch(conn: &Connection, msg: Message) -> Result<(), ConnectionFailure> {
    let tag = msg.tag();
    debug!(tag, correlation = ?msg.correlation(), "Dispatching inbound message");

    // Handshake replies are legal in any live state.
    let msg = match msg {
        Message::Connected {
            proto_version,
            server_name,
            server_version,
        } => {
            return match conn.lifecycle().activate() {
                Activation::Activated => {
                    info!(
                        proto_version,
                        server_name = %server_name,
                        server_version = %server_version,
                        "Connection active"
                    );
                    conn.set_server_info(proto_version, server_name, server_version);
                    Ok(())
                }
                Activation::Duplicate => {
                    anomaly(conn, tag, "duplicate connected message");
                    Ok(())
                }
                Activation::OutOfSequence => Err(ConnectionFailure::ProtocolViolation(
                    "connected received before authentication began".into(),
                )),
            };
        }
        Message::ConnectionError { err } => return Err(ConnectionFailure::Rejected(err)),
        Message::ProtoError { err } => return Err(ConnectionFailure::PeerProtocolError(err)),
        other => other,
    };

    let state = conn.lifecycle().state();
    if state != ConnectionState::Active {
        return Err(ConnectionFailure::ProtocolViolation(format!(
            "{} received while {}",
            tag, state
        )));
    }

    let msg = match QueryReply::from_message(msg) {
        Ok((qid, reply)) => {
            if conn.with_tables(|t| t.deliver_reply(qid, reply))? == Delivery::UnknownQid {
                ConnectionStats::incr(&conn.stats_handle().protocol_anomalies);
            }
            return Ok(());
        }
        Err(msg) => msg,
    };

    let msg = match Invocation::from_message(msg) {
        Ok((phid, invocation)) => {
            match conn.with_tables(|t| t.handler(phid)) {
                Some(handler) => plugin::spawn_invocation(conn, phid, handler, invocation),
                None => {
                    // Dropped without a response.
                    error!(
                        phid,
                        id = invocation.id(),
                        capability = invocation.capability(),
                        "Plugin invocation for unknown handler"
                    );
                    ConnectionStats::incr(&conn.stats_handle().protocol_anomalies);
                }
            }
            return Ok(());
        }
        Err(msg) => msg,
    };

    match msg {
        Message::QueryError { qid, err, checks } => {
            if conn.with_tables(|t| t.deliver_query_error(qid, err, checks)) == Delivery::UnknownQid {
                ConnectionStats::incr(&conn.stats_handle().protocol_anomalies);
            }
            Ok(())
        }
        Message::SubscriptionCancelled { qid } => {
            conn.with_tables(|t| t.confirm_cancel(qid))?;
            debug!(qid, "Subscription cancelled");
            Ok(())
        }

        Message::RequestAck { rid } => conn.with_tables(|t| t.complete_request(rid, Ok(()))),
        Message::RequestError { rid, err } => {
            conn.with_tables(|t| t.complete_request(rid, Err(err)))
        }

        Message::MethodResult { mid, result } => {
            conn.with_tables(|t| t.complete_method(mid, Ok(result)))
        }
        Message::MethodError { mid, err } => conn.with_tables(|t| t.complete_method(mid, Err(err))),

        Message::BroadcastResult { bid, results } => {
            conn.with_tables(|t| t.complete_broadcast(bid, results))
        }

        Message::PluginHandlerUnregistered { phid } => {
            // In-flight invocations hold their own handler reference.
            if conn.with_tables(|t| t.unregister_handler(phid)).is_none() {
                anomaly(conn, tag, "unregistration of unknown plugin handler");
            } else {
                info!(phid, "Plugin handler unregistered");
            }
            Ok(())
        }

        // Handled above.
        Message::Connected { .. }
        | Message::ConnectionError { .. }
        | Message::ProtoError { .. }
        | Message::GetReply { .. }
        | Message::GetDataReply { .. }
        | Message::GetBinDataReply { .. }
        | Message::GetListReply { .. }
        | Message::GetQueryReply { .. }
        | Message::PluginMethodRun { .. }
        | Message::PluginQueryGet { .. }
        | Message::PluginBroadcastRun { .. }
        | Message::PluginTriggerRun { .. } => Ok(()),

        // Client-to-server messages have no business arriving here.
        Message::Connect { .. }
        | Message::Get { .. }
        | Message::GetData { .. }
        | Message::GetBinData { .. }
        | Message::GetList { .. }
        | Message::GetQuery { .. }
        | Message::CancelSubscription { .. }
        | Message::Create { .. }
        | Message::Delete { .. }
        | Message::SetParent { .. }
        | Message::SetPos { .. }
        | Message::AddTag { .. }
        | Message::DelTag { .. }
        | Message::SetAttr { .. }
        | Message::SetData { .. }
        | Message::SetBinData { .. }
        | Message::MethodRun { .. }
        | Message::BroadcastRun { .. }
        | Message::PluginMethodResult { .. }
        | Message::PluginMethodError { .. }
        | Message::PluginQueryResult { .. }
        | Message::PluginQueryError { .. }
        | Message::PluginBroadcastResult { .. }
        | Message::PluginTriggerDone { .. }
        | Message::PluginTriggerError { .. } => Err(ConnectionFailure::ProtocolViolation(
            format!("server sent client-side message {}", tag),
        )),
    }
}

fn anomaly(conn: &Connection, tag: &'static str, what: &'static str) {
    warn!(tag, "Tolerated protocol anomaly: {}", what);
    ConnectionStats::incr(&conn.stats_handle().protocol_anomalies);
}
