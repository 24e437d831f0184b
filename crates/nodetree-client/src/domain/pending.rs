//! Pending-operation tables and the plugin handler registry.
//!
//! All correlation state of one connection lives in [`CorrelationTables`]:
//! one map per identifier space, the handler registry, and the allocator
//! that keeps ids unique among outstanding entries. The connection wraps it
//! in a single mutex; nothing here awaits.
//!
//! Flow:
//! 1. Facade calls `open_*()` to allocate an id and get a receiver
//! 2. Facade sends the request message carrying that id
//! 3. Dispatcher calls `deliver_*()` / `complete_*()` on the matching reply
//! 4. Facade awaits the receiver
//!
//! When the connection terminates, `drain()` resolves every waiter with the
//! failure and leaves the tables empty.

use crate::domain::error::{ClientError, ConnectionFailure};
use crate::domain::ids::{IdAllocator, IdSpace};
use crate::domain::reply::{QueryKind, QueryReply};
use crate::plugin::PluginHandler;
use nodetree_proto::{Bid, Check, Mid, Phid, Qid, RemoteError, Rid, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Item carried to a query waiter.
pub type QueryItem = Result<QueryReply, ClientError>;

/// Completion slot of a single-answer operation.
pub type Completion<T> = oneshot::Receiver<Result<T, ClientError>>;

/// Lifecycle of a pending query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    AwaitingFirstReply,
    Subscribed,
    CancelRequested,
}

enum QueryTarget {
    OneShot(oneshot::Sender<QueryItem>),
    Subscription(mpsc::UnboundedSender<QueryItem>),
}

struct PendingQuery {
    kind: QueryKind,
    /// Distinguishes this entry from earlier ones that held the same qid.
    generation: u64,
    state: QueryState,
    target: QueryTarget,
    cancel_waiters: Vec<oneshot::Sender<Result<(), ClientError>>>,
}

struct PendingCall<T> {
    /// Operation name (for logging)
    op: &'static str,
    sender: oneshot::Sender<Result<T, ClientError>>,
}

impl<T> PendingCall<T> {
    fn resolve(self, result: Result<T, ClientError>) -> bool {
        self.sender.send(result).is_ok()
    }
}

/// What happened to a reply addressed at a qid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the waiter (or the waiter had already gone away).
    Delivered,
    /// No entry for the qid; a benign race with cancellation.
    UnknownQid,
}

/// Result of asking to cancel a subscription.
pub struct CancelTicket {
    /// Whether the caller must send `cancel_subscription` (false if a
    /// cancel is already in flight).
    pub send: bool,
    pub confirmed: Completion<()>,
}

/// A freshly registered subscription.
#[derive(Debug)]
pub struct OpenSubscription {
    pub qid: Qid,
    pub generation: u64,
    pub updates: mpsc::UnboundedReceiver<QueryItem>,
}

/// What `drain()` left behind.
///
/// The handlers are handed back so the caller drops them after releasing
/// the table lock: a handler may own a [`Subscription`] whose drop takes
/// that lock again.
///
/// [`Subscription`]: crate::Subscription
pub struct Drained {
    pub failed: usize,
    pub handlers: HashMap<Phid, Arc<dyn PluginHandler>>,
}

/// Sizes of every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub queries: usize,
    pub requests: usize,
    pub methods: usize,
    pub broadcasts: usize,
    pub handlers: usize,
}

impl PendingCounts {
    /// Outstanding operations, excluding registered handlers.
    pub fn operations(&self) -> usize {
        self.queries + self.requests + self.methods + self.broadcasts
    }
}

/// Correlation state of one connection.
#[derive(Default)]
pub struct CorrelationTables {
    ids: IdAllocator,
    queries: HashMap<Qid, PendingQuery>,
    requests: HashMap<Rid, PendingCall<()>>,
    methods: HashMap<Mid, PendingCall<Value>>,
    broadcasts: HashMap<Bid, PendingCall<Vec<Value>>>,
    handlers: HashMap<Phid, Arc<dyn PluginHandler>>,
    generations: u64,
    terminated: Option<ConnectionFailure>,
}

fn register_call<T>(
    ids: &mut IdAllocator,
    table: &mut HashMap<u64, PendingCall<T>>,
    space: IdSpace,
    op: &'static str,
) -> (u64, Completion<T>) {
    let id = ids.allocate(space);
    let (sender, receiver) = oneshot::channel();
    table.insert(id, PendingCall { op, sender });
    debug!(space = %space, id, op, "Registered pending operation");
    (id, receiver)
}

fn take_call<T>(
    ids: &mut IdAllocator,
    table: &mut HashMap<u64, PendingCall<T>>,
    space: IdSpace,
    id: u64,
) -> Result<PendingCall<T>, ConnectionFailure> {
    let call = table.remove(&id).ok_or_else(|| {
        ConnectionFailure::ProtocolViolation(format!("reply for unknown {} id {}", space, id))
    })?;
    ids.release(space, id);
    Ok(call)
}

impl CorrelationTables {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.generations = self.generations.wrapping_add(1);
        self.generations
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        match &self.terminated {
            Some(failure) => Err(ClientError::Connection(failure.clone())),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Register a one-shot query under a fresh qid.
    pub fn open_query(&mut self, kind: QueryKind) -> Result<(Qid, Completion<QueryReply>), ClientError> {
        self.ensure_open()?;
        let qid = self.ids.allocate(IdSpace::Query);
        let generation = self.next_generation();
        let (sender, receiver) = oneshot::channel();
        self.queries.insert(
            qid,
            PendingQuery {
                kind,
                generation,
                state: QueryState::AwaitingFirstReply,
                target: QueryTarget::OneShot(sender),
                cancel_waiters: Vec::new(),
            },
        );
        debug!(qid, ?kind, "Registered one-shot query");
        Ok((qid, receiver))
    }

    /// Register a subscription, under `qid` if given.
    ///
    /// A caller-chosen qid that is still outstanding is rejected here,
    /// before anything is sent.
    pub fn open_subscription(
        &mut self,
        kind: QueryKind,
        qid: Option<Qid>,
    ) -> Result<OpenSubscription, ClientError> {
        self.ensure_open()?;
        let qid = match qid {
            Some(qid) => {
                self.ids.reserve(IdSpace::Query, qid)?;
                qid
            }
            None => self.ids.allocate(IdSpace::Query),
        };
        let generation = self.next_generation();
        let (sender, updates) = mpsc::unbounded_channel();
        self.queries.insert(
            qid,
            PendingQuery {
                kind,
                generation,
                state: QueryState::AwaitingFirstReply,
                target: QueryTarget::Subscription(sender),
                cancel_waiters: Vec::new(),
            },
        );
        debug!(qid, generation, ?kind, "Registered subscription");
        Ok(OpenSubscription {
            qid,
            generation,
            updates,
        })
    }

    /// Route a successful reply to its query.
    ///
    /// One-shot entries are removed; subscriptions stay until
    /// `subscription_cancelled`. A reply of the wrong kind is a violation.
    pub fn deliver_reply(&mut self, qid: Qid, reply: QueryReply) -> Result<Delivery, ConnectionFailure> {
        let Some(entry) = self.queries.get_mut(&qid) else {
            warn!(qid, tag = reply.kind().reply_tag(), "Reply for unknown qid, dropping");
            return Ok(Delivery::UnknownQid);
        };

        if entry.kind != reply.kind() {
            return Err(ConnectionFailure::ProtocolViolation(format!(
                "qid {} expected {} but got {}",
                qid,
                entry.kind.reply_tag(),
                reply.kind().reply_tag()
            )));
        }

        if let QueryTarget::Subscription(sender) = &entry.target {
            if sender.send(Ok(reply)).is_err() {
                debug!(qid, "Subscription receiver dropped");
            }
            if entry.state == QueryState::AwaitingFirstReply {
                entry.state = QueryState::Subscribed;
            }
            return Ok(Delivery::Delivered);
        }

        if let Some(PendingQuery {
            target: QueryTarget::OneShot(sender),
            ..
        }) = self.take_query(qid)
        {
            if sender.send(Ok(reply)).is_err() {
                debug!(qid, "One-shot query receiver dropped");
            }
        }
        Ok(Delivery::Delivered)
    }

    /// Route a `query_error`. Subscriptions keep their entry.
    pub fn deliver_query_error(
        &mut self,
        qid: Qid,
        error: RemoteError,
        checks: Vec<Check>,
    ) -> Delivery {
        let Some(entry) = self.queries.get(&qid) else {
            warn!(qid, code = %error.code, "Query error for unknown qid, dropping");
            return Delivery::UnknownQid;
        };

        let item = Err(ClientError::Query { error, checks });
        if let QueryTarget::Subscription(sender) = &entry.target {
            let _ = sender.send(item);
            return Delivery::Delivered;
        }

        if let Some(PendingQuery {
            target: QueryTarget::OneShot(sender),
            ..
        }) = self.take_query(qid)
        {
            let _ = sender.send(item);
        }
        Delivery::Delivered
    }

    /// Mark a subscription as cancelling and register a confirmation waiter.
    ///
    /// With `generation` set, only the entry registered under that
    /// generation matches; a later subscription reusing the qid does not.
    pub fn request_cancel(
        &mut self,
        qid: Qid,
        generation: Option<u64>,
    ) -> Result<CancelTicket, ClientError> {
        self.ensure_open()?;
        let entry = match self.queries.get_mut(&qid) {
            Some(entry)
                if matches!(entry.target, QueryTarget::Subscription(_))
                    && generation.map_or(true, |g| g == entry.generation) =>
            {
                entry
            }
            _ => return Err(ClientError::NotSubscribed(qid)),
        };
        let send = entry.state != QueryState::CancelRequested;
        entry.state = QueryState::CancelRequested;
        let (sender, confirmed) = oneshot::channel();
        entry.cancel_waiters.push(sender);
        debug!(qid, send, "Cancellation requested");
        Ok(CancelTicket { send, confirmed })
    }

    /// Handle `subscription_cancelled`: the entry goes away now, and only now.
    pub fn confirm_cancel(&mut self, qid: Qid) -> Result<(), ConnectionFailure> {
        let entry = self.take_query(qid).ok_or_else(|| {
            ConnectionFailure::ProtocolViolation(format!(
                "subscription_cancelled for unknown qid {}",
                qid
            ))
        })?;
        if entry.state != QueryState::CancelRequested {
            debug!(qid, "Server cancelled subscription unprompted");
        }
        for waiter in entry.cancel_waiters {
            let _ = waiter.send(Ok(()));
        }
        // Dropping the target ends the subscription stream.
        Ok(())
    }

    fn take_query(&mut self, qid: Qid) -> Option<PendingQuery> {
        let entry = self.queries.remove(&qid)?;
        self.ids.release(IdSpace::Query, qid);
        Some(entry)
    }

    pub fn query_state(&self, qid: Qid) -> Option<QueryState> {
        self.queries.get(&qid).map(|entry| entry.state)
    }

    // ------------------------------------------------------------------
    // Requests, methods, broadcasts
    // ------------------------------------------------------------------

    pub fn open_request(&mut self, op: &'static str) -> Result<(Rid, Completion<()>), ClientError> {
        self.ensure_open()?;
        Ok(register_call(&mut self.ids, &mut self.requests, IdSpace::Request, op))
    }

    pub fn open_method(&mut self, op: &'static str) -> Result<(Mid, Completion<Value>), ClientError> {
        self.ensure_open()?;
        Ok(register_call(&mut self.ids, &mut self.methods, IdSpace::Method, op))
    }

    pub fn open_broadcast(
        &mut self,
        op: &'static str,
    ) -> Result<(Bid, Completion<Vec<Value>>), ClientError> {
        self.ensure_open()?;
        Ok(register_call(&mut self.ids, &mut self.broadcasts, IdSpace::Broadcast, op))
    }

    /// `request_ack` / `request_error`.
    pub fn complete_request(&mut self, rid: Rid, result: Result<(), RemoteError>) -> Result<(), ConnectionFailure> {
        let call = take_call(&mut self.ids, &mut self.requests, IdSpace::Request, rid)?;
        debug!(rid, op = call.op, ok = result.is_ok(), "Completed request");
        call.resolve(result.map_err(ClientError::Remote));
        Ok(())
    }

    /// `method_result` / `method_error`.
    pub fn complete_method(&mut self, mid: Mid, result: Result<Value, RemoteError>) -> Result<(), ConnectionFailure> {
        let call = take_call(&mut self.ids, &mut self.methods, IdSpace::Method, mid)?;
        debug!(mid, op = call.op, ok = result.is_ok(), "Completed method call");
        call.resolve(result.map_err(ClientError::Remote));
        Ok(())
    }

    /// `broadcast_result`.
    pub fn complete_broadcast(&mut self, bid: Bid, results: Vec<Value>) -> Result<(), ConnectionFailure> {
        let call = take_call(&mut self.ids, &mut self.broadcasts, IdSpace::Broadcast, bid)?;
        debug!(bid, op = call.op, results = results.len(), "Completed broadcast");
        call.resolve(Ok(results));
        Ok(())
    }

    /// Drop an entry whose request never made it onto the wire.
    pub fn abandon(&mut self, space: IdSpace, id: u64) {
        let removed = match space {
            IdSpace::Query => self.queries.remove(&id).is_some(),
            IdSpace::Request => self.requests.remove(&id).is_some(),
            IdSpace::Method => self.methods.remove(&id).is_some(),
            IdSpace::Broadcast => self.broadcasts.remove(&id).is_some(),
        };
        if removed {
            self.ids.release(space, id);
            debug!(space = %space, id, "Abandoned pending operation");
        }
    }

    // ------------------------------------------------------------------
    // Plugin handlers
    // ------------------------------------------------------------------

    /// Returns the handler previously bound to `phid`, if any.
    pub fn register_handler(
        &mut self,
        phid: Phid,
        handler: Arc<dyn PluginHandler>,
    ) -> Option<Arc<dyn PluginHandler>> {
        self.handlers.insert(phid, handler)
    }

    pub fn unregister_handler(&mut self, phid: Phid) -> Option<Arc<dyn PluginHandler>> {
        self.handlers.remove(&phid)
    }

    pub fn handler(&self, phid: Phid) -> Option<Arc<dyn PluginHandler>> {
        self.handlers.get(&phid).cloned()
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Resolve every waiter with `failure` and clear all state.
    ///
    /// Later `open_*` calls fail immediately with the same failure.
    pub fn drain(&mut self, failure: &ConnectionFailure) -> Drained {
        if self.terminated.is_none() {
            self.terminated = Some(failure.clone());
        }
        let err = ClientError::Connection(failure.clone());
        let mut failed = 0;

        for (_, entry) in self.queries.drain() {
            failed += 1;
            match entry.target {
                QueryTarget::OneShot(sender) => {
                    let _ = sender.send(Err(err.clone()));
                }
                QueryTarget::Subscription(sender) => {
                    let _ = sender.send(Err(err.clone()));
                }
            }
            for waiter in entry.cancel_waiters {
                let _ = waiter.send(Err(err.clone()));
            }
        }
        for (_, call) in self.requests.drain() {
            failed += 1;
            call.resolve(Err(err.clone()));
        }
        for (_, call) in self.methods.drain() {
            failed += 1;
            call.resolve(Err(err.clone()));
        }
        for (_, call) in self.broadcasts.drain() {
            failed += 1;
            call.resolve(Err(err.clone()));
        }
        self.ids.release_all();
        Drained {
            failed,
            handlers: std::mem::take(&mut self.handlers),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            queries: self.queries.len(),
            requests: self.requests.len(),
            methods: self.methods.len(),
            broadcasts: self.broadcasts.len(),
            handlers: self.handlers.len(),
        }
    }
}
