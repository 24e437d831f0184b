//! Subscription handles.

use crate::connection::Connection;
use crate::domain::error::ClientResult;
use crate::domain::pending::{OpenSubscription, QueryItem};
use crate::domain::reply::FromReply;
use nodetree_proto::Qid;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// A standing query.
///
/// Yields every update the server pushes for the qid, with domain errors
/// interleaved (they do not end the subscription). The sequence ends only
/// after `subscription_cancelled` is received or the connection fails.
///
/// Dropping the handle without calling [`Subscription::cancel`] sends a
/// best-effort cancellation in the background. A handle whose sequence has
/// already ended never touches a later subscription that reuses its qid.
pub struct Subscription<T> {
    qid: Qid,
    generation: u64,
    conn: Connection,
    updates: mpsc::UnboundedReceiver<QueryItem>,
    cancel_requested: bool,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T: FromReply> Subscription<T> {
    pub(crate) fn new(conn: Connection, opened: OpenSubscription) -> Self {
        Self {
            qid: opened.qid,
            generation: opened.generation,
            conn,
            updates: opened.updates,
            cancel_requested: false,
            finished: false,
            _marker: PhantomData,
        }
    }

    pub fn qid(&self) -> Qid {
        self.qid
    }

    /// Next update; `None` once the subscription has ended.
    pub async fn next(&mut self) -> Option<ClientResult<T>> {
        let item = self.updates.recv().await;
        self.finished |= item.is_none();
        item.map(|item| item.and_then(T::from_reply))
    }

    /// Ask the server to cancel and wait for its confirmation.
    ///
    /// Updates that arrived before the confirmation stay readable through
    /// [`Subscription::next`], which then returns `None`.
    pub async fn cancel(&mut self) -> ClientResult<()> {
        self.cancel_requested = true;
        self.conn
            .cancel_generation(self.qid, Some(self.generation))
            .await
    }
}

impl<T: FromReply> Stream for Subscription<T> {
    type Item = ClientResult<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = this.updates.poll_recv(cx);
        if let Poll::Ready(None) = polled {
            this.finished = true;
        }
        polled.map(|item| item.map(|item| item.and_then(T::from_reply)))
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if !self.cancel_requested && !self.finished {
            self.conn.cancel_detached(self.qid, self.generation);
        }
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("qid", &self.qid)
            .field("generation", &self.generation)
            .field("cancel_requested", &self.cancel_requested)
            .field("finished", &self.finished)
            .finish()
    }
}
