//! Handing query fragments to remotes and getting their answers back.
//!
//! A [`Transport`] receives every fragment queued since the last send
//! together with a [`ResponseSink`]. It may answer immediately or from
//! another task later; answers wait in the reconciler's channel until the
//! host calls [`crate::Reconciler::process_responses`].

use log::warn;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use trellis_query::{Keyword, Map, Query};

/// A remote's answer to one fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteResponse {
    pub target: Keyword,
    /// The fragment that was sent; novelty is normalized against it.
    pub query: Query,
    pub novelty: Map,
}

/// Where a transport delivers responses. Cheap to clone and `Send`.
#[derive(Clone, Debug)]
pub struct ResponseSink {
    sender: mpsc::UnboundedSender<RemoteResponse>,
}

impl ResponseSink {
    pub(crate) const fn new(sender: mpsc::UnboundedSender<RemoteResponse>) -> Self {
        Self { sender }
    }

    /// Queue `response` for merging. Returns false if the reconciler is gone.
    pub fn deliver(&self, response: RemoteResponse) -> bool {
        match self.sender.send(response) {
            Ok(()) => true,
            Err(mpsc::error::SendError(lost)) => {
                warn!("dropping response for {}: reconciler closed", lost.target);
                false
            }
        }
    }

    /// Convenience for [`Self::deliver`].
    pub fn respond(&self, target: Keyword, query: Query, novelty: Map) -> bool {
        self.deliver(RemoteResponse {
            target,
            query,
            novelty,
        })
    }
}

/// Ships fragments to remotes.
pub trait Transport {
    fn send(&mut self, fragments: BTreeMap<Keyword, Query>, sink: ResponseSink);
}

impl<F> Transport for F
where
    F: FnMut(BTreeMap<Keyword, Query>, ResponseSink),
{
    fn send(&mut self, fragments: BTreeMap<Keyword, Query>, sink: ResponseSink) {
        self(fragments, sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_fails_once_the_receiver_is_gone() {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = ResponseSink::new(sender);
        assert!(sink.respond(Keyword::new("remote"), Query::default(), Map::new()));
        drop(receiver);
        assert!(!sink.respond(Keyword::new("remote"), Query::default(), Map::new()));
    }
}
