use core::fmt;

use futures::{SinkExt, StreamExt};
use round_based::{Delivery, Incoming, Outgoing};
use tokio::time::Instant;

use crate::ParticipantIndex;

use super::{Msg, RoundId};

/// Connection of a single participant to the rest of the tree
pub(crate) struct Link<D: Delivery<Msg>> {
    incoming: D::Receive,
    outgoing: D::Send,
}

impl<D: Delivery<Msg>> Link<D> {
    pub fn new(delivery: D) -> Self {
        let (incoming, outgoing) = delivery.split();
        Self { incoming, outgoing }
    }

    pub async fn send(&mut self, recipient: ParticipantIndex, msg: Msg) -> Result<(), IoError> {
        self.outgoing
            .send(Outgoing::p2p(recipient, msg))
            .await
            .map_err(IoError::send)
    }

    /// Receives the next message
    ///
    /// Returns `Ok(None)` if `deadline` is reached before any message arrives
    pub async fn recv(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Option<Incoming<Msg>>, IoError> {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, self.incoming.next()).await
            {
                Ok(next) => next,
                Err(_elapsed) => return Ok(None),
            },
            None => self.incoming.next().await,
        };
        match next {
            Some(Ok(incoming)) => Ok(Some(incoming)),
            Some(Err(err)) => Err(IoError::recv(err)),
            None => Err(IoError::Closed),
        }
    }

    /// Receives the next message of the `round`
    ///
    /// Messages that belong to other rounds are dropped. Returns `Ok(None)` if `deadline` is
    /// reached.
    pub async fn recv_round(
        &mut self,
        round: RoundId,
        deadline: Option<Instant>,
    ) -> Result<Option<Incoming<Msg>>, IoError> {
        loop {
            let Some(incoming) = self.recv(deadline).await? else {
                return Ok(None);
            };
            if incoming.msg.round() == round {
                return Ok(Some(incoming));
            }
            tracing::debug!(
                %round,
                sender = incoming.sender,
                other_round = %incoming.msg.round(),
                "drop message of another round"
            );
        }
    }
}

/// Message couldn't be delivered
#[derive(Debug)]
pub enum IoError {
    /// Sending a message failed
    Send(Box<dyn std::error::Error + Send + Sync>),
    /// Receiving a message failed
    Recv(Box<dyn std::error::Error + Send + Sync>),
    /// Incoming messages stream was closed
    Closed,
}

impl IoError {
    fn send(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Send(Box::new(err))
    }
    fn recv(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Recv(Box::new(err))
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoError::Send(_) => f.write_str("i/o error: send message"),
            IoError::Recv(_) => f.write_str("i/o error: recv message"),
            IoError::Closed => f.write_str("i/o error: incoming stream closed"),
        }
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IoError::Send(err) | IoError::Recv(err) => Some(&**err),
            IoError::Closed => None,
        }
    }
}
