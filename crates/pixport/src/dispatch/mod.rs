//! At-least-once message delivery with a uniform retry loop.
//!
//! A destination is a typed channel of [`Envelope`]s. A destination that is
//! temporarily unable to accept work answers [`Reply::Busy`]; the dispatcher
//! waits and resends the identical message. Transport failures (closed
//! channel, dropped reply, elapsed send timeout) surface to the caller and
//! are never retried automatically. Every component that hands work
//! downstream sends through this one helper instead of growing its own
//! retry loop.

use std::time::Duration;

use log::debug;
use tokio::sync::{mpsc, oneshot};

use crate::error::DispatchError;

/// Reply from a destination: a result, or the retry token.
#[derive(Debug)]
pub enum Reply<T> {
    Done(T),
    /// The destination is over capacity; resend later.
    Busy,
}

/// A request plus its reply slot.
#[derive(Debug)]
pub struct Envelope<Req, Rep> {
    pub body: Req,
    pub reply_to: oneshot::Sender<Reply<Rep>>,
}

pub type Destination<Req, Rep> = mpsc::Sender<Envelope<Req, Rep>>;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    retry_delay: Duration,
    send_timeout: Option<Duration>,
}

impl Dispatcher {
    /// `retry_delay` is the pause before resending after a `Busy` reply
    /// (default deployment value: one second, scaled up by operators for
    /// slower downstreams).
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            send_timeout: None,
        }
    }

    /// Bounds the channel hand-off itself. Useful for interactive paths;
    /// the image-processing path typically leaves this unset.
    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = Some(send_timeout);
        self
    }

    /// Sends `body` to `destination`, resending for as long as the
    /// destination answers `Busy`. There is deliberately no retry ceiling:
    /// a saturated destination keeps the sender parked rather than losing
    /// the message.
    pub async fn send<Req, Rep>(
        &self,
        destination_name: &str,
        destination: &Destination<Req, Rep>,
        body: Req,
    ) -> Result<Rep, DispatchError>
    where
        Req: Clone,
    {
        let mut resends: u64 = 0;
        loop {
            let (reply_to, reply) = oneshot::channel();
            let envelope = Envelope {
                body: body.clone(),
                reply_to,
            };

            match self.send_timeout {
                Some(bound) => {
                    destination
                        .send_timeout(envelope, bound)
                        .await
                        .map_err(|e| match e {
                            mpsc::error::SendTimeoutError::Timeout(_) => {
                                DispatchError::SendTimeout(destination_name.to_string(), bound)
                            }
                            mpsc::error::SendTimeoutError::Closed(_) => {
                                DispatchError::Unreachable(destination_name.to_string())
                            }
                        })?;
                }
                None => {
                    destination.send(envelope).await.map_err(|_| {
                        DispatchError::Unreachable(destination_name.to_string())
                    })?;
                }
            }

            match reply.await {
                Ok(Reply::Done(rep)) => return Ok(rep),
                Ok(Reply::Busy) => {
                    resends += 1;
                    debug!(
                        "destination '{}' busy, resend #{} in {:?}",
                        destination_name, resends, self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(_) => return Err(DispatchError::NoReply(destination_name.to_string())),
            }
        }
    }
}
