use crate::{bar::Bar, error::DataError};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
};

/// Caller supplied identifier of a bar subscriber, unique across channels.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, From, Deserialize, Serialize)]
pub struct SubscriberId(pub SmolStr);

impl SubscriberId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

impl From<&str> for SubscriberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Delivery capability of a bar subscriber.
///
/// Invoked synchronously on the engine task for every bar update of the subscribed channel, so
/// implementations must not block.
pub trait BarSink {
    fn deliver(&mut self, bar: &Bar) -> Result<(), DataError>;
}

impl BarSink for Box<dyn BarSink + Send> {
    fn deliver(&mut self, bar: &Bar) -> Result<(), DataError> {
        (**self).deliver(bar)
    }
}

/// [`BarSink`] adapter for closures.
pub struct FnSink<F>(pub F);

impl<F> BarSink for FnSink<F>
where
    F: FnMut(&Bar) -> Result<(), DataError>,
{
    fn deliver(&mut self, bar: &Bar) -> Result<(), DataError> {
        (self.0)(bar)
    }
}

/// A registered (subscriber, sink) pair.
pub struct Handler {
    pub id: SubscriberId,
    sink: Box<dyn BarSink + Send>,
}

impl Handler {
    pub fn new(id: SubscriberId, sink: Box<dyn BarSink + Send>) -> Self {
        Self { id, sink }
    }

    /// Deliver a bar to the sink, converting both error returns and panics into a
    /// [`DataError`] so one faulty subscriber cannot abort delivery to others.
    pub fn deliver(&mut self, bar: &Bar) -> Result<(), DataError> {
        let sink = &mut self.sink;
        match panic::catch_unwind(AssertUnwindSafe(|| sink.deliver(bar))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|reason| reason.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panicked".to_string());

                Err(DataError::Sink {
                    subscriber: self.id.clone(),
                    reason,
                })
            }
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_deliver_isolates_panics() {
        let mut handler = Handler::new(
            SubscriberId::new("faulty"),
            Box::new(FnSink(|_: &Bar| -> Result<(), DataError> { panic!("render failed") })),
        );

        let actual = handler.deliver(&Bar::default());
        assert_eq!(
            actual,
            Err(DataError::Sink {
                subscriber: SubscriberId::new("faulty"),
                reason: "render failed".to_string(),
            })
        );
    }
}
