use core::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{Call, Error, ProgressFn, Result, RoundOutput, Settlement};

/// What a `then` step receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The joined output of the `call` step right before it.
    Round(RoundOutput),
    /// The value produced by the `then` step right before it, or the
    /// instance's input when the chain starts with a `then`.
    Value(Value),
}

impl Input {
    /// Flattens the input into the value the next round sees as its prior:
    /// a round contributes its `results` array.
    pub fn into_value(self) -> Value {
        match self {
            Self::Round(round) => Value::Array(round.results),
            Self::Value(value) => value,
        }
    }

    pub const fn round(&self) -> Option<&RoundOutput> {
        match self {
            Self::Round(round) => Some(round),
            Self::Value(_) => None,
        }
    }

    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Round(_) => None,
        }
    }
}

pub type DoneFn = Arc<dyn Fn(Input) -> Result<Value> + Send + Sync>;
pub type FailFn = Arc<dyn Fn(Error) -> Result<Value> + Send + Sync>;

/// A transformation step.
///
/// `on_done` handles the previous step's success. `on_fail` handles its
/// failure and may recover with a value; without it the failure skips ahead
/// to the next step that has one. `on_progress` observes the settlements of
/// the round right before this step as they arrive.
#[derive(Clone)]
pub struct Then {
    pub(super) on_done: DoneFn,
    pub(super) on_fail: Option<FailFn>,
    pub(super) on_progress: Option<ProgressFn>,
}

impl Then {
    pub fn new<F>(on_done: F) -> Self
    where
        F: Fn(Input) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            on_done: Arc::new(on_done),
            on_fail: None,
            on_progress: None,
        }
    }

    #[must_use]
    pub fn on_fail<F>(mut self, on_fail: F) -> Self
    where
        F: Fn(Error) -> Result<Value> + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(on_fail));
        self
    }

    #[must_use]
    pub fn on_progress<F>(mut self, on_progress: F) -> Self
    where
        F: Fn(&Settlement) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(on_progress));
        self
    }

    pub(super) fn settle(&self, previous: Result<Input>) -> Result<Value> {
        match previous {
            Ok(input) => (self.on_done)(input),
            Err(e) => match &self.on_fail {
                Some(on_fail) => on_fail(e),
                None => Err(e),
            },
        }
    }
}

impl fmt::Debug for Then {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Then")
            .field("on_fail", &self.on_fail.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub(super) enum Link {
    Call { calls: Vec<Call>, recycle: bool },
    Then(Then),
}
