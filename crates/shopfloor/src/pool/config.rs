use crate::{Error, JoinPolicy, Result};

/// First sequence number handed out by a fresh pool.
pub const DEFAULT_ID_BASE: u64 = 1_000;

/// Requests that may queue in one worker's inbox before dispatch waits.
pub const DEFAULT_INBOX_CAPACITY: usize = 16;

/// Settings for a [`Pool`](crate::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker slots.
    pub size: usize,
    /// Capacity of each worker's bounded inbox.
    pub inbox_capacity: usize,
    /// Starting value of the pool-wide request sequence.
    pub id_base: u64,
    /// How rounds join their responses unless a sequence overrides it.
    pub join_policy: JoinPolicy,
}

impl PoolConfig {
    pub const fn new(size: usize) -> Self {
        Self {
            size,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            id_base: DEFAULT_ID_BASE,
            join_policy: JoinPolicy::CollectAll,
        }
    }

    #[must_use]
    pub const fn with_inbox_capacity(mut self, inbox_capacity: usize) -> Self {
        self.inbox_capacity = inbox_capacity;
        self
    }

    #[must_use]
    pub const fn with_id_base(mut self, id_base: u64) -> Self {
        self.id_base = id_base;
        self
    }

    #[must_use]
    pub const fn with_join_policy(mut self, join_policy: JoinPolicy) -> Self {
        self.join_policy = join_policy;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the pool has no slots or the
    /// inboxes have no capacity.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::InvalidConfig {
                reason: "pool size must be greater than 0".to_string(),
            });
        }
        if self.inbox_capacity == 0 {
            return Err(Error::InvalidConfig {
                reason: "inbox capacity must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}
