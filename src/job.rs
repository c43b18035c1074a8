//! Job definitions.
//!
//! A [`JobDescriptor`] is the immutable description of one unit of work: the
//! closure to run, its priority class, an optional [`Counter`] to signal on
//! completion and the stack size of the fiber that will run it.

use crate::counter::Counter;
use serde::{Deserialize, Serialize};

/// Priority class of a job.
///
/// Selection always drains `High` before `Normal` before `Low`. Within one
/// class jobs run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    /// All priorities, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Stack size used when a descriptor does not request one (256 KiB).
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack a fiber is given, whatever the descriptor asks for.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// A unit of work to be executed by the scheduler.
///
/// Built once and moved into exactly one fiber on submission.
pub struct JobDescriptor {
    work: Box<dyn FnOnce() + Send + 'static>,
    priority: Priority,
    counter: Option<Counter>,
    stack_size: Option<usize>,
}

impl JobDescriptor {
    /// Creates a normal-priority job with no counter.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        JobDescriptor {
            work: Box::new(work),
            priority: Priority::Normal,
            counter: None,
            stack_size: None,
        }
    }

    /// Creates a job tied to `counter`.
    pub fn with_counter<F>(work: F, counter: Counter) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(work).counter(counter)
    }

    /// Sets the priority class.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Ties the job to a counter that is incremented on submission and
    /// decremented when the job returns.
    pub fn counter(mut self, counter: Counter) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Requests a specific fiber stack size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn priority_class(&self) -> Priority {
        self.priority
    }

    pub fn counter_ref(&self) -> Option<&Counter> {
        self.counter.as_ref()
    }

    /// The requested stack size, if any.
    pub fn requested_stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub(crate) fn into_parts(self) -> (Box<dyn FnOnce() + Send + 'static>, Option<Counter>) {
        (self.work, self.counter)
    }
}

impl std::fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("priority", &self.priority)
            .field("counter", &self.counter)
            .field("stack_size", &self.stack_size)
            .finish_non_exhaustive()
    }
}
