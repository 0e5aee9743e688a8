//! The executor abstraction the core dispatches continuations onto.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;

use crate::Failure;

/// A unit of work submitted to an executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// Accepts submitted work, possibly with a priority.
///
/// Implementations decide where and when a submitted job runs. A submission
/// that returns `Err` must have dropped the job without running it, and must
/// never run it later; the core relies on this to fall back to inline
/// delivery with the submission failure folded into the outcome.
pub trait Executor: Send + Sync {
    /// Submits a job for execution.
    ///
    /// # Errors
    ///
    /// Returns the reason the job was rejected. The job must have been
    /// dropped, unrun, before this returns.
    fn submit(&self, job: Job) -> Result<(), Failure>;

    /// Submits a job at the given priority.
    ///
    /// Only called when [`priority_classes`][Self::priority_classes] reports
    /// more than one class. The default forwards to plain [`submit`][Self::submit].
    ///
    /// # Errors
    ///
    /// As for [`submit`][Self::submit].
    fn submit_with_priority(&self, job: Job, priority: i8) -> Result<(), Failure> {
        let _ = priority;
        self.submit(job)
    }

    /// Number of distinct priority classes this executor recognizes.
    ///
    /// Always at least 1.
    fn priority_classes(&self) -> usize {
        1
    }
}

/// Runs every submitted job immediately on the submitting thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, job: Job) -> Result<(), Failure> {
        job();
        Ok(())
    }
}

/// Queues submitted jobs until explicitly drained.
///
/// Deterministic by construction, which makes it the executor of choice for
/// tests and for callers that want to control exactly when continuations run.
/// Jobs drain highest priority first, FIFO within a priority.
pub struct ManualExecutor {
    queue: Mutex<VecDeque<(i8, Job)>>,
    priority_classes: usize,
}

impl ManualExecutor {
    /// Creates an executor with a single priority class.
    #[must_use]
    pub fn new() -> Self {
        Self::with_priorities(1)
    }

    /// Creates an executor that recognizes `classes` priority classes.
    ///
    /// # Panics
    ///
    /// Panics if `classes` is zero.
    #[must_use]
    pub fn with_priorities(classes: usize) -> Self {
        assert!(classes >= 1, "an executor has at least one priority class");

        Self {
            queue: Mutex::new(VecDeque::new()),
            priority_classes: classes,
        }
    }

    /// Number of jobs waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Runs the highest-priority pending job, if any. Returns whether a job ran.
    pub fn run_one(&self) -> bool {
        let job = {
            let mut queue = self.queue.lock();

            let best = queue
                .iter()
                .enumerate()
                .max_by_key(|&(index, &(priority, _))| {
                    // Highest priority wins; on ties the earliest submission
                    // wins, hence the negated index.
                    (priority, -(index as isize))
                })
                .map(|(index, _)| index);

            best.and_then(|index| queue.remove(index))
        };

        match job {
            Some((_, job)) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs pending jobs until the queue is empty, including jobs submitted
    /// by the jobs themselves. Returns the number of jobs run.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;

        while self.run_one() {
            ran += 1;
        }

        ran
    }
}

impl Default for ManualExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for ManualExecutor {
    fn submit(&self, job: Job) -> Result<(), Failure> {
        self.queue.lock().push_back((0, job));
        Ok(())
    }

    fn submit_with_priority(&self, job: Job, priority: i8) -> Result<(), Failure> {
        self.queue.lock().push_back((priority, job));
        Ok(())
    }

    fn priority_classes(&self) -> usize {
        self.priority_classes
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .field("priority_classes", &self.priority_classes)
            .finish()
    }
}
