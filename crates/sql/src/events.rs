//! Execution events for observers.
//!
//! Observers are notified before a statement is prepared and after it has been
//! finalized. Notification is skipped entirely when nothing is subscribed, and a
//! failing or panicking observer is logged and otherwise ignored.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::Error;
use crate::value::BoundParameter;

/// Receives execution events.
pub trait ExecutionObserver: Send + Sync {
    /// Called with the final SQL text and a summary of its parameters.
    ///
    /// # Errors
    ///
    /// Errors are logged and never affect the statement.
    fn before_execute(&self, event: &BeforeExecute<'_>) -> anyhow::Result<()>;

    /// Called once the statement has finished, successfully or not.
    ///
    /// # Errors
    ///
    /// Errors are logged and never affect the statement.
    fn after_execute(&self, event: &AfterExecute<'_>) -> anyhow::Result<()>;
}

/// Pre-execute notification.
#[derive(Debug, Clone, Copy)]
pub struct BeforeExecute<'a> {
    /// SQL text as sent to the engine.
    pub sql: &'a str,
    /// Parameters bound to the statement.
    pub parameters: ParameterSummary<'a>,
}

/// Post-execute notification.
#[derive(Debug, Clone, Copy)]
pub struct AfterExecute<'a> {
    /// SQL text as sent to the engine.
    pub sql: &'a str,
    /// Time from preparation to finalization.
    pub elapsed: Duration,
    /// The failure, if the statement failed.
    pub error: Option<&'a Error>,
}

/// Renders parameters as `ordinal:kind=value`, with text and blob payloads
/// reduced to their byte lengths.
#[derive(Debug, Clone, Copy)]
pub struct ParameterSummary<'a>(pub &'a [BoundParameter]);

impl ParameterSummary<'_> {
    /// Number of parameters.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the statement has no parameters.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParameterSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{}={}", p.ordinal, p.kind, p.value)?;
        }
        Ok(())
    }
}

/// Shared list of observers.
#[derive(Clone, Default)]
pub struct Observers {
    inner: Arc<RwLock<Vec<Arc<dyn ExecutionObserver>>>>,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("count", &self.inner.read().len()).finish()
    }
}

impl Observers {
    /// Adds an observer.
    pub fn subscribe(&self, observer: Arc<dyn ExecutionObserver>) {
        self.inner.write().push(observer);
    }

    /// Removes every observer.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Whether any observer is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub(crate) fn before(&self, sql: &str, params: &[BoundParameter]) {
        let observers = self.inner.read();
        if observers.is_empty() {
            return;
        }
        let event = BeforeExecute {
            sql,
            parameters: ParameterSummary(params),
        };
        for observer in observers.iter() {
            notify("before_execute", || observer.before_execute(&event));
        }
    }

    pub(crate) fn after(&self, sql: &str, elapsed: Duration, error: Option<&Error>) {
        let observers = self.inner.read();
        if observers.is_empty() {
            return;
        }
        let event = AfterExecute { sql, elapsed, error };
        for observer in observers.iter() {
            notify("after_execute", || observer.after_execute(&event));
        }
    }
}

fn notify(hook: &'static str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(hook, error = %e, "execution observer failed"),
        Err(_) => tracing::warn!(hook, "execution observer panicked"),
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::value::{EngineKind, RawValue};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl ExecutionObserver for Recorder {
        fn before_execute(&self, event: &BeforeExecute<'_>) -> anyhow::Result<()> {
            self.seen.lock().push(format!("before {} [{}]", event.sql, event.parameters));
            Ok(())
        }

        fn after_execute(&self, event: &AfterExecute<'_>) -> anyhow::Result<()> {
            self.seen.lock().push(format!("after {} {}", event.sql, event.error.is_some()));
            Ok(())
        }
    }

    struct Failing;

    impl ExecutionObserver for Failing {
        fn before_execute(&self, _: &BeforeExecute<'_>) -> anyhow::Result<()> {
            anyhow::bail!("observer unavailable")
        }

        fn after_execute(&self, _: &AfterExecute<'_>) -> anyhow::Result<()> {
            panic!("observer panicked")
        }
    }

    #[test]
    fn summary_format() {
        let params = [
            BoundParameter {
                ordinal: 1,
                kind: EngineKind::Integer64,
                value: RawValue::Integer(7),
            },
            BoundParameter {
                ordinal: 2,
                kind: EngineKind::Text,
                value: RawValue::Text("hello".to_string()),
            },
        ];
        assert_eq!(ParameterSummary(&params).to_string(), "1:integer=7, 2:text=text(5 bytes)");
    }

    #[test]
    fn failing_observers_do_not_stop_others() {
        let observers = Observers::default();
        let recorder = Arc::new(Recorder::default());
        observers.subscribe(Arc::new(Failing));
        observers.subscribe(Arc::clone(&recorder) as Arc<dyn ExecutionObserver>);

        observers.before("SELECT 1", &[]);
        observers.after("SELECT 1", Duration::from_millis(1), Some(&Error::NoRows));

        let seen = recorder.seen.lock();
        assert_eq!(seen.as_slice(), ["before SELECT 1 []", "after SELECT 1 true"]);
    }
}
