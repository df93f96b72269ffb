use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Delays a value until no newer value arrived for `delay`.
///
/// Each [`call`](Self::call) cancels the pending one, so a burst of calls
/// delivers only its last value to the sink, once. Dropping the debouncer
/// cancels the pending call.
///
/// # Examples
///
/// ```ignore
/// let debouncer = Debouncer::new(Duration::from_millis(600), handle, |text: String| {
///     println!("search for {text}");
/// });
/// debouncer.call("a".to_string());
/// debouncer.call("ab".to_string()); // only "ab" is delivered
/// ```
pub struct Debouncer<T> {
    delay: Duration,
    runtime: Handle,
    sink: Arc<dyn Fn(T) + Send + Sync>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new<F>(delay: Duration, runtime: Handle, sink: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            delay,
            runtime,
            sink: Arc::new(sink),
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn call(&self, value: T) {
        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            sink(value);
        });
        if let Some(previous) = self.pending.lock().replace(task) {
            previous.abort();
        }
    }

    /// Drops the pending value, if any.
    pub fn cancel(&self) {
        if let Some(previous) = self.pending.lock().take() {
            previous.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(task) = self.pending.get_mut().take() {
            task.abort();
        }
    }
}
