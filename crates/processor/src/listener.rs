use tokio::sync::oneshot;

use crate::ProcessError;

/// Completion callback for one `process` call. Invoked exactly once, from
/// the worker task.
pub type CompletionListener = Box<dyn FnOnce(Result<(), ProcessError>) + Send + 'static>;

/// Adapter for callers who prefer awaiting the outcome.
///
/// Returns a listener and the receiver its result will arrive on. If the
/// caller drops the receiver the result is discarded.
pub fn oneshot_listener() -> (
    CompletionListener,
    oneshot::Receiver<Result<(), ProcessError>>,
) {
    let (tx, rx) = oneshot::channel();
    let listener: CompletionListener = Box::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (listener, rx)
}
