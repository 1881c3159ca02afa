use crate::event::ReadyEvent;

/// Reacts to readiness events delivered by a worker's event loop.
///
/// One handler instance is shared by every worker of a
/// [`ThreadPool`](crate::thread_pool::ThreadPool); it is invoked on the worker
/// thread whose reactor produced the event.
pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &ReadyEvent);
}
