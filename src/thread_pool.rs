//! Event-loop worker threads.
//!
//! Each worker owns one reactor and runs a blocking wait-then-dispatch loop
//! over it. There is no task queue: work reaches a worker only as readiness
//! events on sources registered with its reactor.
//!
//! ```text
//!   worker 0: reactor 0 ──wait──▶ events ──▶ handler.handle_event()
//!   worker 1: reactor 1 ──wait──▶ events ──▶ handler.handle_event()
//!   ...
//! ```
//!
//! The shutdown flag is checked between batches, so a batch that has started
//! is always dispatched to the end.

use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, Builder, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use crate::handler::EventHandler;
use crate::reactor::{PlatformReactor, Reactor};

pub const DEFAULT_POOL_CAPACITY: usize = 4;

pub struct ThreadPool<R: Reactor + 'static = PlatformReactor> {
    workers: Vec<Worker<R>>,
    shutdown: Arc<AtomicBool>,
}

impl<R: Reactor + 'static> ThreadPool<R> {
    /// Spawns one worker per reactor, named `{name}-{index}`.
    ///
    /// Workers already started are stopped again if a later spawn fails.
    pub fn spawn(
        name: &str,
        reactors: Vec<Arc<R>>,
        handler: Arc<dyn EventHandler>,
        poll_timeout: Duration,
        events_capacity: usize,
    ) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            workers: Vec::with_capacity(reactors.len()),
            shutdown,
        };

        for (id, reactor) in reactors.into_iter().enumerate() {
            let worker = Worker::spawn(
                format!("{name}-{id}"),
                id,
                reactor,
                Arc::clone(&handler),
                Arc::clone(&pool.shutdown),
                poll_timeout,
                events_capacity,
            )?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    /// Signals every worker, wakes it and waits for it to exit.
    ///
    /// A worker calling this on its own pool is signalled but not joined.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for worker in &self.workers {
            if let Err(e) = worker.reactor.wake() {
                error!(worker = worker.id, error = %e, "failed to wake worker");
            }
        }
        for worker in &mut self.workers {
            if let Some(t) = worker.take_thread() {
                if t.thread().id() == thread::current().id() {
                    continue;
                }
                if t.join().is_err() {
                    error!(worker = worker.id, "worker thread panicked");
                }
            }
        }
    }
}

impl<R: Reactor + 'static> Drop for ThreadPool<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<R> {
    id: usize,
    reactor: Arc<R>,
    thread: Option<JoinHandle<()>>,
}

impl<R: Reactor + 'static> Worker<R> {
    fn spawn(
        name: String,
        id: usize,
        reactor: Arc<R>,
        handler: Arc<dyn EventHandler>,
        shutdown: Arc<AtomicBool>,
        poll_timeout: Duration,
        events_capacity: usize,
    ) -> io::Result<Self> {
        let loop_reactor = Arc::clone(&reactor);
        let thread = Builder::new().name(name).spawn(move || {
            let mut events = Vec::with_capacity(events_capacity);
            while !shutdown.load(Ordering::Acquire) {
                if let Err(e) = loop_reactor.wait(&mut events, Some(poll_timeout)) {
                    error!(worker = id, error = %e, "reactor wait failed, stopping worker");
                    break;
                }
                for event in &events {
                    handler.handle_event(event);
                }
            }
            debug!(worker = id, "event loop stopped");
        })?;

        Ok(Self {
            id,
            reactor,
            thread: Some(thread),
        })
    }

    fn take_thread(&mut self) -> Option<JoinHandle<()>> {
        self.thread.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Interest, ReadyEvent, Token};
    use std::io::Write;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        tokens: Mutex<Vec<Token>>,
        threads: Mutex<Vec<String>>,
    }

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &ReadyEvent) {
            self.tokens.lock().unwrap().push(event.token());
            let name = thread::current().name().unwrap_or_default().to_string();
            self.threads.lock().unwrap().push(name);
        }
    }

    fn reactors(n: usize) -> Vec<Arc<PlatformReactor>> {
        (0..n)
            .map(|_| Arc::new(PlatformReactor::new(16).unwrap()))
            .collect()
    }

    fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_thread_pool_creation() {
        let handler: Arc<dyn EventHandler> = Arc::new(Recorder::default());
        let pool: ThreadPool =
            ThreadPool::spawn("test-worker", reactors(4), handler, Duration::from_millis(20), 16)
                .unwrap();
        assert_eq!(pool.workers.len(), 4);
    }

    #[test]
    fn test_events_dispatched_on_owning_worker() {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn EventHandler> = recorder.clone();
        let reactors = reactors(2);
        let _pool: ThreadPool = ThreadPool::spawn(
            "owner",
            reactors.clone(),
            handler,
            Duration::from_millis(20),
            16,
        )
        .unwrap();

        let (local, mut remote) = UnixStream::pair().unwrap();
        local.set_nonblocking(true).unwrap();
        reactors[1]
            .register(local.as_raw_fd(), Token(42), Interest::READABLE)
            .unwrap();
        remote.write_all(b"x").unwrap();

        assert!(wait_for(|| !recorder.tokens.lock().unwrap().is_empty()));
        assert_eq!(recorder.tokens.lock().unwrap()[0], Token(42));
        assert_eq!(recorder.threads.lock().unwrap()[0], "owner-1");
    }

    #[test]
    fn test_shutdown_joins_promptly() {
        struct Counting(AtomicUsize);
        impl EventHandler for Counting {
            fn handle_event(&self, _event: &ReadyEvent) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let handler: Arc<dyn EventHandler> = Arc::new(Counting(AtomicUsize::new(0)));
        // long poll timeout: only the wake-up can end the wait quickly
        let mut pool: ThreadPool =
            ThreadPool::spawn("sleepy", reactors(2), handler, Duration::from_secs(30), 16)
                .unwrap();

        let started = std::time::Instant::now();
        pool.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));

        // idempotent
        pool.shutdown();
    }
}
