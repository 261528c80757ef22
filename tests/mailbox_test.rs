use mailboxes::{Mailbox, MailboxError, TokioDispatcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Tracks how many payloads run at once.
#[derive(Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl Occupancy {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

fn tokio_mailbox() -> Mailbox<()> {
    Mailbox::builder()
        .name("fifo-test")
        .dispatcher(TokioDispatcher::current())
        .build()
}

#[test]
fn test_concurrent_producers_are_serialized_without_loss() {
    const PRODUCERS: usize = 8;
    const ITEMS: usize = 250;

    let mailbox = Mailbox::<()>::new();
    let occupancy = Arc::new(Occupancy::default());
    let log = Arc::new(Mutex::new(Vec::with_capacity(PRODUCERS * ITEMS)));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let (mailbox, occupancy, log) = (mailbox.clone(), occupancy.clone(), log.clone());
            thread::spawn(move || {
                for item in 0..ITEMS {
                    let (occupancy, log) = (occupancy.clone(), log.clone());
                    mailbox
                        .execute(move || {
                            occupancy.enter();
                            log.lock().unwrap().push((producer, item));
                            thread::yield_now();
                            occupancy.exit();
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    // Every producer thread either drained to empty or handed its items to a drainer
    // that did, so nothing is left once they have all returned.
    assert_eq!(mailbox.pending(), 0);
    assert!(!mailbox.is_draining());
    assert_eq!(occupancy.completed.load(Ordering::SeqCst), PRODUCERS * ITEMS);
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);

    let log = log.lock().unwrap();
    for producer in 0..PRODUCERS {
        let items: Vec<usize> = log
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, item)| *item)
            .collect();
        assert_eq!(items, (0..ITEMS).collect::<Vec<_>>(), "producer {producer}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fifo_order_is_arrival_order() {
    let mailbox = tokio_mailbox();
    let log = Arc::new(Mutex::new(Vec::new()));

    for n in 0..100 {
        let log = log.clone();
        mailbox.execute(move || log.lock().unwrap().push(n)).unwrap();
    }
    // Queued behind every action above.
    mailbox.spawn(|_| async {}).unwrap().await.unwrap();

    assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_await_turn_behaves_like_execute() {
    let mailbox = tokio_mailbox();
    let log = Arc::new(Mutex::new(Vec::new()));

    let (l, m) = (log.clone(), mailbox.clone());
    let task = mailbox
        .spawn(move |scope| async move {
            l.lock().unwrap().push("step 1");
            let l2 = l.clone();
            m.execute(move || l2.lock().unwrap().push("executed"))
                .unwrap();
            scope.turn().await;
            l.lock().unwrap().push("step 2");
        })
        .unwrap();
    task.await.unwrap();

    assert_eq!(*log.lock().unwrap(), vec!["step 1", "executed", "step 2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_and_actions_from_many_producers_run_exactly_once() {
    const PRODUCERS: usize = 4;
    const TASKS: usize = 50;

    let mailbox = tokio_mailbox();
    let occupancy = Arc::new(Occupancy::default());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let (mailbox, occupancy) = (mailbox.clone(), occupancy.clone());
            tokio::spawn(async move {
                let mut handles = Vec::with_capacity(TASKS);
                for _ in 0..TASKS {
                    let o = occupancy.clone();
                    handles.push(
                        mailbox
                            .spawn(move |scope| async move {
                                for _ in 0..3 {
                                    o.enter();
                                    o.exit();
                                    scope.turn().await;
                                }
                            })
                            .unwrap(),
                    );
                    let o = occupancy.clone();
                    mailbox
                        .execute(move || {
                            o.enter();
                            o.exit();
                        })
                        .unwrap();
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }
    // Flush the trailing actions.
    mailbox.spawn(|_| async {}).unwrap().await.unwrap();

    assert_eq!(
        occupancy.completed.load(Ordering::SeqCst),
        PRODUCERS * TASKS * 4
    );
    assert_eq!(occupancy.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_while_running_discards_queued_work() {
    let mailbox = tokio_mailbox();
    let (running_tx, running_rx) = tokio::sync::oneshot::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();

    mailbox
        .execute(move || {
            running_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            done_tx.send(()).unwrap();
        })
        .unwrap();
    running_rx.await.unwrap();

    let queued = mailbox.spawn(|_| async { "never" }).unwrap();
    mailbox.execute(|| unreachable!("discarded")).unwrap();

    assert_eq!(mailbox.close(), 2);
    assert_eq!(mailbox.execute(|| {}), Err(MailboxError::Closed));
    release_tx.send(()).unwrap();

    // The running payload still finishes.
    done_rx.await.unwrap();
    assert_eq!(queued.await, Err(MailboxError::TaskDropped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_payload_is_contained() {
    let mailbox = tokio_mailbox();

    mailbox.execute(|| panic!("payload failure")).unwrap();
    let failed = mailbox
        .spawn(|scope| async move {
            scope.turn().await;
            panic!("task failure");
        })
        .unwrap();
    let healthy = mailbox.spawn(|_| async { 42 }).unwrap();

    assert_eq!(failed.await, Err::<(), _>(MailboxError::TaskDropped));
    assert_eq!(healthy.await, Ok(42));
}

#[test]
fn test_dropping_the_last_handle_still_runs_queued_work() {
    let (tx, rx) = mpsc::channel();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mailbox = Mailbox::<()>::new();

    let drainer = {
        let mailbox = mailbox.clone();
        thread::spawn(move || {
            mailbox
                .execute(move || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
                .unwrap();
        })
    };
    started_rx.recv().unwrap();

    mailbox.execute(move || tx.send("ran").unwrap()).unwrap();
    drop(mailbox);
    release_tx.send(()).unwrap();
    drainer.join().unwrap();

    assert_eq!(rx.recv().unwrap(), "ran");
}

/// A runtime that has shut down refuses new blocking work; the refused session drains on
/// the enqueuing thread instead of stranding the item.
#[test]
fn test_shut_down_runtime_does_not_strand_work() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let handle = runtime.handle().clone();
    drop(runtime);

    let mailbox = Mailbox::<()>::builder()
        .name("after-shutdown")
        .dispatcher(TokioDispatcher::new(handle))
        .build();
    let (tx, rx) = mpsc::channel();
    mailbox.execute(move || tx.send("ran").unwrap()).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok("ran"));
    assert_eq!(mailbox.pending(), 0);
    assert!(!mailbox.is_draining());
}
