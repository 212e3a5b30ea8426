use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::{Instant, sleep};

use super::{Probe, probe_factory, standalone_job};
use crate::core::job::{Job, PluginHelper};

fn counting_helper(work: Duration, interval: Duration) -> (Arc<PluginHelper>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut helper = PluginHelper::new();
    let counter = Arc::clone(&calls);
    helper.add_task_with_closure(
        move |_job: Arc<Job>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if !work.is_zero() {
                    sleep(work).await;
                }
            }
        },
        interval,
    );
    (Arc::new(helper), calls)
}

fn job() -> Arc<Job> {
    let probe = Arc::new(Probe::default());
    standalone_job("timer", probe_factory(&probe, false)).0
}

#[tokio::test(start_paused = true)]
async fn tasks_repeat_on_their_interval() {
    let (helper, calls) = counting_helper(Duration::ZERO, Duration::from_secs(10));
    let job = job();

    let runner = {
        let helper = Arc::clone(&helper);
        tokio::spawn(async move { helper.run(&job).await })
    };

    sleep(Duration::from_secs(35)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    helper.terminate().await;
    runner.await.unwrap();
    assert!(helper.is_terminated());
}

#[tokio::test(start_paused = true)]
async fn the_wait_starts_after_the_invocation_returns() {
    let (helper, calls) = counting_helper(Duration::from_secs(5), Duration::from_secs(10));
    let job = job();

    let runner = {
        let helper = Arc::clone(&helper);
        tokio::spawn(async move { helper.run(&job).await })
    };

    // Invocations start at 0s, 15s and 30s.
    sleep(Duration::from_secs(31)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    helper.terminate().await;
    runner.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn terminate_interrupts_the_wait() {
    let (helper, calls) = counting_helper(Duration::ZERO, Duration::from_secs(3600));
    let job = job();

    let runner = {
        let helper = Arc::clone(&helper);
        tokio::spawn(async move { helper.run(&job).await })
    };
    sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    helper.terminate().await;
    runner.await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn nothing_runs_after_terminate_returns() {
    let (helper, calls) = counting_helper(Duration::from_secs(2), Duration::from_secs(1));
    let job = job();

    let runner = {
        let helper = Arc::clone(&helper);
        tokio::spawn(async move { helper.run(&job).await })
    };
    sleep(Duration::from_millis(2500)).await;

    helper.terminate().await;
    let after_terminate = calls.load(Ordering::SeqCst);
    runner.await.unwrap();

    sleep(Duration::from_secs(60)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_terminate);
}

#[tokio::test]
async fn run_once_invokes_each_task_in_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut helper = PluginHelper::new();
    for label in ["first", "second"] {
        let order = Arc::clone(&order);
        helper.add_task_with_closure(
            move |_job: Arc<Job>| {
                let order = Arc::clone(&order);
                async move { order.lock().unwrap().push(label) }
            },
            Duration::from_secs(1),
        );
    }

    helper.run_once(&job()).await;
    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    assert_eq!(helper.task_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn terminate_waits_for_a_single_pass_in_flight() {
    let (helper, calls) = counting_helper(Duration::from_secs(5), Duration::from_secs(10));
    let finished = Arc::new(AtomicUsize::new(0));
    let job = job();
    let late = Arc::clone(&job);

    let pass = {
        let helper = Arc::clone(&helper);
        let finished = Arc::clone(&finished);
        tokio::spawn(async move {
            helper.run_once(&job).await;
            finished.fetch_add(1, Ordering::SeqCst);
        })
    };
    sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    helper.terminate().await;
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(helper.is_terminated());

    pass.await.unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    helper.run_once(&late).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
