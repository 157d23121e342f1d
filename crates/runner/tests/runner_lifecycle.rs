use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thingflow_runner::{Runner, EXIT_OK};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_external_shutdown_drains_every_process() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let stopped = Arc::new(AtomicUsize::new(0));
    let token = CancellationToken::new();

    let mut runner = Runner::new()
        .without_signal_handlers()
        .with_cancellation_token(token.clone())
        .with_drain_timeout(Duration::from_secs(2));

    for i in 0..3 {
        let stopped = stopped.clone();
        runner = runner.with_named_process(format!("worker-{}", i), move |ctx| async move {
            ctx.cancelled().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
            stopped.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }

    let closed = stopped.clone();
    let closer_saw = Arc::new(AtomicUsize::new(0));
    let closer_saw_clone = closer_saw.clone();
    runner = runner.with_closer(move || async move {
        closer_saw_clone.store(closed.load(Ordering::SeqCst), Ordering::SeqCst);
        Ok(())
    });

    let handle = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    assert_eq!(handle.await.unwrap(), EXIT_OK);
    assert_eq!(stopped.load(Ordering::SeqCst), 3);
    // closers only start once every process has drained
    assert_eq!(closer_saw.load(Ordering::SeqCst), 3);
}
