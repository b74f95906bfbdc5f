//! kwait wait engine: fixed-interval polling of a live object.
//!
//! Both waits share one loop: check cancellation, Get, judge the result, then
//! either finish, time out, or sleep `poll_interval` and go again. The
//! deadline is taken from the instant the wait starts on tokio's clock, so
//! paused-time tests drive it deterministically. A sleep never runs past the
//! deadline: the last Get happens exactly at it.
//!
//! A zero timeout performs exactly one Get. A negative timeout is bounded at
//! [`kwait_core::ONE_WEEK`].

#![forbid(unsafe_code)]

use std::time::Duration;

use kwait_core::{ClusterError, DeleteWait, LiveObject, ResourceIdentity, Timeout, WaitCondition};
use kwait_kubehub::ClusterApi;
use metrics::counter;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("wait cancelled")]
    Cancelled,
    /// A Get failed with something other than NotFound or a transient error.
    #[error(transparent)]
    Cluster(ClusterError),
}

/// Bookkeeping reported when a wait runs out of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    pub elapsed: Duration,
    pub polls: u32,
    /// Most recent transient Get error, if any poll hit one.
    pub last_error: Option<ClusterError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertState {
    Satisfied(LiveObject),
    TimedOut(Expired),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteState {
    Gone,
    TimedOut(Expired),
}

enum Tick<T> {
    Done(T),
    Pending,
}

enum Finished<T> {
    Done(T),
    Expired(Expired),
}

/// Poll `id` until `cond` holds on the live object.
///
/// NotFound and transient errors count as "not yet"; any other Get error ends
/// the wait.
pub async fn wait_for_upsert<C: ClusterApi + ?Sized>(
    cluster: &C,
    id: &ResourceIdentity,
    cond: &WaitCondition,
    cancel: &CancellationToken,
) -> Result<UpsertState, WaitError> {
    debug!(target_object = %id, condition = %cond, timeout = %cond.timeout, "waiting for condition");
    let res = poll(cluster, id, "upsert", cond.timeout, cond.poll_interval, cancel, |live| match live {
        Some(live) if cond.is_satisfied_by(&live) => Tick::Done(live),
        _ => Tick::Pending,
    })
    .await?;
    Ok(match res {
        Finished::Done(live) => {
            info!(target_object = %id, condition = %cond, "condition satisfied");
            UpsertState::Satisfied(live)
        }
        Finished::Expired(e) => {
            warn!(target_object = %id, condition = %cond, polls = e.polls, elapsed_ms = e.elapsed.as_millis() as u64, "condition not met before timeout");
            UpsertState::TimedOut(e)
        }
    })
}

/// Poll `id` until Get reports NotFound. Objects still terminating count as present.
pub async fn wait_for_delete<C: ClusterApi + ?Sized>(
    cluster: &C,
    id: &ResourceIdentity,
    wait: &DeleteWait,
    cancel: &CancellationToken,
) -> Result<DeleteState, WaitError> {
    debug!(target_object = %id, timeout = %wait.timeout, "waiting for deletion");
    let res = poll(cluster, id, "delete", wait.timeout, wait.poll_interval, cancel, |live| match live {
        None => Tick::Done(()),
        Some(_) => Tick::Pending,
    })
    .await?;
    Ok(match res {
        Finished::Done(()) => {
            info!(target_object = %id, "object gone");
            DeleteState::Gone
        }
        Finished::Expired(e) => {
            warn!(target_object = %id, polls = e.polls, elapsed_ms = e.elapsed.as_millis() as u64, "object still present after timeout");
            DeleteState::TimedOut(e)
        }
    })
}

/// `judge` sees `None` when the object does not exist.
async fn poll<C, T, F>(
    cluster: &C,
    id: &ResourceIdentity,
    what: &'static str,
    timeout: Timeout,
    every: Duration,
    cancel: &CancellationToken,
    mut judge: F,
) -> Result<Finished<T>, WaitError>
where
    C: ClusterApi + ?Sized,
    F: FnMut(Option<LiveObject>) -> Tick<T>,
{
    let start = Instant::now();
    let deadline = start + timeout.budget();
    let mut polls = 0u32;
    let mut last_error = None;
    loop {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        polls += 1;
        counter!("kwait_wait_polls_total", 1u64, "wait" => what);
        let seen = match cluster.get(id).await {
            Ok(live) => Some(Some(live)),
            Err(ClusterError::NotFound(_)) => Some(None),
            Err(ClusterError::Transient(msg)) => {
                warn!(target_object = %id, error = %msg, "transient error while polling");
                last_error = Some(ClusterError::Transient(msg));
                None
            }
            Err(e) => return Err(WaitError::Cluster(e)),
        };
        if let Some(live) = seen {
            match judge(live) {
                Tick::Done(v) => return Ok(Finished::Done(v)),
                Tick::Pending => debug!(target_object = %id, polls, "not yet"),
            }
        }
        if let Some(expired) = expired(start, deadline, timeout, polls, &mut last_error, what) {
            return Ok(Finished::Expired(expired));
        }
        nap((Instant::now() + every).min(deadline), cancel).await?;
    }
}

fn expired(
    start: Instant,
    deadline: Instant,
    timeout: Timeout,
    polls: u32,
    last_error: &mut Option<ClusterError>,
    what: &'static str,
) -> Option<Expired> {
    let now = Instant::now();
    if !timeout.is_single_check() && now < deadline {
        return None;
    }
    counter!("kwait_wait_timeouts_total", 1u64, "wait" => what);
    Some(Expired { elapsed: now - start, polls, last_error: last_error.take() })
}

async fn nap(until: Instant, cancel: &CancellationToken) -> Result<(), WaitError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = sleep_until(until) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kwait_kubehub::fake::{FakeCluster, Verb};
    use serde_json::json;
    use tokio::time::sleep;

    fn web() -> ResourceIdentity {
        ResourceIdentity::new("apps", "v1", "deployments", Some("default"), "web")
    }

    fn deployment() -> serde_json::Value {
        json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web"}, "spec": {"replicas": 3}})
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_checks_exactly_once() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        let cond = WaitCondition::new("status.readyReplicas", Some("3")).unwrap().timeout(Timeout::Once);

        let t0 = Instant::now();
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        assert!(matches!(res, UpsertState::TimedOut(Expired { polls: 1, .. })));
        assert_eq!(cluster.calls().get, 1);
        assert_eq!(Instant::now(), t0);
    }

    #[tokio::test(start_paused = true)]
    async fn satisfied_on_first_poll_does_not_sleep() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        let cond = WaitCondition::new("spec.replicas", Some("3")).unwrap().timeout(Timeout::Once);

        let t0 = Instant::now();
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        let UpsertState::Satisfied(live) = res else { panic!("expected satisfied") };
        assert_eq!(live["spec"]["replicas"], json!(3));
        assert_eq!(cluster.calls().get, 1);
        assert_eq!(Instant::now(), t0);
    }

    #[tokio::test(start_paused = true)]
    async fn last_poll_lands_on_the_deadline() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        cluster.on_get(&web(), |n, live| {
            if n >= 5 {
                live["status"]["phase"] = json!("Ready");
            }
        });
        let cond = WaitCondition::new("status.phase", Some("Ready"))
            .unwrap()
            .timeout(Timeout::Within(Duration::from_secs(5)))
            .poll_interval(Duration::from_secs(2));

        let t0 = Instant::now();
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        let UpsertState::TimedOut(e) = res else { panic!("expected timeout") };
        assert_eq!(e.polls, 4);
        assert_eq!(e.elapsed, Duration::from_secs(5));
        assert_eq!(Instant::now() - t0, Duration::from_secs(5));
        assert_eq!(cluster.calls().get, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn condition_holding_at_the_deadline_still_counts() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        cluster.on_get(&web(), |n, live| {
            if n >= 4 {
                live["status"]["phase"] = json!("Ready");
            }
        });
        let cond = WaitCondition::new("status.phase", Some("Ready"))
            .unwrap()
            .timeout(Timeout::Within(Duration::from_secs(5)))
            .poll_interval(Duration::from_secs(2));

        let t0 = Instant::now();
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        assert!(matches!(res, UpsertState::Satisfied(_)));
        assert_eq!(Instant::now() - t0, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn negative_timeout_is_bounded_at_one_week() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        let cond = WaitCondition::new("status.phase", Some("Ready"))
            .unwrap()
            .timeout(Timeout::parse("-1s").unwrap())
            .poll_interval(Duration::from_secs(3600));

        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        let UpsertState::TimedOut(e) = res else { panic!("expected timeout") };
        assert_eq!(e.polls, 169);
        assert_eq!(e.elapsed, kwait_core::ONE_WEEK);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_object_is_pending_not_an_error() {
        let cluster = FakeCluster::new();
        let cond = WaitCondition::new("metadata.name", None)
            .unwrap()
            .timeout(Timeout::Within(Duration::from_secs(2)))
            .poll_interval(Duration::from_secs(1));
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        assert!(matches!(res, UpsertState::TimedOut(Expired { polls: 3, last_error: None, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_and_reported() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        cluster.fail_next(Verb::Get, ClusterError::Transient("connection reset".into()));
        let cond = WaitCondition::new("spec.replicas", Some("3")).unwrap().poll_interval(Duration::from_secs(1));
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        assert!(matches!(res, UpsertState::Satisfied(_)));
        assert_eq!(cluster.calls().get, 2);

        cluster.fail_next(Verb::Get, ClusterError::Transient("connection reset".into()));
        let cond = WaitCondition::new("spec.paused", None).unwrap().timeout(Timeout::Once);
        let res = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap();
        let UpsertState::TimedOut(e) = res else { panic!("expected timeout") };
        assert_eq!(e.last_error, Some(ClusterError::Transient("connection reset".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_get_ends_the_wait() {
        let cluster = FakeCluster::new();
        cluster.fail_next(Verb::Get, ClusterError::Fatal("forbidden".into()));
        let cond = WaitCondition::new("spec.replicas", None).unwrap();
        let err = wait_for_upsert(&cluster, &web(), &cond, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, WaitError::Cluster(ClusterError::Fatal("forbidden".into())));
        assert_eq!(cluster.calls().get, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_sleep() {
        let cluster = FakeCluster::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });
        let wait = DeleteWait { timeout: Timeout::Within(Duration::from_secs(60)), poll_interval: Duration::from_secs(10) };
        cluster.seed(&web(), deployment(), "kwait");

        let t0 = Instant::now();
        let err = wait_for_delete(&cluster, &web(), &wait, &cancel).await.unwrap_err();
        assert_eq!(err, WaitError::Cancelled);
        assert_eq!(Instant::now() - t0, Duration::from_millis(1500));
        assert_eq!(cluster.calls().get, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_skips_the_get() {
        let cluster = FakeCluster::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = wait_for_delete(&cluster, &web(), &DeleteWait::default(), &cancel).await.unwrap_err();
        assert_eq!(err, WaitError::Cancelled);
        assert_eq!(cluster.calls().get, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delete_wait_counts_polls_until_deadline() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        let wait = DeleteWait { timeout: Timeout::Within(Duration::from_secs(5)), poll_interval: Duration::from_secs(1) };
        let res = wait_for_delete(&cluster, &web(), &wait, &CancellationToken::new()).await.unwrap();
        let DeleteState::TimedOut(e) = res else { panic!("expected timeout") };
        assert_eq!(e.polls, 6);
        assert_eq!(e.elapsed, Duration::from_secs(5));

        let wait = DeleteWait { timeout: Timeout::Within(Duration::from_secs(5)), poll_interval: Duration::from_secs(3) };
        let res = wait_for_delete(&cluster, &web(), &wait, &CancellationToken::new()).await.unwrap();
        let DeleteState::TimedOut(e) = res else { panic!("expected timeout") };
        assert_eq!(e.polls, 3);
        assert_eq!(e.elapsed, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_wait_sees_the_object_go() {
        let cluster = FakeCluster::new();
        cluster.seed(&web(), deployment(), "kwait");
        cluster.linger_after_delete(&web(), 2);
        cluster.delete(&web()).await.unwrap();
        let wait = DeleteWait { timeout: Timeout::Within(Duration::from_secs(30)), poll_interval: Duration::from_secs(1) };
        let res = wait_for_delete(&cluster, &web(), &wait, &CancellationToken::new()).await.unwrap();
        assert_eq!(res, DeleteState::Gone);
        assert_eq!(cluster.calls().get, 3);
    }
}
