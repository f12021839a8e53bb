use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that persists completion of stays whose check-out has
/// passed and expires pending requests whose check-in has passed.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.complete_due_bookings().await {
            Ok(0) => debug!("sweep: nothing due"),
            Ok(n) => info!("sweep completed {n} bookings"),
            Err(e) => warn!("sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{BookingRequest, EngineOptions};
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hostbook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_persists_completion() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let clock = Arc::new(ManualClock::at_date(d(1)));
        let options = EngineOptions {
            clock: clock.clone(),
            ..EngineOptions::default()
        };
        let engine = Arc::new(
            Engine::new(test_wal_path("sweep.wal"), Arc::new(NotifyHub::new()), options).unwrap(),
        );
        let owner = Actor::host(Ulid::new());
        let host_id = Ulid::new();
        engine
            .upsert_host(
                owner,
                HostProfile {
                    id: host_id,
                    owner_id: owner.user_id,
                    nightly_rate: 8_000,
                    max_guests: 4,
                    active: true,
                },
            )
            .await
            .unwrap();
        let booking = engine
            .create_booking(
                Actor::guest(Ulid::new()),
                BookingRequest {
                    host_id,
                    stay: Stay::new(d(3), d(5)),
                    guest_count: 1,
                    message: None,
                },
            )
            .await
            .unwrap();
        engine.approve(owner, booking.id).await.unwrap();
        let mut rx = engine.notify.subscribe(host_id);

        clock.set_date(d(6));
        let task = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        task.abort();

        assert_eq!(notice.kind, NoticeKind::Completed);
        assert_eq!(notice.booking_id, booking.id);
        let hs = engine.get_host_state(&host_id).unwrap();
        assert_eq!(hs.read().await.bookings[&booking.id].status, BookingStatus::Completed);
    }
}
