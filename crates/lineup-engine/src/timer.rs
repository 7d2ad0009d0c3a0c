//! Reminder and deadline timers.
//!
//! Timers never touch session state. They post a message back into the
//! session's inbox, tagged with the generation they were armed under, and the
//! session decides whether it still matters.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Reminder,
    Deadline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

/// Send `msg` on `tx` at `at` unless `cancel` fires first.
pub fn fire_after<T: Send + 'static>(
    at: Instant,
    msg: T,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<T>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep_until(at) => {
                let _ = tx.send(msg);
            }
        }
    })
}

/// The pair of reminder and deadline timers for one session.
pub struct EscalationTimer {
    cancel: CancellationToken,
}

impl EscalationTimer {
    /// Arm both timers relative to `origin` (session creation).
    pub fn start<T>(
        origin: Instant,
        reminder: Option<Duration>,
        deadline: Duration,
        generation: u64,
        parent: &CancellationToken,
        tx: mpsc::UnboundedSender<T>,
    ) -> Self
    where
        T: From<TimerFired> + Send + 'static,
    {
        let cancel = parent.child_token();
        if let Some(after) = reminder {
            let _ = fire_after(
                origin + after,
                T::from(TimerFired {
                    kind: TimerKind::Reminder,
                    generation,
                }),
                cancel.clone(),
                tx.clone(),
            );
        }
        let _ = fire_after(
            origin + deadline,
            T::from(TimerFired {
                kind: TimerKind::Deadline,
                generation,
            }),
            cancel.clone(),
            tx,
        );
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for EscalationTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn reminder_then_deadline() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let root = CancellationToken::new();
        let _timer = EscalationTimer::start(
            Instant::now(),
            Some(Duration::from_secs(60)),
            Duration::from_secs(600),
            4,
            &root,
            tx,
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, TimerKind::Reminder);
        assert_eq!(first.generation, 4);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, TimerKind::Deadline);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_silences_both() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let root = CancellationToken::new();
        let timer = EscalationTimer::start(
            Instant::now(),
            Some(Duration::from_secs(60)),
            Duration::from_secs(600),
            0,
            &root,
            tx,
        );
        timer.cancel();
        tokio::time::sleep(Duration::from_secs(700)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancel_propagates() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let root = CancellationToken::new();
        let timer = EscalationTimer::start(
            Instant::now(),
            None,
            Duration::from_secs(10),
            0,
            &root,
            tx,
        );
        root.cancel();
        assert!(timer.is_cancelled());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timers_measure_from_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TimerFired>();
        let root = CancellationToken::new();
        let origin = Instant::now();
        tokio::time::sleep(Duration::from_secs(30)).await;
        let _timer = EscalationTimer::start(
            origin,
            Some(Duration::from_secs(60)),
            Duration::from_secs(600),
            0,
            &root,
            tx,
        );
        rx.recv().await.unwrap();
        assert_eq!(origin.elapsed(), Duration::from_secs(60));
    }
}
