//! Cancellable timers, countdowns and slideshows.
//!
//! Every timer-starting call returns a [`TimerHandle`]. Dropping the handle
//! cancels the timer, so a timer cannot outlive whatever owns its handle.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub fn cancel(mut self) { self.stop(); }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) { self.stop(); }
}

/// Runs `f` once after `delay`.
pub fn after<F>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        f();
    });
    TimerHandle { task: Some(task) }
}

/// Runs `f` every `period`, first after one full period.
pub fn every<F>(period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() + Send + 'static,
{
    every_while(period, move || {
        f();
        true
    })
}

/// Like [`every`], but the timer ends as soon as `f` returns `false`.
pub fn every_while<F>(period: Duration, mut f: F) -> TimerHandle
where
    F: FnMut() -> bool + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            if !f() {
                break;
            }
        }
    });
    TimerHandle { task: Some(task) }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Remaining {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Remaining {
    pub fn until(ends_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let total = (ends_at - now).num_seconds().max(0);
        Self {
            days: total / 86_400,
            hours: total % 86_400 / 3_600,
            minutes: total % 3_600 / 60,
            seconds: total % 60,
        }
    }

    pub fn is_zero(&self) -> bool { *self == Self::default() }
}

/// Flash-sale style countdown, refreshed once a second until it reaches zero.
pub struct Countdown {
    ends_at: DateTime<Utc>,
    remaining: Arc<watch::Sender<Remaining>>,
    timer: Option<TimerHandle>,
}

impl Countdown {
    pub fn start(ends_at: DateTime<Utc>) -> Self {
        let (remaining, _) = watch::channel(Remaining::until(ends_at, Utc::now()));
        let remaining = Arc::new(remaining);
        let timer = (!remaining.borrow().is_zero()).then(|| {
            let tx = Arc::clone(&remaining);
            every_while(Duration::from_secs(1), move || {
                let next = Remaining::until(ends_at, Utc::now());
                tx.send_if_modified(|r| {
                    let changed = *r != next;
                    *r = next;
                    changed
                });
                !next.is_zero()
            })
        });
        Self { ends_at, remaining, timer }
    }

    pub fn ends_at(&self) -> DateTime<Utc> { self.ends_at }

    pub fn remaining(&self) -> watch::Receiver<Remaining> { self.remaining.subscribe() }

    pub fn is_expired(&self) -> bool { self.remaining.borrow().is_zero() }

    pub fn is_running(&self) -> bool { self.timer.as_ref().is_some_and(TimerHandle::is_active) }

    /// Points the countdown at a new end time; the old timer is dropped.
    pub fn reset(&mut self, ends_at: DateTime<Utc>) {
        *self = Self::start(ends_at);
    }
}

/// Wrapping carousel index with optional auto-advance.
pub struct Slideshow {
    len: usize,
    index: Arc<watch::Sender<usize>>,
    // At most one auto-advance timer.
    auto: Mutex<Option<TimerHandle>>,
}

impl Slideshow {
    pub fn new(len: usize) -> Self {
        let (index, _) = watch::channel(0);
        Self { len, index: Arc::new(index), auto: Mutex::new(None) }
    }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn current(&self) -> usize { *self.index.borrow() }

    pub fn index(&self) -> watch::Receiver<usize> { self.index.subscribe() }

    pub fn next(&self) { advance(&self.index, self.len, 1); }

    pub fn prev(&self) { advance(&self.index, self.len, self.len.saturating_sub(1)); }

    pub fn go_to(&self, index: usize) {
        if index < self.len {
            self.index.send_replace(index);
        }
    }

    pub fn start_auto(&self, period: Duration) {
        let handle = (self.len > 1).then(|| {
            let (index, len) = (Arc::clone(&self.index), self.len);
            every(period, move || advance(&index, len, 1))
        });
        *self.auto.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = handle;
    }

    pub fn stop_auto(&self) {
        self.auto.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
    }

    pub fn is_auto_advancing(&self) -> bool {
        self.auto
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(TimerHandle::is_active)
    }

    /// The slide set changed: clamp the index and stop auto-advance.
    pub fn set_len(&mut self, len: usize) {
        self.stop_auto();
        self.len = len;
        self.index.send_if_modified(|i| {
            let clamped = if len == 0 { 0 } else { (*i).min(len - 1) };
            let changed = *i != clamped;
            *i = clamped;
            changed
        });
    }
}

fn advance(index: &watch::Sender<usize>, len: usize, step: usize) {
    if len == 0 {
        return;
    }
    index.send_modify(|i| *i = (*i + step) % len);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once_and_cancel_stops_it() {
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _handle = after(Duration::from_secs(3), move || { f.fetch_add(1, Ordering::SeqCst); });
        let g = Arc::clone(&fired);
        let cancelled = after(Duration::from_secs(3), move || { g.fetch_add(10, Ordering::SeqCst); });
        cancelled.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_stops_on_drop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let handle = every(Duration::from_secs(1), move || { t.fetch_add(1, Ordering::SeqCst); });
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        drop(handle);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_while_ends_when_asked() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let handle = every_while(Duration::from_secs(1), move || t.fetch_add(1, Ordering::SeqCst) + 1 < 2);
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
        assert!(!handle.is_active());
    }

    #[tokio::test]
    async fn test_countdown_stops_ticking_at_zero() {
        let countdown = Countdown::start(Utc::now() + chrono::Duration::milliseconds(1_500));
        assert!(countdown.is_running());
        let mut remaining = countdown.remaining();
        tokio::time::timeout(Duration::from_secs(5), remaining.wait_for(Remaining::is_zero)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(countdown.is_expired());
        assert!(!countdown.is_running());
    }

    #[test]
    fn test_remaining_breakdown() {
        let now = Utc::now();
        let ends = now + chrono::Duration::seconds(86_400 + 2 * 3_600 + 3 * 60 + 4);
        assert_eq!(Remaining::until(ends, now), Remaining { days: 1, hours: 2, minutes: 3, seconds: 4 });
        assert!(Remaining::until(now - chrono::Duration::seconds(5), now).is_zero());
    }

    #[tokio::test]
    async fn test_expired_countdown_has_no_timer() {
        let countdown = Countdown::start(Utc::now() - chrono::Duration::minutes(1));
        assert!(countdown.is_expired());
        assert!(!countdown.is_running());
        let mut live = Countdown::start(Utc::now() + chrono::Duration::hours(1));
        assert!(!live.is_expired());
        assert!(live.is_running());
        live.reset(Utc::now() - chrono::Duration::seconds(1));
        assert!(live.is_expired());
        assert!(!live.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slideshow_wraps_and_auto_advances() {
        let mut show = Slideshow::new(3);
        show.prev();
        assert_eq!(show.current(), 2);
        show.next();
        assert_eq!(show.current(), 0);

        show.start_auto(Duration::from_secs(5));
        show.start_auto(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(show.current(), 2);

        show.set_len(2);
        assert_eq!(show.current(), 1);
        assert!(!show.is_auto_advancing());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(show.current(), 1);
    }
}
