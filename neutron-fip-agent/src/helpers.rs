use std::time::Duration;

use tokio::{
    sync::watch::Receiver,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

pub enum LoopCommand {
    Continue,
    Break,
}

/// An interval whose first tick fires one full period from now.
pub fn delayed_interval(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    interval
}

/// Waits for the next tick unless shutdown is signalled (or its sender is
/// dropped) first.
pub async fn next_tick(interval: &mut Interval, shutdown: &mut Receiver<bool>) -> LoopCommand {
    if *shutdown.borrow() {
        return LoopCommand::Break;
    }

    tokio::select! {
        _ = interval.tick() => LoopCommand::Continue,
        _ = shutdown.changed() => LoopCommand::Break,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;

    use super::{delayed_interval, next_tick, LoopCommand};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let mut interval = delayed_interval(Duration::from_secs(3));

        assert!(matches!(next_tick(&mut interval, &mut rx).await, LoopCommand::Continue));

        tx.send_replace(true);

        assert!(matches!(next_tick(&mut interval, &mut rx).await, LoopCommand::Break));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_the_loop() {
        let (tx, mut rx) = watch::channel(false);
        let mut interval = delayed_interval(Duration::from_secs(3));

        drop(tx);

        assert!(matches!(next_tick(&mut interval, &mut rx).await, LoopCommand::Break));
    }
}
