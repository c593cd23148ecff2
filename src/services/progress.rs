use std::future::Future;
use std::time::Duration;

/// Time-based progress estimate for a request that reports none.
///
/// The value climbs by a fixed step per tick and stops at a ceiling below
/// 100 until the request actually finishes. It is an estimate only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedProgress {
    value: u8,
}

impl SimulatedProgress {
    pub const STEP: u8 = 5;
    pub const CEILING: u8 = 90;

    pub fn new() -> Self {
        Self { value: 0 }
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    pub fn tick(&mut self) -> u8 {
        self.value = self.value.saturating_add(Self::STEP).min(Self::CEILING);
        self.value
    }

    pub fn complete(&mut self) -> u8 {
        self.value = 100;
        self.value
    }
}

impl Default for SimulatedProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives `fut` to completion while reporting estimated progress every
/// `tick`. The last report is always 100.
pub async fn run_with_progress<F, T>(fut: F, tick: Duration, report: &(dyn Fn(u8) + Send + Sync)) -> T
where
    F: Future<Output = T>,
{
    let mut progress = SimulatedProgress::new();
    report(progress.value());

    let mut interval = tokio::time::interval(tick);
    // The first tick of an interval fires immediately.
    interval.tick().await;

    tokio::pin!(fut);
    let output = loop {
        tokio::select! {
            output = &mut fut => break output,
            _ = interval.tick() => report(progress.tick()),
        }
    };

    report(progress.complete());
    output
}
