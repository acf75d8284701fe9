use std::collections::VecDeque;

use crate::StatCounter;
use crate::StatKind;

/// Closed windows kept for the average.
pub(super) const HISTORY_WINDOWS: usize = 60;

/// Operation counter over fixed windows: the open window's count and the mean
/// of the last [`HISTORY_WINDOWS`] closed ones.
#[derive(Debug, Clone, Default)]
struct WindowCounter {
    current: i64,
    history: VecDeque<i64>,
}

impl WindowCounter {
    fn roll(&mut self) {
        if self.history.len() == HISTORY_WINDOWS {
            self.history.pop_front();
        }
        self.history.push_back(self.current);
        self.current = 0;
    }

    fn snapshot(&self) -> StatCounter {
        let average = if self.history.is_empty() {
            0
        } else {
            self.history.iter().sum::<i64>() / self.history.len() as i64
        };
        StatCounter {
            current: self.current,
            average,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(super) struct NodeCounters {
    counters: [WindowCounter; 8],
}

impl NodeCounters {
    pub(super) fn record(
        &mut self,
        kind: StatKind,
    ) {
        self.counters[kind.index()].current += 1;
    }

    pub(super) fn roll(&mut self) {
        self.counters.iter_mut().for_each(WindowCounter::roll);
    }

    pub(super) fn snapshot(&self) -> [StatCounter; 8] {
        let mut out = [StatCounter::default(); 8];
        for (slot, counter) in out.iter_mut().zip(self.counters.iter()) {
            *slot = counter.snapshot();
        }
        out
    }
}
