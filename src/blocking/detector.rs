//! Block-suspicion state machine

use super::BlockSignal;
use crate::crawler::FetchOutcome;

/// Consecutive non-2xx responses that on their own count as a signal
const NON_2XX_RUN: u32 = 3;

/// Detector state for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Healthy,
    SoftBlockSuspected,
    Blocked,
}

impl BlockState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::SoftBlockSuspected => "soft_block_suspected",
            Self::Blocked => "blocked",
        }
    }
}

/// What the session should do after an outcome was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerdict {
    /// No block signal in this outcome
    Proceed,
    /// Signal seen, threshold not reached yet
    Suspected { count: u32, signal: BlockSignal },
    /// Stop fetching for this source
    Blocked(BlockSignal),
}

/// Counts block signals and decides when a source is blocked
///
/// The detector never leaves [`BlockState::Blocked`] on its own; only
/// [`BlockDetector::rearm`] does.
#[derive(Debug, Clone)]
pub struct BlockDetector {
    threshold: u32,
    state: BlockState,
    suspicion: u32,
    consecutive_non_2xx: u32,
    last_signal: Option<BlockSignal>,
}

impl BlockDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: BlockState::Healthy,
            suspicion: 0,
            consecutive_non_2xx: 0,
            last_signal: None,
        }
    }

    pub fn state(&self) -> BlockState {
        self.state
    }

    pub fn suspicion_count(&self) -> u32 {
        self.suspicion
    }

    pub fn last_signal(&self) -> Option<BlockSignal> {
        self.last_signal
    }

    /// Feeds one outcome through the state machine
    ///
    /// # Arguments
    ///
    /// * `outcome` - The fetch outcome, in fetch order
    /// * `body_signal` - What the classifier found in the body, if anything
    ///
    /// # Returns
    ///
    /// The verdict for this outcome. Once blocked, every further call returns
    /// the same `Blocked` verdict without touching the counters.
    pub fn observe(
        &mut self,
        outcome: &FetchOutcome,
        body_signal: Option<BlockSignal>,
    ) -> BlockVerdict {
        if self.state == BlockState::Blocked {
            return BlockVerdict::Blocked(self.last_signal.unwrap_or(BlockSignal::RepeatedNon2xx));
        }

        // Transport failures carry no status and leave the run untouched
        match outcome.http_status {
            Some(_) if outcome.is_2xx() => self.consecutive_non_2xx = 0,
            Some(_) => self.consecutive_non_2xx += 1,
            None => {}
        }

        let signal = outcome
            .http_status
            .and_then(BlockSignal::from_status)
            .or(body_signal)
            .or_else(|| {
                (self.consecutive_non_2xx >= NON_2XX_RUN).then_some(BlockSignal::RepeatedNon2xx)
            });

        let Some(signal) = signal else {
            if outcome.is_2xx() {
                self.reset();
            }
            return BlockVerdict::Proceed;
        };

        self.suspicion += 1;
        self.last_signal = Some(signal);

        if self.suspicion >= self.threshold {
            self.state = BlockState::Blocked;
            tracing::debug!(
                "Block threshold reached after {} suspicions ({})",
                self.suspicion,
                signal
            );
            BlockVerdict::Blocked(signal)
        } else {
            self.state = BlockState::SoftBlockSuspected;
            BlockVerdict::Suspected {
                count: self.suspicion,
                signal,
            }
        }
    }

    /// Operator re-arm: returns to healthy with cleared counters
    pub fn rearm(&mut self) {
        self.reset();
        self.last_signal = None;
    }

    fn reset(&mut self) {
        self.state = BlockState::Healthy;
        self.suspicion = 0;
        self.consecutive_non_2xx = 0;
    }
}

impl Default for BlockDetector {
    fn default() -> Self {
        Self::new(3)
    }
}
