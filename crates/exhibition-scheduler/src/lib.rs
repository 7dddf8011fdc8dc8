//! `exhibition-scheduler`: fixed-period driver for broadcast cycles.
//!
//! # Overview
//!
//! The [`engine::Scheduler`] ticks every `period` and, when somebody is
//! listening, awaits one [`engine::BroadcastCycle`] before it looks at the
//! timer again. Cycles therefore never overlap, and a slow cycle pushes the
//! next tick back instead of queueing a burst behind it.
//!
//! | Situation               | Behaviour                                  |
//! |-------------------------|--------------------------------------------|
//! | `audience() == 0`       | tick is skipped, the cycle is not invoked  |
//! | cycle shorter than tick | next cycle starts one period after the last tick |
//! | cycle longer than tick  | next cycle starts as soon as this one ends |
//! | shutdown between ticks  | returns immediately                        |
//! | shutdown mid-cycle      | waits up to the grace period, then abandons the cycle |

pub mod engine;

pub use engine::{BroadcastCycle, Scheduler, SchedulerStats};
