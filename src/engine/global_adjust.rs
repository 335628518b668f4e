//! Global adjustment of inter-map transforms.
//!
//! The driver hands constraint snapshots to the external graph solver
//! and feeds solved estimates back into the scene manager. Two modes,
//! fixed at construction:
//!
//! - **inline**: the solve runs on the caller's thread inside
//!   [`wakeup`](GlobalAdjustmentDriver::wakeup);
//! - **background**: a single worker thread blocks on a condition
//!   variable between wakeups.
//!
//! Either way the hand-off is one input slot and one output slot behind
//! one mutex; neither the scheduler nor the worker ever blocks on the
//! other's long-running work.

use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};

use crate::core::pose::Pose;
use crate::scene::manager::SceneManager;
use crate::scene::relation::RelationConstraint;

use super::interfaces::GraphSolver;

/// Constraint snapshot handed to the solver.
#[derive(Debug, Clone)]
struct ConstraintSnapshot {
    num_maps: usize,
    constraints: Vec<RelationConstraint>,
}

#[derive(Default)]
struct Slots {
    input: Option<ConstraintSnapshot>,
    output: Option<Vec<(usize, Pose)>>,
    busy: bool,
    stop: bool,
}

struct Shared {
    slots: Mutex<Slots>,
    wake: Condvar,
}

/// Drives the external [`GraphSolver`], inline or on a worker thread.
pub struct GlobalAdjustmentDriver {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    /// Present only in inline mode; background mode moves the solver
    /// into the worker.
    inline_solver: Option<Box<dyn GraphSolver>>,
}

impl GlobalAdjustmentDriver {
    /// Create a driver that solves inline on `wakeup`.
    pub fn new_inline(solver: Box<dyn GraphSolver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                slots: Mutex::new(Slots::default()),
                wake: Condvar::new(),
            }),
            worker: None,
            inline_solver: Some(solver),
        }
    }

    /// Create a driver with a background worker thread.
    pub fn new_background(mut solver: Box<dyn GraphSolver>) -> Self {
        let shared = Arc::new(Shared {
            slots: Mutex::new(Slots::default()),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::spawn(move || loop {
            let snapshot = loop {
                let mut slots = worker_shared.slots.lock();
                while slots.input.is_none() && !slots.stop {
                    worker_shared.wake.wait(&mut slots);
                }
                if slots.stop {
                    return;
                }
                if let Some(snapshot) = slots.input.take() {
                    slots.busy = true;
                    break snapshot;
                }
            };

            debug!(
                "global adjustment solving {} constraints",
                snapshot.constraints.len()
            );
            let estimates = solver.solve(snapshot.num_maps, &snapshot.constraints);

            let mut slots = worker_shared.slots.lock();
            slots.output = Some(estimates);
            slots.busy = false;
        });

        Self {
            shared,
            worker: Some(worker),
            inline_solver: None,
        }
    }

    /// Whether a worker thread is running.
    pub fn is_background(&self) -> bool {
        self.worker.is_some()
    }

    /// Copy the current inter-map constraints into the input slot.
    ///
    /// Returns `false` while the solver is still busy with the previous
    /// snapshot, in which case the caller keeps its schedule bit and
    /// retries next frame.
    pub fn update_measurements(&self, scenes: &SceneManager) -> bool {
        let mut slots = self.shared.slots.lock();
        if slots.busy || slots.input.is_some() {
            return false;
        }
        slots.input = Some(ConstraintSnapshot {
            num_maps: scenes.num_scenes(),
            constraints: scenes.constraints(),
        });
        true
    }

    /// Start a solve over the pending input: signal the worker, or run
    /// the solver right here in inline mode.
    pub fn wakeup(&mut self) {
        if self.worker.is_some() {
            self.shared.wake.notify_one();
            return;
        }

        let snapshot = {
            let mut slots = self.shared.slots.lock();
            slots.input.take()
        };
        let (Some(snapshot), Some(solver)) = (snapshot, self.inline_solver.as_mut()) else {
            return;
        };

        debug!(
            "global adjustment solving {} constraints inline",
            snapshot.constraints.len()
        );
        let estimates = solver.solve(snapshot.num_maps, &snapshot.constraints);
        self.shared.slots.lock().output = Some(estimates);
    }

    /// Fold any published estimates back into the scene manager's
    /// edges. Idempotent when no output is pending.
    pub fn retrieve_new_estimates(&self, scenes: &mut SceneManager) -> bool {
        let output = self.shared.slots.lock().output.take();
        match output {
            Some(estimates) => {
                info!("ingesting {} adjusted map poses", estimates.len());
                scenes.apply_estimates(&estimates);
                true
            }
            None => false,
        }
    }
}

impl Drop for GlobalAdjustmentDriver {
    fn drop(&mut self) {
        self.shared.slots.lock().stop = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
