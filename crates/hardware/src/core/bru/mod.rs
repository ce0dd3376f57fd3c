//! Branch resolution unit: direction predictors and the target buffer.
//!
//! The direction predictor and the BTB are independent module selections.
//! Non-conditional control flow is always predicted taken; the predictor
//! only weighs in on conditionals. Returns are targeted through a small
//! return-address stack owned by the BTB.

/// Per-PC 2-bit counters.
pub mod bimodal;

/// Branch target buffer with a return-address stack.
pub mod btb;

/// Global-history XOR predictor.
pub mod gshare;

pub use bimodal::BimodalPredictor;
pub use btb::Btb;
pub use gshare::GSharePredictor;

use crate::config::{BranchPredictor as PredictorId, BtbKind, CoreConfig};
use crate::core::instr::{BranchType, Instruction};

/// Direction prediction for conditional branches.
pub trait DirectionPredictor {
    /// Predicts taken/not-taken for the branch at `ip`.
    fn predict(&self, ip: u64) -> bool;

    /// Trains on a resolved branch.
    fn last_branch_result(&mut self, ip: u64, target: u64, taken: bool, branch: BranchType);
}

/// The core's combined direction + target machinery.
pub struct BranchUnit {
    predictor: Box<dyn DirectionPredictor>,
    btb: Btb,
}

impl BranchUnit {
    /// Builds the configured predictor and BTB.
    pub fn new(config: &CoreConfig) -> Self {
        let predictor: Box<dyn DirectionPredictor> = match config.branch_predictor {
            PredictorId::Bimodal => Box::new(BimodalPredictor::new()),
            PredictorId::GShare => Box::new(GSharePredictor::new()),
        };
        let BtbKind::Basic = config.btb;
        Self {
            predictor,
            btb: Btb::new(config.btb_size),
        }
    }

    /// Predicts direction and target for an ingested branch.
    /// Returns `(taken, target)`; target 0 means "unknown".
    pub fn predict(&mut self, instr: &Instruction) -> (bool, u64) {
        let taken = match instr.branch {
            BranchType::NotBranch => return (false, 0),
            BranchType::Conditional => self.predictor.predict(instr.ip),
            _ => true,
        };
        if !taken {
            return (false, 0);
        }
        let target = match instr.branch {
            BranchType::Return => self.btb.predict_return().unwrap_or(0),
            _ => self.btb.lookup(instr.ip).unwrap_or(0),
        };
        (true, target)
    }

    /// Trains predictor and BTB on a retired branch.
    pub fn last_branch_result(&mut self, instr: &Instruction) {
        self.predictor.last_branch_result(
            instr.ip,
            instr.branch_target,
            instr.branch_taken,
            instr.branch,
        );
        match instr.branch {
            BranchType::DirectCall | BranchType::IndirectCall => {
                // The return address is the record after the call site.
                self.btb.push_return(instr.ip + 4);
                if instr.branch_taken && instr.branch_target != 0 {
                    self.btb.update(instr.ip, instr.branch_target);
                }
            }
            BranchType::Return => self.btb.pop_return(),
            _ => {
                if instr.branch_taken && instr.branch_target != 0 {
                    self.btb.update(instr.ip, instr.branch_target);
                }
            }
        }
    }
}
