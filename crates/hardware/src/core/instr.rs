//! Decoded trace instructions and their in-flight lifecycle state.
//!
//! Instructions arrive pre-decoded from the trace: register and memory
//! operand lists plus a branch-taken flag. The branch category is inferred
//! from how the record touches the stack pointer, flags, and instruction
//! pointer, which is the only classification the trace format supports.

use crate::sim::trace::TraceRecord;

/// Register id reserved for "no operand".
pub const REG_NONE: u8 = 0;
/// Register id of the stack pointer in trace records.
pub const REG_STACK_POINTER: u8 = 6;
/// Register id of the flags register in trace records.
pub const REG_FLAGS: u8 = 25;
/// Register id of the instruction pointer in trace records.
pub const REG_INSTRUCTION_POINTER: u8 = 26;

/// The eight branch categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(usize)]
pub enum BranchType {
    /// Not a branch.
    #[default]
    NotBranch = 0,
    /// Unconditional direct jump.
    DirectJump = 1,
    /// Unconditional indirect jump.
    Indirect = 2,
    /// Conditional branch.
    Conditional = 3,
    /// Direct call.
    DirectCall = 4,
    /// Indirect call.
    IndirectCall = 5,
    /// Return.
    Return = 6,
    /// Anything else that writes the instruction pointer.
    Other = 7,
}

impl BranchType {
    /// Number of branch categories.
    pub const COUNT: usize = 8;

    /// All categories, in index order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::NotBranch,
        Self::DirectJump,
        Self::Indirect,
        Self::Conditional,
        Self::DirectCall,
        Self::IndirectCall,
        Self::Return,
        Self::Other,
    ];

    /// Display name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotBranch => "not_branch",
            Self::DirectJump => "direct_jump",
            Self::Indirect => "indirect",
            Self::Conditional => "conditional",
            Self::DirectCall => "direct_call",
            Self::IndirectCall => "indirect_call",
            Self::Return => "return",
            Self::Other => "other_branch",
        }
    }
}

/// Progress of a multi-cycle per-instruction action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Progress {
    /// Not started.
    #[default]
    NotStarted,
    /// Request issued, response pending.
    InFlight,
    /// Finished.
    Completed,
}

/// One in-flight instruction, threaded from the fetch buffer through the
/// reorder buffer until retirement.
#[derive(Clone, Debug, Default)]
pub struct Instruction {
    /// Strictly monotonic unique id.
    pub instr_id: u64,
    /// Program counter.
    pub ip: u64,

    /// Branch category.
    pub branch: BranchType,
    /// True if the record writes the instruction pointer.
    pub is_branch: bool,
    /// Ground-truth direction from the trace.
    pub branch_taken: bool,
    /// Predicted direction at ingestion.
    pub predicted_taken: bool,
    /// Resolved target from the trace.
    pub branch_target: u64,
    /// Whether the prediction disagreed with the trace.
    pub branch_mispredicted: bool,

    /// Source registers; `REG_NONE` entries are unused.
    pub source_registers: [u8; 4],
    /// Destination registers; `REG_NONE` entries are unused.
    pub destination_registers: [u8; 2],
    /// Source memory addresses; zero entries are unused.
    pub source_memory: [u64; 4],
    /// Destination memory addresses; zero entries are unused.
    pub destination_memory: [u64; 2],

    /// Physical address of the PC once the ITLB answers.
    pub physical_ip: u64,
    /// Fetch translation progress (ITLB).
    pub translated: Progress,
    /// Instruction fetch progress (L1I).
    pub fetched: Progress,
    /// The DIB has been consulted for this instruction.
    pub dib_checked: bool,
    /// Hit in the decoded-instruction buffer: skips fetch and decode delay.
    pub dib_hit: bool,
    /// Passed the decode stage.
    pub decoded: bool,
    /// Picked up by the scheduler.
    pub scheduled: bool,
    /// Began the functional-unit latency (non-memory path).
    pub began_execution: bool,
    /// All results produced; eligible to retire in order.
    pub executed: bool,

    /// Cycle the instruction's pending action completes.
    pub event_cycle: u64,

    /// Unresolved older register producers.
    pub num_reg_dependent: u32,
    /// ROB slots of younger instructions waiting on this one's results.
    pub reg_dependents: Vec<usize>,
    /// Load-queue slots this instruction owns.
    pub lq_slots: Vec<usize>,
    /// Store-queue slots this instruction owns.
    pub sq_slots: Vec<usize>,
    /// Memory operands completed so far.
    pub completed_mem_ops: usize,
}

impl Instruction {
    /// Builds an in-flight instruction from a trace record, classifying the
    /// branch from its register usage.
    pub fn from_record(instr_id: u64, record: &TraceRecord) -> Self {
        let reads = |reg: u8| record.source_registers.contains(&reg);
        let writes = |reg: u8| record.destination_registers.contains(&reg);

        let writes_ip = writes(REG_INSTRUCTION_POINTER);
        let writes_sp = writes(REG_STACK_POINTER);
        let reads_sp = reads(REG_STACK_POINTER);
        let reads_flags = reads(REG_FLAGS);
        let reads_ip = reads(REG_INSTRUCTION_POINTER);
        let reads_other = record.source_registers.iter().any(|&reg| {
            reg != REG_NONE
                && reg != REG_STACK_POINTER
                && reg != REG_FLAGS
                && reg != REG_INSTRUCTION_POINTER
        });

        let branch = if !writes_ip {
            BranchType::NotBranch
        } else if !reads_sp && !reads_flags && reads_ip && !reads_other {
            BranchType::DirectJump
        } else if !reads_sp && !reads_flags && !reads_ip && reads_other {
            BranchType::Indirect
        } else if !reads_sp && reads_flags && reads_ip && !reads_other {
            BranchType::Conditional
        } else if reads_sp && !reads_flags && reads_ip && !reads_other && writes_sp {
            BranchType::DirectCall
        } else if reads_sp && !reads_flags && !reads_ip && reads_other && writes_sp {
            BranchType::IndirectCall
        } else if reads_sp && !reads_flags && !reads_ip && !reads_other && writes_sp {
            BranchType::Return
        } else {
            BranchType::Other
        };

        Self {
            instr_id,
            ip: record.ip,
            branch,
            is_branch: writes_ip,
            branch_taken: record.branch_taken,
            branch_target: record.branch_target,
            source_registers: record.source_registers,
            destination_registers: record.destination_registers,
            source_memory: record.source_memory,
            destination_memory: record.destination_memory,
            ..Self::default()
        }
    }

    /// Number of memory operands (loads plus stores).
    pub fn num_mem_ops(&self) -> usize {
        self.source_memory.iter().filter(|&&a| a != 0).count()
            + self.destination_memory.iter().filter(|&&a| a != 0).count()
    }

    /// True once register results and all memory operands are complete.
    pub fn mem_ops_complete(&self) -> bool {
        self.completed_mem_ops >= self.num_mem_ops()
    }
}
