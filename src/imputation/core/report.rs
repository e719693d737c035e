//! Report-and-continue diagnostics for imputation runs.
//!
//! Purpose
//! -------
//! Collect data-quality findings (inconsistent margins, undistributed
//! residuals, degenerate weights) without aborting the run. Core routines
//! emit [`UnitIssue`]s keyed by unit index; the group pipeline resolves them
//! into [`UnitFlag`]s keyed by geographic identifier and gathers them into a
//! [`GroupReport`] per group and an [`ImputationReport`] per run.
//!
//! Conventions
//! -----------
//! - A flag never implies an error: the affected unit still receives the best
//!   assignment the engine could find (or is left missing when stated).
//! - Group failures (structurally unusable input for that group) are carried
//!   as [`ImputeError`] values inside the report so sibling groups proceed.
use crate::imputation::errors::ImputeError;

/// What went wrong for one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagKind {
    /// Known cells exceed the margin target by `excess`; remaining clamped to 0.
    InconsistentMargin { margin: String, excess: i64 },
    /// Allocation stopped with `remaining` units of the grand total left over.
    Undistributed { remaining: i64 },
    /// Every open cell had zero population × incidence weight.
    DegenerateWeights,
    /// The allocator hit its step cap before the margins were satisfied.
    StepCapReached { steps: usize },
    /// The grand total is missing and could not be derived; cells left missing.
    MissingGrandTotal,
    /// A value or population row of the unit is unusable; the unit is closed
    /// but kept out of the allocation.
    InvalidInput { reason: String },
}

impl std::fmt::Display for FlagKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlagKind::InconsistentMargin { margin, excess } => {
                write!(f, "known cells exceed margin '{margin}' by {excess}")
            }
            FlagKind::Undistributed { remaining } => {
                write!(f, "{remaining} unit(s) of the total left undistributed")
            }
            FlagKind::DegenerateWeights => write!(f, "all allocation weights are zero"),
            FlagKind::StepCapReached { steps } => write!(f, "step cap reached after {steps} steps"),
            FlagKind::MissingGrandTotal => write!(f, "grand total missing"),
            FlagKind::InvalidInput { reason } => write!(f, "invalid input: {reason}"),
        }
    }
}

/// Issue attached to a unit by index (core-level).
#[derive(Debug, Clone, PartialEq)]
pub struct UnitIssue {
    pub unit: usize,
    pub kind: FlagKind,
}

impl UnitIssue {
    pub fn new(unit: usize, kind: FlagKind) -> UnitIssue {
        UnitIssue { unit, kind }
    }
}

/// Issue attached to a unit by geographic key (report-level).
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFlag {
    pub group: String,
    pub key: String,
    pub kind: FlagKind,
}

/// Summary of one group's run.
///
/// Fields
/// ------
/// - `units`: units with at least one missing value in the group's columns.
/// - `closed_cells`: cells resolved exactly by the closure solver.
/// - `derived_margins`: margin targets derived during closure.
/// - `stochastic_units`: units handed to the allocator.
/// - `prefilled`: count assigned deterministically by the pre-fill.
/// - `stochastic_total`: residual total distributed by each replicate.
/// - `replicates`: replicates run (0 when closure resolved everything).
/// - `selected_replicate`: index chosen by the selection rule.
/// - `flags`: data-quality findings.
/// - `failure`: set when the group could not be processed at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupReport {
    pub group: String,
    pub units: usize,
    pub closed_cells: usize,
    pub derived_margins: usize,
    pub stochastic_units: usize,
    pub prefilled: i64,
    pub stochastic_total: i64,
    pub replicates: usize,
    pub selected_replicate: Option<usize>,
    pub flags: Vec<UnitFlag>,
    pub failure: Option<ImputeError>,
}

impl GroupReport {
    pub fn new(group: impl Into<String>) -> GroupReport {
        GroupReport { group: group.into(), ..GroupReport::default() }
    }

    pub fn failed(group: impl Into<String>, err: ImputeError) -> GroupReport {
        GroupReport { group: group.into(), failure: Some(err), ..GroupReport::default() }
    }
}

/// Run-level collection of group reports.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImputationReport {
    pub groups: Vec<GroupReport>,
}

impl ImputationReport {
    /// All unit flags across groups.
    pub fn flags(&self) -> impl Iterator<Item = &UnitFlag> {
        self.groups.iter().flat_map(|g| g.flags.iter())
    }

    /// Groups that failed, with their error.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &ImputeError)> {
        self.groups.iter().filter_map(|g| g.failure.as_ref().map(|e| (g.group.as_str(), e)))
    }

    /// `true` when no group failed and no unit was flagged.
    pub fn is_clean(&self) -> bool {
        self.groups.iter().all(|g| g.failure.is_none() && g.flags.is_empty())
    }
}
