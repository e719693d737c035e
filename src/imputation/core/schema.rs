//! Group schema — the cell/margin constraint graph of one demographic group.
//!
//! Purpose
//! -------
//! Describe which table columns hold the cells being imputed for one group
//! (e.g. `W_Male_50-`, …) and which aggregate columns constrain them
//! (`W_Total`, `W_Male`, `W_50-`, …). The schema is the explicit constraint
//! graph: every margin lists the cells it bounds, and every cell lists the
//! margins that bound it, so allocation updates touch only the affected
//! margins.
//!
//! Key behaviors
//! -------------
//! - Validate that the margins form a usable hierarchy: exactly one grand
//!   total covering every cell, non-empty margins, in-range members.
//! - Build the inverse `cell → margins` index at construction time.
//! - Detect *partitions*: sets of same-kind margins (all sex subtotals, all
//!   age-band subtotals) whose members cover each cell exactly once. The
//!   closure solver uses them to derive missing subtotals from the grand
//!   total and vice versa.
//!
//! Invariants & assumptions
//! ------------------------
//! - Cell and margin order is fixed after construction; indices into
//!   [`GroupSchema::cells`] and [`GroupSchema::margins`] are stable and used as
//!   matrix column indices throughout the engine.
//! - Column names are resolved per group; two schemas never share mutable
//!   state, so groups can be processed independently.
//!
//! Conventions
//! -----------
//! - Cells are named `{group}_{sex}_{age}`, sex subtotals `{group}_{sex}`,
//!   age subtotals `{group}_{age}`, and the grand total `{group}_Total` in the
//!   sex-by-age layout. The category-total layout uses `{category}_Total`
//!   cells under a `{parent}_Total` margin.
use crate::imputation::errors::{ImputeError, ImputeResult};

/// Sex labels of the default sex-by-age layout.
pub const DEFAULT_SEXES: [&str; 2] = ["Male", "Female"];

/// Age-band labels of the default sex-by-age layout.
pub const DEFAULT_AGE_BANDS: [&str; 3] = ["50-", "50-65", "65+"];

/// Race/ethnicity groups processed by default (`AllRace` first).
pub const DEFAULT_GROUPS: [&str; 7] = ["AllRace", "W", "B", "I", "A", "H", "O"];

/// Level of a margin in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarginKind {
    /// Unit grand total; bounds every cell.
    Grand,
    /// Sex subtotal.
    Sex,
    /// Age-band subtotal.
    Age,
}

/// One named linear constraint: `Σ cells[members] = target`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginSpec {
    pub kind: MarginKind,
    /// Table column holding the margin's target.
    pub column: String,
    /// Indices into the schema's cell list.
    pub members: Vec<usize>,
}

impl MarginSpec {
    pub fn new(kind: MarginKind, column: impl Into<String>, members: Vec<usize>) -> MarginSpec {
        MarginSpec { kind, column: column.into(), members }
    }
}

/// GroupSchema — validated constraint graph for one demographic group.
///
/// Fields
/// ------
/// - `name`: group label used in reports and logs (e.g. `"W"`).
/// - `cells`: ordered cell column names.
/// - `margins`: ordered margin specs.
/// - `cell_margins`: for each cell, the indices of margins bounding it.
/// - `grand`: index of the grand-total margin.
/// - `partitions`: same-kind margin sets that cover every cell exactly once.
///
/// Invariants
/// ----------
/// - Exactly one [`MarginKind::Grand`] margin and it bounds every cell.
/// - Every margin is non-empty and its members are `< cells.len()`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSchema {
    name: String,
    cells: Vec<String>,
    margins: Vec<MarginSpec>,
    cell_margins: Vec<Vec<usize>>,
    grand: usize,
    partitions: Vec<Vec<usize>>,
}

impl GroupSchema {
    /// Build and validate a schema.
    ///
    /// # Errors
    /// - [`ImputeError::EmptySchema`] when `cells` is empty.
    /// - [`ImputeError::EmptyMargin`] / [`ImputeError::MarginMemberOutOfRange`]
    ///   for malformed margins.
    /// - [`ImputeError::GrandMarginCount`] unless exactly one grand margin exists.
    /// - [`ImputeError::GrandMarginIncomplete`] when the grand margin misses cells.
    pub fn new(
        name: impl Into<String>, cells: Vec<String>, margins: Vec<MarginSpec>,
    ) -> ImputeResult<GroupSchema> {
        let name = name.into();
        if cells.is_empty() {
            return Err(ImputeError::EmptySchema { group: name });
        }

        let mut cell_margins = vec![Vec::new(); cells.len()];
        for (m, margin) in margins.iter().enumerate() {
            if margin.members.is_empty() {
                return Err(ImputeError::EmptyMargin { margin: margin.column.clone() });
            }
            for &c in &margin.members {
                if c >= cells.len() {
                    return Err(ImputeError::MarginMemberOutOfRange {
                        margin: margin.column.clone(),
                        index: c,
                        cells: cells.len(),
                    });
                }
                if !cell_margins[c].contains(&m) {
                    cell_margins[c].push(m);
                }
            }
        }

        let grands: Vec<usize> = margins
            .iter()
            .enumerate()
            .filter(|(_, m)| m.kind == MarginKind::Grand)
            .map(|(i, _)| i)
            .collect();
        if grands.len() != 1 {
            return Err(ImputeError::GrandMarginCount { group: name, found: grands.len() });
        }
        let grand = grands[0];
        let missing = cell_margins.iter().filter(|ms| !ms.contains(&grand)).count();
        if missing > 0 {
            return Err(ImputeError::GrandMarginIncomplete { group: name, missing });
        }

        let partitions = find_partitions(cells.len(), &margins);
        Ok(GroupSchema { name, cells, margins, cell_margins, grand, partitions })
    }

    /// Sex-by-age layout: one cell per `(sex, age)` pair, sex and age
    /// subtotals, and a grand total.
    pub fn sex_by_age<S: AsRef<str>>(
        group: &str, sexes: &[S], ages: &[S],
    ) -> ImputeResult<GroupSchema> {
        let n_ages = ages.len();
        let mut cells = Vec::with_capacity(sexes.len() * n_ages);
        for sex in sexes {
            for age in ages {
                cells.push(format!("{group}_{}_{}", sex.as_ref(), age.as_ref()));
            }
        }

        let mut margins = vec![MarginSpec::new(
            MarginKind::Grand,
            format!("{group}_Total"),
            (0..cells.len()).collect(),
        )];
        for (s, sex) in sexes.iter().enumerate() {
            let members = (0..n_ages).map(|a| s * n_ages + a).collect();
            margins.push(MarginSpec::new(
                MarginKind::Sex,
                format!("{group}_{}", sex.as_ref()),
                members,
            ));
        }
        for (a, age) in ages.iter().enumerate() {
            let members = (0..sexes.len()).map(|s| s * n_ages + a).collect();
            margins.push(MarginSpec::new(
                MarginKind::Age,
                format!("{group}_{}", age.as_ref()),
                members,
            ));
        }
        GroupSchema::new(group, cells, margins)
    }

    /// Sex-by-age layout with the default sex and age-band labels.
    pub fn default_sex_by_age(group: &str) -> ImputeResult<GroupSchema> {
        GroupSchema::sex_by_age(group, &DEFAULT_SEXES, &DEFAULT_AGE_BANDS)
    }

    /// Category-total layout: `{category}_Total` cells under a single
    /// `{parent}_Total` grand margin.
    pub fn category_totals<S: AsRef<str>>(
        parent: &str, categories: &[S],
    ) -> ImputeResult<GroupSchema> {
        let cells: Vec<String> =
            categories.iter().map(|c| format!("{}_Total", c.as_ref())).collect();
        let margin =
            MarginSpec::new(MarginKind::Grand, format!("{parent}_Total"), (0..cells.len()).collect());
        GroupSchema::new(parent, cells, vec![margin])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn margins(&self) -> &[MarginSpec] {
        &self.margins
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_margins(&self) -> usize {
        self.margins.len()
    }

    /// Index of the grand-total margin.
    pub fn grand(&self) -> usize {
        self.grand
    }

    /// Margins bounding `cell`.
    pub fn margins_of(&self, cell: usize) -> &[usize] {
        &self.cell_margins[cell]
    }

    /// Same-kind margin sets that partition the cells.
    pub fn partitions(&self) -> &[Vec<usize>] {
        &self.partitions
    }
}

/// Default sex-by-age schemas for [`DEFAULT_GROUPS`].
pub fn default_schemas() -> ImputeResult<Vec<GroupSchema>> {
    DEFAULT_GROUPS.iter().map(|g| GroupSchema::default_sex_by_age(g)).collect()
}

// ---- Helper methods ----

fn find_partitions(n_cells: usize, margins: &[MarginSpec]) -> Vec<Vec<usize>> {
    let mut partitions = Vec::new();
    for kind in [MarginKind::Sex, MarginKind::Age] {
        let same_kind: Vec<usize> =
            margins.iter().enumerate().filter(|(_, m)| m.kind == kind).map(|(i, _)| i).collect();
        if same_kind.is_empty() {
            continue;
        }
        let mut cover = vec![0usize; n_cells];
        for &m in &same_kind {
            for &c in &margins[m].members {
                cover[c] += 1;
            }
        }
        if cover.iter().all(|&n| n == 1) {
            partitions.push(same_kind);
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Column naming and margin membership of the sex-by-age layout.
    // - The inverse cell → margin index and partition detection.
    // - Rejection of malformed hierarchies.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Verify the default 2×3 layout names cells `{group}_{sex}_{age}` and
    // margins `{group}_Total`, `{group}_{sex}` and `{group}_{age}`.
    //
    // Given
    // -----
    // - `GroupSchema::default_sex_by_age("W")`.
    //
    // Expect
    // ------
    // - Six cells in sex-major order; six margins (Total, Male, Female,
    //   50-, 50-65, 65+); `W_Female_50-65` bounded by Total, Female and 50-65.
    fn sex_by_age_layout_matches_column_conventions() {
        // Arrange / Act
        let schema = GroupSchema::default_sex_by_age("W").expect("valid layout");

        // Assert
        assert_eq!(schema.cells()[0], "W_Male_50-");
        assert_eq!(schema.cells()[4], "W_Female_50-65");
        let columns: Vec<&str> = schema.margins().iter().map(|m| m.column.as_str()).collect();
        assert_eq!(columns, vec!["W_Total", "W_Male", "W_Female", "W_50-", "W_50-65", "W_65+"]);
        assert_eq!(schema.margins()[4].members, vec![1, 4]);

        let bounding: Vec<&str> =
            schema.margins_of(4).iter().map(|&m| schema.margins()[m].column.as_str()).collect();
        assert_eq!(bounding, vec!["W_Total", "W_Female", "W_50-65"]);
        assert_eq!(schema.partitions().len(), 2);
    }

    #[test]
    // Purpose
    // -------
    // Verify the single-margin category-total layout.
    //
    // Given
    // -----
    // - Parent "AllRace" over categories W, B, I.
    //
    // Expect
    // ------
    // - Cells `W_Total`, `B_Total`, `I_Total`; one grand margin; no partitions.
    fn category_totals_layout_has_single_grand_margin() {
        // Arrange / Act
        let schema = GroupSchema::category_totals("AllRace", &["W", "B", "I"]).expect("valid");

        // Assert
        assert_eq!(schema.cells(), &["W_Total", "B_Total", "I_Total"]);
        assert_eq!(schema.n_margins(), 1);
        assert_eq!(schema.margins()[schema.grand()].column, "AllRace_Total");
        assert!(schema.partitions().is_empty());
    }

    #[test]
    // Purpose
    // -------
    // Ensure a schema without a grand margin is rejected.
    //
    // Given
    // -----
    // - Two cells bounded only by a sex margin.
    //
    // Expect
    // ------
    // - `ImputeError::GrandMarginCount { found: 0, .. }`.
    fn new_rejects_missing_grand_margin() {
        // Arrange
        let cells = vec!["a".to_string(), "b".to_string()];
        let margins = vec![MarginSpec::new(MarginKind::Sex, "s", vec![0, 1])];

        // Act
        let err = GroupSchema::new("g", cells, margins).unwrap_err();

        // Assert
        assert_eq!(err, ImputeError::GrandMarginCount { group: "g".into(), found: 0 });
    }

    #[test]
    // Purpose
    // -------
    // Ensure out-of-range members and incomplete grand margins are rejected.
    //
    // Given
    // -----
    // - A margin referencing cell 5 of a 2-cell schema.
    // - A grand margin covering only cell 0 of 2.
    //
    // Expect
    // ------
    // - `MarginMemberOutOfRange` and `GrandMarginIncomplete` respectively.
    fn new_rejects_malformed_members() {
        // Arrange
        let cells = vec!["a".to_string(), "b".to_string()];

        // Act
        let out_of_range = GroupSchema::new(
            "g",
            cells.clone(),
            vec![MarginSpec::new(MarginKind::Grand, "t", vec![0, 5])],
        )
        .unwrap_err();
        let incomplete =
            GroupSchema::new("g", cells, vec![MarginSpec::new(MarginKind::Grand, "t", vec![0])])
                .unwrap_err();

        // Assert
        assert!(matches!(out_of_range, ImputeError::MarginMemberOutOfRange { index: 5, .. }));
        assert_eq!(incomplete, ImputeError::GrandMarginIncomplete { group: "g".into(), missing: 1 });
    }
}
