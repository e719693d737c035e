//! Integration tests for the geo-imputation pipeline.
//!
//! Purpose
//! -------
//! - Validate the end-to-end flow: CSV tables in, imputation across groups,
//!   margin recomputation, CSV out.
//! - Exercise a realistic mix of units: closure-only, stochastic with a
//!   sex margin, stochastic with sex and age margins, fully known and
//!   zero-total.
//!
//! Coverage
//! --------
//! - `table::csv_io`: reading keyed tables with empty fields as missing and
//!   writing the imputed table back.
//! - `imputation::models::Imputer`: multi-group runs, reproducibility under
//!   a fixed seed, failure isolation.
//! - `imputation::models::Disaggregator`: county → sub-unit split with a
//!   derived `AllRace` group.
//!
//! Exclusions
//! ----------
//! - Low-level closure, pre-fill and allocator behavior; these are covered
//!   by unit tests.
//! - Python bindings.
use std::io::Cursor;

use geo_imputation::{
    imputation::{
        core::{GroupSchema, options::DisaggregateOptions, options::ImputeOptions},
        models::{Disaggregator, Imputer},
    },
    table::{GeoTable, read_csv_from, write_csv_to},
};

const TARGET_CSV: &str = "\
FIPS,W_Male_50-,W_Male_50-65,W_Male_65+,W_Female_50-,W_Female_50-65,W_Female_65+,W_Total,W_Male,W_Female,W_50-,W_50-65,W_65+
01001,,2,1,1,,2,10,6,4,,,
01003,,,,,,,9,4,5,,,
01005,1,2,3,4,5,6,21,6,15,5,7,9
01007,,,,,,,0,,,,,
01009,,,,,,,12,5,7,4,5,3
";

const POPULATION_CSV: &str = "\
FIPS,W_Male_50-,W_Male_50-65,W_Male_65+,W_Female_50-,W_Female_50-65,W_Female_65+
01001,100,80,60,110,90,70
01003,500,300,200,520,310,230
01005,10,10,10,10,10,10
01007,40,30,20,45,35,25
01009,70,20,5,10,40,90
";

/// Purpose
/// -------
/// Parse an in-memory CSV into a [`GeoTable`] keyed by its first column.
fn table(csv: &str) -> GeoTable {
    read_csv_from(Cursor::new(csv.as_bytes()), None).expect("well-formed csv")
}

fn value(table: &GeoTable, key: &str, column: &str) -> Option<f64> {
    let row = table.row_of(key).expect("known key");
    table.get(row, table.column_of(column).expect("known column"))
}

fn run(seed: u64, workers: usize) -> GeoTable {
    let options =
        ImputeOptions { replicates: 25, seed: Some(seed), workers: Some(workers), ..Default::default() };
    let schema = GroupSchema::default_sex_by_age("W").expect("valid layout");
    Imputer::new(options)
        .expect("valid options")
        .impute(&table(TARGET_CSV), &table(POPULATION_CSV), None, &[schema])
        .expect("imputation runs")
        .table
}

#[test]
// Purpose
// -------
// Verify the imputed table is complete, keeps known values, and satisfies
// every margin of every unit.
//
// Given
// -----
// - Five counties: closure-only, stochastic under a sex split, stochastic
//   under both sex and age splits (01009), fully known, zero total.
//
// Expect
// ------
// - No missing W cells; known inputs unchanged.
// - Every margin given on input equals the sum of the imputed cells.
// - Each output margin equals the sum of its cells.
fn pipeline_produces_consistent_tables() {
    // Arrange
    let schema = GroupSchema::default_sex_by_age("W").expect("valid layout");
    let input = table(TARGET_CSV);

    // Act
    let output = run(2024, 2);

    // Assert
    assert_eq!(output.count_missing(schema.cells()), 0);
    for key in input.keys() {
        for cell in schema.cells() {
            if let Some(known) = value(&input, key, cell) {
                assert_eq!(value(&output, key, cell), Some(known), "{key} {cell}");
            }
        }
        for margin in schema.margins() {
            let sum: f64 = margin
                .members
                .iter()
                .map(|&c| value(&output, key, &schema.cells()[c]).expect("filled"))
                .sum();
            if let Some(given) = value(&input, key, &margin.column) {
                assert_eq!(sum, given, "{key} input {}", margin.column);
            }
            assert_eq!(value(&output, key, &margin.column), Some(sum), "{key} {}", margin.column);
        }
    }
    assert_eq!(value(&output, "01001", "W_Male_50-"), Some(3.0));
    assert_eq!(value(&output, "01003", "W_Male"), Some(4.0));
    assert_eq!(value(&output, "01007", "W_Female_65+"), Some(0.0));
}

#[test]
// Purpose
// -------
// Ensure a fixed seed reproduces the written CSV byte for byte, for any
// worker count.
fn pipeline_is_reproducible_with_seed() {
    let mut first = Vec::new();
    let mut second = Vec::new();

    write_csv_to(&run(99, 1), &mut first).expect("writes");
    write_csv_to(&run(99, 4), &mut second).expect("writes");

    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[test]
// Purpose
// -------
// Verify a written output can be read back unchanged.
fn pipeline_output_round_trips_through_csv() {
    let output = run(5, 2);
    let mut bytes = Vec::new();

    write_csv_to(&output, &mut bytes).expect("writes");
    let reread = read_csv_from(Cursor::new(bytes), None).expect("reads");

    assert_eq!(reread.keys(), output.keys());
    assert_eq!(reread.columns(), output.columns());
    assert_eq!(reread.values(), output.values());
}

#[test]
// Purpose
// -------
// Verify county totals are split across sub-units and the derived AllRace
// group sums the race groups.
//
// Given
// -----
// - Two counties with W and B counts; three sub-units under the first and
//   one under the second.
//
// Expect
// ------
// - Sub-unit W/B cells sum to the county counts; AllRace cells equal W + B
//   per sub-unit; the single sub-unit of the second county receives its
//   county's counts exactly.
fn disaggregation_splits_county_totals() {
    // Arrange
    let w = GroupSchema::default_sex_by_age("W").expect("valid");
    let b = GroupSchema::default_sex_by_age("B").expect("valid");
    let all = GroupSchema::default_sex_by_age("AllRace").expect("valid");
    let columns: Vec<String> = w.cells().iter().chain(b.cells()).cloned().collect();
    let parents = GeoTable::new(
        "FIPS",
        vec!["01001".into(), "01003".into()],
        columns.clone(),
        ndarray::array![
            [12., 7., 3., 9., 4., 0., 5., 2., 1., 6., 0., 2.],
            [1., 0., 2., 0., 3., 1., 0., 0., 4., 0., 1., 0.]
        ],
    )
    .expect("valid");
    let population = GeoTable::new(
        "ZCTA",
        vec!["35004".into(), "35005".into(), "35006".into(), "36003".into()],
        columns.clone(),
        ndarray::Array2::from_shape_fn((4, 12), |(r, c)| ((r + 1) * (c % 5 + 1)) as f64),
    )
    .expect("valid");
    let parent_of: Vec<String> =
        vec!["01001".into(), "01001".into(), "01001".into(), "01003".into()];
    let options = DisaggregateOptions { replicates: 40, seed: Some(17), ..Default::default() };
    let disaggregator = Disaggregator::new(options).expect("valid").with_total_group(all.clone());

    // Act
    let outcome = disaggregator
        .disaggregate(&parents, &population, &parent_of, &[w, b])
        .expect("well-formed");

    // Assert
    let out = &outcome.table;
    for (c, column) in columns.iter().enumerate() {
        let county: f64 = ["35004", "35005", "35006"]
            .iter()
            .map(|k| value(out, k, column).expect("filled"))
            .sum();
        assert_eq!(county, parents.get(0, c).expect("present"), "{column}");
        assert_eq!(value(out, "36003", column), parents.get(1, c), "{column}");
    }
    for key in out.keys() {
        for (i, cell) in all.cells().iter().enumerate() {
            let w_cell = value(out, key, &columns[i]).expect("filled");
            let b_cell = value(out, key, &columns[6 + i]).expect("filled");
            assert_eq!(value(out, key, cell), Some(w_cell + b_cell));
        }
    }
    assert!(outcome.flags.is_empty());
}
