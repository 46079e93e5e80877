//! End-to-end integration tests
//!
//! These tests validate the complete seed, transfer and report pipeline using
//! predefined CSV test fixtures. Each test:
//! 1. Seeds accounts from accounts.csv in a fixture directory
//! 2. Executes every transfer of transfers.csv
//! 3. Generates output CSV
//! 4. Compares actual output with expected.csv
//!
//! Test fixtures are located in tests/fixtures/ and cover:
//! - Happy path scenarios
//! - Opposite-direction transfers on the same pair of accounts
//! - Error conditions (insufficient funds, unknown refs, currency mismatches)
//! - Malformed rows in both input files
//! - Precision of major/minor unit conversion
//!
//! Each fixture is run twice: once with one transfer in flight and once with
//! eight. Fixtures are written so that the final balances do not depend on the
//! order in which concurrent transfers commit.

#[cfg(test)]
mod tests {
    use bank_ledger::app::Pipeline;
    use bank_ledger::{BatchConfig, LedgerConfig};
    use rstest::rstest;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use tempfile::NamedTempFile;

    /// Run a fixture and compare its output with expected.csv
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - Input or expected files cannot be read
    /// - Output doesn't match expected
    fn run_test_fixture(fixture_name: &str, max_concurrent: usize) {
        let fixture_dir = format!("tests/fixtures/{}", fixture_name);
        let accounts_path = format!("{}/accounts.csv", fixture_dir);
        let transfers_path = format!("{}/transfers.csv", fixture_dir);
        let expected_path = format!("{}/expected.csv", fixture_dir);

        for path in [&accounts_path, &transfers_path, &expected_path] {
            assert!(Path::new(path).exists(), "Fixture file not found: {}", path);
        }

        let pipeline = Pipeline::new(LedgerConfig::default(), BatchConfig::new(max_concurrent));

        let mut temp_output = NamedTempFile::new().expect("Failed to create temp file");
        pipeline
            .run(
                Path::new(&accounts_path),
                Path::new(&transfers_path),
                &mut temp_output,
            )
            .unwrap_or_else(|e| panic!("Failed to run pipeline: {}", e));
        temp_output.flush().expect("Failed to flush temp file");

        let actual_output = fs::read_to_string(temp_output.path())
            .unwrap_or_else(|e| panic!("Failed to read temp output file: {}", e));
        let expected_output = fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", expected_path, e));

        assert_eq!(
            actual_output, expected_output,
            "\n\nOutput mismatch for fixture: {} (max_concurrent: {})\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name, max_concurrent, actual_output, expected_output
        );
    }

    #[rstest]
    #[case("happy_path")]
    #[case("bidirectional")]
    #[case("insufficient_funds")]
    #[case("invalid_references")]
    #[case("currency_mismatch")]
    #[case("malformed_data")]
    #[case("precision")]
    fn test_fixtures(#[case] fixture: &str, #[values(1, 8)] max_concurrent: usize) {
        run_test_fixture(fixture, max_concurrent);
    }
}
