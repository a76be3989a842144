use figment::{
    providers::{Format, Toml},
    Figment,
};

use mznatcorrer::{MZNatCorrer, OutputColumn};

#[test_log::test]
#[test_log(default_log_filter = "debug")]
fn test_labeled() {
    let mut config = Figment::new();
    config = config.merge(Toml::file_exact("tests/data/labeled.toml"));
    let driver: MZNatCorrer = config.extract().unwrap();
    assert_eq!(driver.group_columns, vec![0, 1]);
    assert_eq!(driver.isotope_columns.len(), 2);
    assert_eq!(driver.skip_rows, vec![0]);
    assert_eq!(driver.output_columns[5], OutputColumn::SampleGroupKey);
    assert_eq!(driver.analysis_config().unwrap().isotopes.len(), 2);
    driver.main().unwrap();
}
