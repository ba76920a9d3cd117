use crate::Options;
use std::path::PathBuf;

fn parse(args: &[&str]) -> anyhow::Result<Options> {
    Options::parse(args.iter().map(|a| a.to_string()))
}

#[test]
fn no_arguments_runs_the_device_loop() {
    assert_eq!(parse(&[]).unwrap(), Options::default());
}

#[test]
fn development_flags_are_recognised() {
    let options = parse(&["--stdout", "--once", "--verbose", "--config", "dev.toml"]).unwrap();
    assert!(options.stdout);
    assert!(options.once);
    assert!(options.verbose);
    assert_eq!(options.config, Some(PathBuf::from("dev.toml")));
}

#[test]
fn config_flag_needs_a_path() {
    assert!(parse(&["--config"]).is_err());
}

#[test]
fn unknown_flags_are_rejected() {
    let error = parse(&["--fast"]).unwrap_err();
    assert!(error.to_string().contains("--fast"));
}
