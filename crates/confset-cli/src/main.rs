use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use confset_cli::predict::input::PredictSetsConfig;
use confset_cli::predict::runner::{run_prediction, write_output};

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("CONFSET_LOG", "error,confset=info"))
        .init();

    let matches = Command::new("confset")
        .version(clap::crate_version!())
        .about("Conformal prediction sets for probabilistic classifiers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("predict")
                .about("Calibrate a classifier and write prediction sets for test data")
                .arg(
                    Arg::new("config")
                        .help("Path to the JSON configuration file")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("calibration_data")
                        .short('c')
                        .long("calibration_data")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help(
                            "Path to labeled calibration data. Overrides the calibration data \
                             file specified in the configuration file.",
                        )
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("test_data")
                        .short('t')
                        .long("test_data")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help(
                            "Path to test data. Overrides the test data file specified in the \
                             configuration file.",
                        )
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("output_file")
                        .short('o')
                        .long("output_file")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new())
                        .help("Path to the output file for prediction sets (*.tsv or *.csv)")
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("method")
                        .short('m')
                        .long("method")
                        .help("Conformity score. Overrides the method in the configuration file.")
                        .value_parser(["naive", "lac", "aps", "raps", "top_k"]),
                )
                .arg(
                    Arg::new("cv")
                        .long("cv")
                        .help("Calibration strategy. Overrides the cv in the configuration file.")
                        .value_parser(["prefit", "split", "k_fold", "leave_one_out"]),
                )
                .arg(
                    Arg::new("alpha")
                        .short('a')
                        .long("alpha")
                        .help("Risk level(s) in (0, 1). Repeat for several alphas.")
                        .value_parser(clap::value_parser!(f64))
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("include_last_label")
                        .long("include-last-label")
                        .help("Policy for the label that crosses the threshold.")
                        .value_parser(["true", "false", "randomized"]),
                )
                .arg(
                    Arg::new("agg_scores")
                        .long("agg-scores")
                        .help("Aggregation of cross-validated estimators.")
                        .value_parser(["mean", "crossval"]),
                )
                .arg(
                    Arg::new("random_state")
                        .long("seed")
                        .help("Seed for splits, folds and randomized sets.")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            Command::new("defaults").about("Print the default configuration as JSON"),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    match matches.subcommand() {
        Some(("predict", sub_m)) => handle_predict(sub_m),
        Some(("defaults", _)) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&PredictSetsConfig::default())?
            );
            Ok(())
        }
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_predict(matches: &ArgMatches) -> Result<()> {
    let Some(config_path) = matches.get_one::<PathBuf>("config") else {
        unreachable!("config is a required argument")
    };
    log::info!("[confset::predict] Using config: {:?}", config_path);

    let config = match PredictSetsConfig::from_arguments(config_path, matches) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {:#}", e);
            std::process::exit(1)
        }
    };

    match run_prediction(&config).and_then(|output| write_output(&config.output_file, &output)) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::error!("Prediction failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
