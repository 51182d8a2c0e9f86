//! Unit tests for CLI commands

use crate::cli::{sample_engine, sample_request, Cli, Commands, ExecutionArg, LogFormatArg};
use crate::dispatcher::ExecutionMode;
use crate::runtime_config::EngineConfig;
use clap::Parser;
use http::StatusCode;
use std::time::Duration;

#[test]
fn test_run_command_defaults() {
    let cli = Cli::try_parse_from(["neurite-loadgen", "run"]).unwrap();

    match cli.command {
        Commands::Run {
            concurrency,
            requests,
            duration_ms,
            execution,
            workers,
            json,
        } => {
            assert_eq!(concurrency, 8);
            assert_eq!(requests, None);
            assert_eq!(duration_ms, None);
            assert_eq!(execution, None);
            assert_eq!(workers, None);
            assert!(!json);
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_run_command_with_flags() {
    let cli = Cli::try_parse_from([
        "neurite-loadgen",
        "--log-format",
        "pretty",
        "run",
        "-n",
        "4",
        "--requests",
        "500",
        "--duration-ms",
        "250",
        "--execution",
        "pooled",
        "--workers",
        "3",
        "--json",
    ])
    .unwrap();

    assert_eq!(cli.log_format, Some(LogFormatArg::Pretty));
    match cli.command {
        Commands::Run {
            concurrency,
            requests,
            duration_ms,
            execution,
            workers,
            json,
        } => {
            assert_eq!(concurrency, 4);
            assert_eq!(requests, Some(500));
            assert_eq!(duration_ms, Some(250));
            assert_eq!(execution, Some(ExecutionArg::Pooled));
            assert_eq!(workers, Some(3));
            assert!(json);
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_global_config_after_subcommand() {
    let cli = Cli::try_parse_from(["neurite-loadgen", "routes", "--config", "engine.yaml"]).unwrap();
    assert!(matches!(cli.command, Commands::Routes));
    assert_eq!(
        cli.config.as_deref().map(|p| p.to_string_lossy().into_owned()),
        Some("engine.yaml".to_string())
    );
}

#[test]
fn test_unknown_execution_mode_rejected() {
    assert!(Cli::try_parse_from(["neurite-loadgen", "run", "--execution", "fibers"]).is_err());
}

#[test]
fn test_execution_arg_maps_to_mode() {
    assert_eq!(ExecutionMode::from(ExecutionArg::Inline), ExecutionMode::Inline);
    assert_eq!(ExecutionMode::from(ExecutionArg::Pooled), ExecutionMode::Pooled);
}

#[test]
fn test_sample_request_mix_against_sample_engine() {
    let config = EngineConfig {
        workers: 2,
        ..EngineConfig::default()
    };
    let engine = sample_engine(config).unwrap();

    let expected = [
        StatusCode::OK,
        StatusCode::OK,
        StatusCode::OK,
        StatusCode::OK,
        StatusCode::OK,
        StatusCode::NOT_FOUND,
    ];
    for (n, status) in expected.iter().enumerate() {
        let response = engine.serve(sample_request(n as u64 + 6));
        assert_eq!(response.status(), *status, "request #{n}");
    }

    let echo = engine.serve(sample_request(9));
    assert_eq!(echo.json_body().unwrap()["message"], "hello 9");

    let report = engine.shutdown(Duration::from_secs(1));
    assert!(report.is_clean());
}
