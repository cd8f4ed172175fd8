// tests/lifecycle.rs

mod common;

use common::*;
use serde_json::json;
use stratus::core::commands::CommandError;
use stratus::core::config_loader::ConfigError;
use stratus::core::dispatcher::LifecycleError;
use stratus::models::{CommandSpec, OptionSpec};
use stratus::{RunOutcome, Runner};
use tempfile::tempdir;

fn service() -> serde_json::Value {
    json!({ "service": "shop", "provider": "aws" })
}

fn deploy_command() -> CommandSpec {
    CommandSpec::new("deploy")
        .lifecycle_events(&["package", "deploy"])
        .option("force", OptionSpec::boolean("Force"))
}

#[tokio::test]
async fn hooks_run_in_phase_then_load_order() {
    let dir = tempdir().unwrap();
    write_service(dir.path(), &service());
    let journal = journal();

    // Loaded first despite sorting last by name.
    let zeta = Probe::new("zeta", &journal)
        .command(deploy_command())
        .hook("after:deploy:package")
        .hook("deploy:deploy")
        .hook("before:deploy:package")
        .hook("initialize");
    let alpha = Probe::new("alpha", &journal)
        .hook("deploy:package")
        .hook("before:deploy:package")
        .hook("finalize");

    let outcome = Runner::new(dir.path())
        .with_core_plugins(Vec::new())
        .with_local_plugin(zeta.spec())
        .with_local_plugin(alpha.spec())
        .run(&args(&["deploy"]))
        .await
        .unwrap();

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(
        entries(&journal),
        [
            "zeta@initialize",
            "zeta@before:deploy:package",
            "alpha@before:deploy:package",
            "alpha@deploy:package",
            "zeta@after:deploy:package",
            "zeta@deploy:deploy",
            "alpha@finalize",
        ]
    );
}

#[tokio::test]
async fn failing_hook_stops_the_pipeline_and_runs_error_hooks() {
    let dir = tempdir().unwrap();
    write_service(dir.path(), &service());
    let journal = journal();

    let first = Probe::new("first", &journal)
        .command(CommandSpec::new("deploy").lifecycle_events(&["function", "cleanup"]))
        .hook("before:deploy:function")
        .hook("deploy:function")
        .failing_on("deploy:function");
    let second = Probe::new("second", &journal)
        .hook("deploy:function")
        .hook("after:deploy:function")
        .hook("deploy:cleanup")
        .hook("finalize")
        .hook("error");

    let err = Runner::new(dir.path())
        .with_core_plugins(Vec::new())
        .with_local_plugin(first.spec())
        .with_local_plugin(second.spec())
        .run(&args(&["deploy"]))
        .await
        .unwrap_err();

    assert_eq!(
        entries(&journal),
        ["first@before:deploy:function", "first@deploy:function", "second@error"]
    );
    match err.downcast_ref::<LifecycleError>() {
        Some(LifecycleError::HookFailed { plugin, hook, .. }) => {
            assert_eq!(plugin, "first");
            assert_eq!(hook, "deploy:function");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.to_string().contains("first gave up"));
}

#[tokio::test]
async fn help_and_usage_errors_run_no_hooks() {
    let dir = tempdir().unwrap();
    write_service(dir.path(), &service());
    let journal = journal();
    let probe = Probe::new("probe", &journal)
        .command(deploy_command())
        .hook("initialize")
        .hook("deploy:deploy");
    let runner = Runner::new(dir.path())
        .with_core_plugins(Vec::new())
        .with_local_plugin(probe.spec());

    colored::control::set_override(false);
    let RunOutcome::Help(root_help) = runner.run(&args(&["--help"])).await.unwrap() else {
        panic!("expected root help");
    };
    assert!(root_help.contains("deploy"));

    let RunOutcome::Help(command_help) = runner.run(&args(&["deploy", "-h"])).await.unwrap() else {
        panic!("expected command help");
    };
    assert!(command_help.contains("--force"));

    assert!(matches!(
        runner.run(&args(&["--version"])).await.unwrap(),
        RunOutcome::Version(_)
    ));

    let err = runner.run(&args(&["destroy"])).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CommandError>(),
        Some(CommandError::UnknownCommand { .. })
    ));
    let err = runner.run(&args(&["deploy", "--bogus"])).await.unwrap_err();
    assert!(err.downcast_ref::<CommandError>().unwrap().is_usage_error());

    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn commands_without_a_service_file_only_offer_help() {
    let dir = tempdir().unwrap();
    let runner = Runner::new(dir.path());

    assert!(matches!(
        runner.run(&args(&["--help"])).await.unwrap(),
        RunOutcome::Help(_)
    ));
    let err = runner.run(&args(&["info"])).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::NotFound { .. })
    ));
}

#[tokio::test]
async fn unknown_service_plugins_are_fatal() {
    let dir = tempdir().unwrap();
    write_service(
        dir.path(),
        &json!({ "service": "shop", "provider": "aws", "plugins": ["does-not-exist"] }),
    );
    let err = Runner::new(dir.path()).run(&args(&["info"])).await.unwrap_err();
    assert!(err.to_string().contains("does-not-exist"));
}

#[tokio::test]
async fn deploy_packages_then_calls_the_provider() {
    let dir = tempdir().unwrap();
    write_service(
        dir.path(),
        &json!({
            "service": "shop",
            "provider": { "name": "aws", "region": "${opt:region, 'eu-west-1'}" },
            "functions": { "hello": { "handler": "handler.hello" } }
        }),
    );
    let (provider, requests) = recording_provider();

    let outcome = Runner::new(dir.path())
        .with_provider_plugin(provider)
        .run(&args(&["deploy", "--stage", "prod"]))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed);

    let package = dir.path().join(".stratus");
    assert!(package.join("configuration.json").is_file());
    assert!(package.join("hello.json").is_file());

    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (service, operation, params) = &requests[0];
    assert_eq!((service.as_str(), operation.as_str()), ("Deployment", "deployService"));
    assert_eq!(params["stage"], json!("prod"));
    assert_eq!(params["region"], json!("eu-west-1"));
}

#[tokio::test]
async fn deploy_with_an_existing_package_skips_packaging() {
    let dir = tempdir().unwrap();
    write_service(dir.path(), &service());
    let (provider, requests) = recording_provider();
    let runner = Runner::new(dir.path()).with_provider_plugin(provider);

    // Nothing packaged yet.
    let err = runner.run(&args(&["deploy", "--package", "out"])).await.unwrap_err();
    assert!(format!("{:#}", err).contains("No deployment artifacts"));
    assert!(requests.lock().unwrap().is_empty());

    runner.run(&args(&["package", "-p", "out"])).await.unwrap();
    assert!(dir.path().join("out/configuration.json").is_file());
    runner.run(&args(&["deploy", "--package", "out"])).await.unwrap();
    assert_eq!(requests.lock().unwrap().len(), 1);
    assert!(!dir.path().join(".stratus").exists());
}

#[tokio::test]
async fn package_refuses_to_clean_the_service_directory() {
    let dir = tempdir().unwrap();
    write_service(dir.path(), &service());
    std::fs::write(dir.path().join("handler.js"), "exports.hello = () => {};").unwrap();
    let runner = Runner::new(dir.path());

    let err = runner.run(&args(&["package", "--package", "."])).await.unwrap_err();
    assert!(format!("{:#}", err).contains("contains the service"));
    assert!(dir.path().join("handler.js").is_file());
    assert!(dir.path().join("stratus.json").is_file());
}

#[tokio::test]
async fn deploy_function_requires_a_known_function() {
    let dir = tempdir().unwrap();
    write_service(
        dir.path(),
        &json!({
            "service": "shop",
            "provider": "aws",
            "functions": { "hello": { "handler": "handler.hello" } }
        }),
    );
    let (provider, requests) = recording_provider();
    let runner = Runner::new(dir.path()).with_provider_plugin(provider);

    let err = runner.run(&args(&["deploy", "function"])).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<CommandError>(),
        Some(CommandError::MissingRequiredOption { .. })
    ));

    let err = runner
        .run(&args(&["deploy", "function", "-f", "bye"]))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("\"bye\" is not defined"));

    runner
        .run(&args(&["deploy", "function", "--function", "hello"]))
        .await
        .unwrap();
    let requests = requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, "deployFunction");
    assert_eq!(requests[0].2["function"], json!("hello"));
    assert!(dir.path().join(".stratus/hello.json").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn scripts_bind_hooks_and_add_commands() {
    let dir = tempdir().unwrap();
    write_service(
        dir.path(),
        &json!({
            "service": "shop",
            "provider": "aws",
            "plugins": ["scripts"],
            "custom": {
                "marker": "packaged.txt",
                "scripts": {
                    "hooks": { "after:package:finalize": "touch ${self:custom.marker}" },
                    "commands": {
                        "stage": {
                            "usage": "Writes the stage",
                            "command": "sh -c 'echo $STRATUS_STAGE > stage.txt'"
                        }
                    }
                }
            }
        }),
    );
    let runner = Runner::new(dir.path());

    runner.run(&args(&["package"])).await.unwrap();
    assert!(dir.path().join("packaged.txt").is_file());

    runner.run(&args(&["stage", "--stage", "qa"])).await.unwrap();
    let written = std::fs::read_to_string(dir.path().join("stage.txt")).unwrap();
    assert_eq!(written.trim(), "qa");
}
