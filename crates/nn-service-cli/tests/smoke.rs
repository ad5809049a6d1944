use nn_service::{BackendSelection, Preference, ReferenceMode, ServiceConfig};
use nn_service_cli::{build_registry, run_smoke, SmokeOptions};

fn config(backend: &str, reference_mode: ReferenceMode) -> ServiceConfig {
    ServiceConfig {
        backend: BackendSelection::from(backend.to_string()),
        reference_mode,
        ..ServiceConfig::default()
    }
}

#[test]
fn registry_lists_accelerator_before_reference() {
    let registry = build_registry(&ServiceConfig::default());
    assert_eq!(registry.list_backends(), vec!["accelerator", "reference"]);
}

#[tokio::test]
async fn smoke_through_reference_passthrough_echoes() {
    let report = run_smoke(
        config("reference", ReferenceMode::Passthrough),
        &SmokeOptions::default(),
    )
    .await
    .expect("smoke");
    assert_eq!(report.backend, "reference");
    assert_eq!(report.input.len(), 8);
    assert!(report.echoed());
}

#[tokio::test]
async fn smoke_through_reference_log_only_yields_zeros() {
    let options = SmokeOptions {
        preference: Preference::LowPower,
        elements: 3,
    };
    let report = run_smoke(config("reference", ReferenceMode::LogOnly), &options)
        .await
        .expect("smoke");
    assert_eq!(report.output, vec![0.0; 3]);
    assert!(!report.echoed());
}

#[tokio::test]
async fn smoke_auto_selects_the_loopback_accelerator() {
    let report = run_smoke(
        config("auto", ReferenceMode::LogOnly),
        &SmokeOptions::default(),
    )
    .await
    .expect("smoke");
    assert_eq!(report.backend, "accelerator");
    assert!(report.echoed());
}

#[tokio::test]
async fn smoke_rejects_unknown_backends_and_empty_tensors() {
    let err = run_smoke(
        config("tpu", ReferenceMode::LogOnly),
        &SmokeOptions::default(),
    )
    .await
    .expect_err("unknown backend");
    assert!(format!("{err:#}").contains("selecting backend"));

    let options = SmokeOptions {
        elements: 0,
        ..SmokeOptions::default()
    };
    run_smoke(ServiceConfig::default(), &options)
        .await
        .expect_err("empty tensor");
}
