//! End-to-end job runs against fake hosts.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;

use provisioner_common::{ErrorKind, Job, JobStatus};
use vps_provisioner::application::services::orchestrator::JobOrchestrator;
use vps_provisioner::domain::resources::commands;
use vps_provisioner::domain::{HostTarget, JobKind, JobSpec};

use crate::mocks::{
    HostScript, StaticFetcher, failed, ok, orchestrator, spec, universal,
};

const COMPOSE_URL: &str = "https://example.com/shop/docker-compose.yml";

/// Two services asking for 4096MB between them.
const HEAVY_COMPOSE: &str = "
services:
  db:
    image: postgres:16
    mem_limit: 2g
  app:
    image: ghcr.io/acme/shop:1.4
    restart: always
    deploy:
      resources:
        limits:
          memory: 2048m
    ports:
      - \"8080:80\"
";

async fn run(orchestrator: &JobOrchestrator, spec: JobSpec) -> Job {
    let submitted = orchestrator.submit(spec).await.unwrap();
    assert_eq!(submitted.receipt.status, JobStatus::Started);
    submitted.worker.await.unwrap();
    orchestrator
        .get(&submitted.receipt.job_id)
        .await
        .unwrap()
        .expect("job stored")
}

#[tokio::test]
async fn compose_needing_4096mb_is_rejected_on_4000mb_host() {
    let shell = HostScript::healthy(4000, 100, &[22], &[]).build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::with(COMPOSE_URL, HEAVY_COMPOSE));

    let job = run(&orchestrator, spec(&universal("docker-compose", COMPOSE_URL, "shop"))).await;

    assert_eq!(job.status, JobStatus::Rejected);
    assert_eq!(job.error_kind, Some(ErrorKind::InsufficientResources));
    assert_eq!(job.progress, 0);
    let detail = job.error_detail.expect("detail");
    assert_eq!(detail["memory_mb"]["required"], 4096);
    assert_eq!(detail["memory_mb"]["available"], 4000);
    assert_eq!(detail["memory_mb"]["ok"], false);
    assert!(job.error.unwrap().contains("Insufficient resources"));

    assert!(shell.executed().is_empty(), "mutations: {:?}", shell.executed());
    assert!(shell.uploads().is_empty());
}

#[tokio::test]
async fn compose_deploys_with_bounded_services() {
    let shell = HostScript::healthy(8000, 100, &[22], &[]).build();
    let (orchestrator, store) =
        orchestrator(shell.clone(), StaticFetcher::with(COMPOSE_URL, HEAVY_COMPOSE));
    let mut request = universal("docker-compose", COMPOSE_URL, "shop");
    request.env_vars = Some(BTreeMap::from([("MODE".to_string(), "prod".to_string())]));

    let job = run(&orchestrator, spec(&request)).await;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    let result = job.result.expect("result");
    assert_eq!(result["status"], "success");
    assert!(result["services"].as_array().unwrap().len() == 2);

    let uploads = shell.uploads();
    let (path, compose) = &uploads[0];
    assert_eq!(path, "/opt/shop/docker-compose.yml");
    assert!(compose.contains("on-failure:3"));
    assert!(compose.contains("2048m"));
    assert!(uploads.iter().any(|(p, c)| p == "/opt/shop/.env" && c.contains(r#"MODE="prod""#)));
    assert!(shell
        .executed()
        .iter()
        .any(|c| c.contains("docker compose up -d")));

    let writes = store.writes();
    assert_eq!(writes.first(), Some(&(JobStatus::Started, 0)));
    assert_eq!(writes.last(), Some(&(JobStatus::Completed, 100)));
}

#[tokio::test]
async fn progress_never_decreases_before_terminal() {
    let shell = HostScript::healthy(8000, 100, &[22], &[]).build();
    let (orchestrator, store) =
        orchestrator(shell, StaticFetcher::with(COMPOSE_URL, HEAVY_COMPOSE));

    let job = run(&orchestrator, spec(&universal("docker-compose", COMPOSE_URL, "shop"))).await;
    assert_eq!(job.status, JobStatus::Completed);

    let writes = store.writes();
    let (active, terminal) = writes.split_at(writes.len() - 1);
    for pair in active.windows(2) {
        assert!(pair[0].1 <= pair[1].1, "progress went backwards: {writes:?}");
        assert!(pair[0].0 <= pair[1].0, "status went backwards: {writes:?}");
    }
    assert!(active.iter().all(|(status, _)| !status.is_terminal()));
    assert_eq!(terminal, [(JobStatus::Completed, 100)]);
}

#[tokio::test]
async fn running_image_short_circuits_without_admission() {
    // No memory or disk answers: an admission check would reject.
    let shell = HostScript::default()
        .respond(commands::RUNNING_CONTAINERS, ok("web\nshop\n"))
        .build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "shop"))).await;

    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.unwrap();
    assert_eq!(result["already_running"], true);
    assert!(result["notes"][0].as_str().unwrap().contains("already running"));
    let commands = shell.commands();
    assert!(!commands.iter().any(|c| c.contains(commands::MEMORY)));
    assert!(shell.executed().is_empty());
}

#[tokio::test]
async fn image_port_conflict_is_rejected() {
    let shell = HostScript::healthy(8000, 100, &[22, 8080], &[]).build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());
    let mut request = universal("docker-image", "nginx:1.27", "web");
    request.ports = Some(BTreeMap::from([("8080".to_string(), "80".to_string())]));

    let job = run(&orchestrator, spec(&request)).await;

    assert_eq!(job.status, JobStatus::Rejected);
    assert_eq!(job.error_kind, Some(ErrorKind::PortConflict));
    assert_eq!(job.error_detail.unwrap()["port_conflicts"][0], 8080);
    assert!(shell.executed().is_empty());
}

#[tokio::test]
async fn missing_descriptor_is_a_download_failure() {
    let shell = HostScript::healthy(8000, 100, &[], &[]).build();
    let (orchestrator, _) = orchestrator(shell, StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-compose", COMPOSE_URL, "shop"))).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::SourceDownload));
    assert!(job.error.unwrap().contains("404"));
}

#[tokio::test]
async fn missing_runtime_fails_before_deploying() {
    let shell = HostScript::healthy(8000, 100, &[], &[])
        .respond(commands::RUNTIME_PRESENT, failed(1, ""))
        .build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "web"))).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::Provisioner));
    assert!(job.error.unwrap().contains("Docker is not installed"));
    assert!(shell.executed().is_empty());
}

#[tokio::test]
async fn repository_without_dockerfile_fails() {
    let shell = HostScript::healthy(8000, 100, &[], &[])
        .respond("test -f", failed(1, ""))
        .build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());

    let job = run(
        &orchestrator,
        spec(&universal("github-repo", "https://github.com/acme/shop.git", "shop")),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::Provisioner));
    assert!(job.error.unwrap().contains("Dockerfile not found"));
    assert!(shell.executed().iter().any(|c| c.contains("git clone --depth 1")));
    assert!(!shell.executed().iter().any(|c| c.contains("docker build")));
}

#[tokio::test(start_paused = true)]
async fn unreachable_host_times_out_after_fifteen_attempts() {
    let shell = HostScript::default().refuse_connects(u32::MAX).build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "web"))).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::SshTimeout));
    assert_eq!(
        job.error.as_deref(),
        Some("SSH timeout after 15 attempts. Server not ready.")
    );
    assert_eq!(job.error_detail.unwrap()["attempts"], 15);
    assert_eq!(shell.connects(), 15);
}

#[tokio::test(start_paused = true)]
async fn slow_boot_is_tolerated() {
    let shell = HostScript::healthy(8000, 100, &[], &[])
        .refuse_connects(4)
        .build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "web"))).await;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    // Four refusals, the successful probe, then the working session.
    assert_eq!(shell.connects(), 6);
}

#[tokio::test]
async fn worker_panic_becomes_unknown_failure() {
    let shell = HostScript::healthy(8000, 100, &[], &[])
        .panic_on("docker run")
        .build();
    let (orchestrator, store) = orchestrator(shell, StaticFetcher::empty());

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "web"))).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_kind, Some(ErrorKind::Unknown));
    assert!(job.error.unwrap().contains("crashed"));
    let terminal_writes = store
        .writes()
        .iter()
        .filter(|(status, _)| status.is_terminal())
        .count();
    assert_eq!(terminal_writes, 1);
}

#[tokio::test(start_paused = true)]
async fn terminal_write_is_retried_after_a_store_outage() {
    let shell = HostScript::default()
        .respond(commands::RUNNING_CONTAINERS, ok("shop\n"))
        .build();
    let (orchestrator, store) = orchestrator(shell, StaticFetcher::empty());
    store.fail_terminal_writes(1);

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "shop"))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
}

#[tokio::test(start_paused = true)]
async fn lasting_store_outage_leaves_job_active() {
    let shell = HostScript::default()
        .respond(commands::RUNNING_CONTAINERS, ok("shop\n"))
        .build();
    let (orchestrator, store) = orchestrator(shell, StaticFetcher::empty());
    store.fail_terminal_writes(2);

    let job = run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "shop"))).await;

    assert!(!job.status.is_terminal(), "{:?}", job.status);
    assert!(store.writes().iter().all(|(status, _)| !status.is_terminal()));
}

#[tokio::test]
async fn named_app_installs_and_verifies() {
    let shell = HostScript::healthy(8000, 100, &[], &[])
        .respond_seq(commands::RUNNING_CONTAINERS, vec![ok(""), ok("n8n\n")])
        .build();
    let (orchestrator, _) = orchestrator(shell.clone(), StaticFetcher::empty());
    let spec = JobSpec {
        target: HostTarget {
            host: "203.0.113.10".parse().unwrap(),
            username: "root".into(),
            password: "correct-horse".into(),
        },
        kind: JobKind::NamedApp {
            app: "n8n".parse().unwrap(),
            custom_domain: None,
        },
    };

    let job = run(&orchestrator, spec).await;

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.app, "n8n");
    assert_eq!(job.result.unwrap()["url"], "http://203.0.113.10:5678");
    let uploads = shell.uploads();
    assert_eq!(uploads[0].0, "/root/install_n8n.sh");
    assert!(uploads[0].1.contains("203.0.113.10"));
    assert!(shell
        .executed()
        .iter()
        .any(|c| c.starts_with("bash '/root/install_n8n.sh'")));
}

#[tokio::test]
async fn list_and_stats_cover_finished_jobs() {
    let shell = HostScript::healthy(4000, 100, &[], &[]).build();
    let (orchestrator, _) =
        orchestrator(shell, StaticFetcher::with(COMPOSE_URL, HEAVY_COMPOSE));
    run(&orchestrator, spec(&universal("docker-compose", COMPOSE_URL, "shop"))).await;
    run(&orchestrator, spec(&universal("docker-image", "nginx:1.27", "web"))).await;

    let rejected = orchestrator
        .list(100, Some(JobStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].app, "shop");

    let stats = orchestrator.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_app["web"], 1);
    assert_eq!(stats.by_status["rejected"], 1);
}
