use std::time::Duration;

use open_scheduler::driver::{
    process::ProcessDriver, Driver, LogOptions, JOB_ID_LABEL, MANAGED_LABEL,
};
use open_scheduler::scheduler::job::{InstanceSpec, Job, JobType};

fn shell_job(name: &str, script: &str) -> Job {
    let mut job = Job::new(name, JobType::Single);
    job.driver_type = "process".to_string();
    job.instance_config = Some(InstanceSpec {
        image: String::new(),
        entrypoint: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        args: Vec::new(),
        driver_options: Default::default(),
    });
    job
}

async fn wait_for_status(driver: &ProcessDriver, instance_id: &str, expected: &str) -> bool {
    for _ in 0..100 {
        if driver.status(instance_id).await.unwrap() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_successful_process_reports_exited() {
    let driver = ProcessDriver::new();
    let job = shell_job("quick", "exit 0");

    let instance_id = driver.run(&job).await.unwrap();
    assert_eq!(instance_id, job.job_id);

    assert!(wait_for_status(&driver, &instance_id, "exited").await);
    let telemetry = driver.inspect(&instance_id).await.unwrap();
    assert_eq!(telemetry.exit_code, 0);
}

#[tokio::test]
async fn test_failing_process_reports_failed_with_exit_code() {
    let driver = ProcessDriver::new();
    let job = shell_job("broken", "exit 3");

    let instance_id = driver.run(&job).await.unwrap();
    assert!(wait_for_status(&driver, &instance_id, "failed").await);

    let telemetry = driver.inspect(&instance_id).await.unwrap();
    assert_eq!(telemetry.exit_code, 3);
}

#[tokio::test]
async fn test_instances_carry_scheduler_labels() {
    let driver = ProcessDriver::new();
    let job = shell_job("labelled", "sleep 5");

    driver.run(&job).await.unwrap();

    let instances = driver.list().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].labels.get(MANAGED_LABEL).unwrap(), "true");
    assert_eq!(instances[0].labels.get(JOB_ID_LABEL).unwrap(), &job.job_id);

    driver.stop(&job.job_id).await.unwrap();
}

#[tokio::test]
async fn test_stop_kills_running_process_and_is_idempotent() {
    let driver = ProcessDriver::new();
    let job = shell_job("long", "sleep 30");

    let instance_id = driver.run(&job).await.unwrap();
    assert!(wait_for_status(&driver, &instance_id, "running").await);

    driver.stop(&instance_id).await.unwrap();
    assert!(driver.list().await.unwrap().is_empty());

    // Stopping again (or stopping something unknown) is a success.
    driver.stop(&instance_id).await.unwrap();
    driver.stop("never-existed").await.unwrap();
}

#[tokio::test]
async fn test_timeout_kills_overrunning_process() {
    let driver = ProcessDriver::new();
    let mut job = shell_job("overrun", "sleep 30");
    job.timeout_seconds = 1;

    let instance_id = driver.run(&job).await.unwrap();
    assert!(wait_for_status(&driver, &instance_id, "failed").await);
}

#[tokio::test]
async fn test_run_without_entrypoint_is_rejected() {
    let driver = ProcessDriver::new();

    let mut job = Job::new("empty", JobType::Single);
    job.instance_config = Some(InstanceSpec::default());
    assert!(driver.run(&job).await.is_err());

    let bare = Job::new("bare", JobType::Single);
    assert!(driver.run(&bare).await.is_err());
}

#[tokio::test]
async fn test_unknown_instance_status_is_unknown() {
    let driver = ProcessDriver::new();
    assert_eq!(driver.status("missing").await.unwrap(), "unknown");
    assert!(driver.inspect("missing").await.is_err());
}

#[tokio::test]
async fn test_logs_and_restart_are_unsupported() {
    let driver = ProcessDriver::new();
    assert!(driver.logs("any", LogOptions::default()).await.is_err());
    assert!(driver.restart("any").await.is_err());
}
