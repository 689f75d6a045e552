// SPDX-License-Identifier: MIT

use std::sync::Arc;
use std::time::Duration;

use super::*;

#[tokio::test]
async fn static_directory_reports_known_devices_and_catalogues_them() {
    let directory = StaticDeviceDirectory::new(StaticDeviceDirectoryFile {
        known_devices: vec!["dev1".to_owned()],
        auths: vec![],
    });

    assert!(directory.known_devices().await.contains("dev1"));
    assert!(directory.find("dev1").await.is_some());
    assert!(directory.find("dev2").await.is_none());
}

#[tokio::test]
async fn echo_worker_starts_and_stops() {
    let communicator = {
        let entry = Arc::new(crate::entry::ConnectionEntry::new(Arc::from("dev1")));
        Communicator::new(entry, Duration::from_secs(1))
    };
    let factory = EchoWorkerFactory;
    let worker = factory
        .build(Arc::from("dev1"), WorkerMode::Normal, communicator)
        .await
        .expect("factory always builds an echo worker");

    assert!(!worker.is_stopping());
    let handle = worker.clone().start();
    worker.stop();
    assert!(worker.is_stopping());

    tokio::task::spawn_blocking(move || handle.join())
        .await
        .expect("join task did not panic")
        .expect("worker thread did not panic");
}
