//! Shared test utilities for export integration tests
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use common::export::{Export, ExportConfig, Registry};
use common::upcall::{ChannelConsumer, Upcall};
use s3ns_store::testkit::ScriptedClient;
use s3ns_store::{ListEntry, Page};

pub struct TestEnv {
    pub registry: Arc<Registry>,
    pub export: Arc<Export>,
    pub client: Arc<ScriptedClient>,
    pub upcalls: flume::Receiver<Upcall>,
}

pub fn config(bucket: &str) -> ExportConfig {
    ExportConfig::new("localhost:9000", bucket, "AKIAEXAMPLE", "secret")
}

/// A registry with one export backed by a scripted client.
pub fn setup_test_env() -> TestEnv {
    setup_with_config(config("test"))
}

pub fn setup_with_config(config: ExportConfig) -> TestEnv {
    let registry = Arc::new(Registry::new());
    let client = Arc::new(ScriptedClient::new(config.bucket_name.clone()));
    let (consumer, upcalls) = ChannelConsumer::unbounded();
    let export = registry
        .create_export_with_client(config, client.clone(), Arc::new(consumer))
        .unwrap();

    TestEnv {
        registry,
        export,
        client,
        upcalls,
    }
}

pub fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn entry(key: &str, size: u64, modified: DateTime<Utc>) -> ListEntry {
    ListEntry {
        key: key.to_string(),
        size,
        last_modified: modified,
        etag: None,
    }
}

/// A complete (untruncated) listing page.
pub fn page(prefixes: &[&str], files: &[(&str, u64)]) -> Page {
    Page {
        entries: files
            .iter()
            .map(|(key, size)| entry(key, *size, timestamp(1_700_000_000)))
            .collect(),
        common_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        is_truncated: false,
        next_marker: None,
    }
}

/// Names of a directory's children in ordinal order.
pub fn child_names(export: &Export, dir: common::graph::HandleId) -> Vec<String> {
    export
        .read()
        .directory(dir)
        .unwrap()
        .iter()
        .map(|d| d.name.clone())
        .collect()
}
