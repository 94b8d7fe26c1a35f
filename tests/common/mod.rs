//! Common test utilities and helpers

#![allow(dead_code)]

use anyhow::Result;
use rust_decimal::Decimal;
use shard_topk::config::TopKConfig;
use shard_topk::mapreduce::{JobTransport, LocalTransport, Orchestrator};
use shard_topk::storage::{EntityAttributes, EntityKey, InMemoryCluster, RowSource};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const INVOICE_LINES_HEADER: &str = "invoice_line_id,customer_id,unit_price,quantity";
pub const CUSTOMERS_HEADER: &str = "customer_id,first_name,last_name,city,country";

pub fn dec(value: &str) -> Decimal {
    Decimal::from_str_exact(value).unwrap()
}

/// Cluster of three partitions on two nodes.
///
/// Keys route to partition `key % 3`: partition 0 holds customer 3,
/// partition 1 holds customers 1 and 4, partition 2 holds customer 2.
/// Totals: 4 → 200, 1 → 100, 3 → 80, 2 → 50. Customer 4 has no record.
pub fn sample_cluster() -> Arc<InMemoryCluster> {
    Arc::new(
        InMemoryCluster::builder()
            .partitions(3)
            .nodes(["node-0", "node-1"])
            .insert_fact(1, dec("60.00"))
            .insert_fact(1, dec("40.00"))
            .insert_fact(2, dec("50.00"))
            .insert_fact(3, dec("30.00"))
            .insert_fact(3, dec("50.00"))
            .insert_fact(4, dec("199.99"))
            .insert_fact(4, dec("0.01"))
            .insert_attributes(1, attributes("Ana Sousa", "Porto", "Portugal"))
            .insert_attributes(2, attributes("Ben Ito", "Osaka", "Japan"))
            .insert_attributes(3, attributes("Cleo Mars", "Lyon", "France"))
            .build()
            .unwrap(),
    )
}

pub fn attributes(name: &str, locality: &str, region: &str) -> EntityAttributes {
    EntityAttributes::new(name, locality, region)
}

/// Short deadline and backoff so degraded scenarios finish quickly
pub fn fast_config() -> TopKConfig {
    TopKConfig {
        fan_in_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(5),
        ..TopKConfig::default()
    }
}

/// Orchestrator reading rows through `source` and everything else from `cluster`
pub fn orchestrator_over(
    cluster: &Arc<InMemoryCluster>,
    source: Arc<dyn RowSource>,
    config: TopKConfig,
) -> Orchestrator {
    let transport: Arc<dyn JobTransport> = Arc::new(LocalTransport::new(source));
    Orchestrator::new(cluster.clone(), transport, cluster.clone(), config)
}

pub fn ranked_keys(report: &shard_topk::TopKReport) -> Vec<(EntityKey, Decimal)> {
    report
        .top
        .iter()
        .map(|entry| (entry.entity_key, entry.total))
        .collect()
}

/// CSV fixtures on disk for CLI tests
pub struct CsvFixture {
    pub temp_dir: TempDir,
    pub invoice_lines: PathBuf,
    pub customers: PathBuf,
}

impl CsvFixture {
    pub fn new(invoice_lines: &[&str], customers: &[&str]) -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let invoice_path = temp_dir.path().join("invoice_lines.csv");
        let customers_path = temp_dir.path().join("customers.csv");

        let mut lines = vec![INVOICE_LINES_HEADER];
        lines.extend_from_slice(invoice_lines);
        fs::write(&invoice_path, lines.join("\n") + "\n")?;

        let mut people = vec![CUSTOMERS_HEADER];
        people.extend_from_slice(customers);
        fs::write(&customers_path, people.join("\n") + "\n")?;

        Ok(Self {
            temp_dir,
            invoice_lines: invoice_path,
            customers: customers_path,
        })
    }

    /// Invoices for five customers plus one customer without a record
    pub fn sample() -> Result<Self> {
        Self::new(
            &[
                "1,1,0.99,10",
                "2,1,1.99,5",
                "3,2,0.99,3",
                "4,3,9.99,2",
                "5,4,0.99,1",
                "6,5,4.50,4",
                "7,6,100.00,1",
                "8,2,0.99,1",
            ],
            &[
                "1,Luís,Gonçalves,São José dos Campos,Brazil",
                "2,Leonie,Köhler,Stuttgart,Germany",
                "3,François,Tremblay,Montréal,Canada",
                "4,Bjørn,Hansen,Oslo,Norway",
                "5,František,Wichterlová,Prague,Czech Republic",
            ],
        )
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }
}
